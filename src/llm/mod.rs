pub mod context;
pub mod prompts;
pub mod sse;

mod openai;

use futures::stream::BoxStream;

use crate::error::Result;

pub use context::GenerateContext;
pub use openai::OpenAiEngine;
pub use prompts::SystemPromptOptions;

/// Content fragments of one streamed completion, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// A source of streamed chat completions.
///
/// The production implementation talks to an OpenAI-compatible API; tests
/// substitute canned fragment sequences.
#[async_trait::async_trait]
pub trait CompletionSource: Send + Sync {
    /// Human-readable name of this source (e.g. the model id).
    fn name(&self) -> &str;

    /// Start a completion for the given context.  Errors before the first
    /// fragment (auth, bad request, connection refused) are returned here;
    /// later failures arrive as an `Err` item on the stream.
    async fn stream(&self, ctx: &GenerateContext<'_>) -> Result<FragmentStream>;
}

#[async_trait::async_trait]
impl CompletionSource for OpenAiEngine {
    fn name(&self) -> &str {
        self.model()
    }

    async fn stream(&self, ctx: &GenerateContext<'_>) -> Result<FragmentStream> {
        OpenAiEngine::stream(self, ctx).await
    }
}
