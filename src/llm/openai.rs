use std::collections::VecDeque;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PromptError, Result};
use crate::llm::sse::{SseDecoder, SseEvent};
use crate::llm::{FragmentStream, GenerateContext};

/// Streaming client for an OpenAI-compatible chat-completions endpoint.
///
/// Configuration priority (highest → lowest):
///   1. Environment variables (`OPENAI_BASE_URL`, `OPENAI_MODEL`)
///   2. `[llm]` section of `config.toml`
///   3. Built-in defaults
///
/// The API key is resolved by the caller (see `App::api_key`) since it may
/// live encrypted in the library store.
pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

// -- OpenAI request/response types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiEngine {
    pub fn new(config: &Config, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PromptError::Config(
                "API key not found: run `nexus-prompt set-key <key>` or set OPENAI_API_KEY".into(),
            ));
        }

        let base_url = config.base_url();
        let model = config.model();
        let timeout_secs = config.llm.timeout_secs;

        let mut builder = Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| PromptError::Config(format!("failed to create HTTP client: {e}")))?;

        info!(
            model = %model,
            base_url = %base_url,
            temperature = config.llm.temperature,
            timeout_secs,
            "OpenAI engine initialized"
        );

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List models once to confirm the endpoint and key are accepted.
    pub async fn check_endpoint(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PromptError::Llm(format!("API returned {status}")));
        }
        Ok(())
    }

    /// Open a streaming chat completion and return its content fragments.
    pub async fn stream(&self, ctx: &GenerateContext<'_>) -> Result<FragmentStream> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: ctx.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: ctx.message,
                },
            ],
            temperature: self.temperature,
            max_tokens: (self.max_tokens > 0).then_some(self.max_tokens),
            stream: true,
        };

        debug!(
            model = %self.model,
            prompt_len = ctx.message.len(),
            "opening chat completion stream"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let error_msg = serde_json::from_str::<ErrorResponse>(&error_text)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or(error_text);

            warn!(status = %status, error = %error_msg, "chat completion API error");

            return Err(PromptError::Llm(format!(
                "API returned {status}: {error_msg}"
            )));
        }

        Ok(fragments(Box::pin(resp.bytes_stream())).boxed())
    }
}

struct BodyState<S> {
    body: S,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S> BodyState<S> {
    /// Queue deltas; stop at `[DONE]`.
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.ready.push_back(text),
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turn an SSE byte body into content fragments.  The stream ends after
/// `[DONE]` or at end of body, and after yielding its first error.
fn fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = BodyState {
        body,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.ready.pop_front() {
                return Some((Ok(text), st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => match st.decoder.feed(chunk.as_ref()) {
                    Ok(events) => st.absorb(events),
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((
                        Err(PromptError::Llm(format!("stream interrupted: {e}"))),
                        st,
                    ));
                }
                None => {
                    let tail = st.decoder.finish();
                    st.finished = true;
                    match tail {
                        Ok(Some(event)) => st.absorb(vec![event]),
                        Ok(None) => {}
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    })
}
