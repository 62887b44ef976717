use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{PromptError, Result};
use crate::llm::{CompletionSource, GenerateContext, SystemPromptOptions, prompts};
use crate::security::EnhanceLimiter;
use crate::variation::{Variation, VariationStream};

/// What a generation produced.
///
/// Failures after the stream opened do not discard earlier records: the
/// variations emitted before the failure are returned alongside it.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub variations: Vec<Variation>,
    /// Terminal failure that cut the stream short, if any.
    pub error: Option<PromptError>,
}

/// Single-flight coordinator between a completion stream and the
/// variation extractor.
pub struct Generator {
    source: Arc<dyn CompletionSource>,
    limiter: Arc<EnhanceLimiter>,
    generating: AtomicBool,
}

/// Clears the generating flag when the generation ends, however it ends.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl<'a> GeneratingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PromptError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Generator {
    pub fn new(source: Arc<dyn CompletionSource>, limiter: Arc<EnhanceLimiter>) -> Self {
        Self {
            source,
            limiter,
            generating: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Stream variations of `base_prompt`, calling `on_variation` for each
    /// record as soon as it is recognized.
    ///
    /// Rejected up front (nothing sent): empty prompt, another generation in
    /// flight, enhance quota exhausted.  A failure to open the stream is
    /// also returned as `Err` and does not spend enhance quota.
    pub async fn run<F>(
        &self,
        base_prompt: &str,
        options: &SystemPromptOptions,
        mut on_variation: F,
    ) -> Result<GenerationOutcome>
    where
        F: FnMut(&Variation),
    {
        let base_prompt = base_prompt.trim();
        if base_prompt.is_empty() {
            return Err(PromptError::InvalidInput("prompt is empty".into()));
        }

        let _guard = GeneratingGuard::acquire(&self.generating)?;

        if options.enhance {
            self.limiter.check()?;
        }

        let system_prompt = prompts::system_prompt(options);
        let ctx = GenerateContext {
            system_prompt: &system_prompt,
            message: base_prompt,
        };

        info!(
            source = self.source.name(),
            count = options.count,
            enhance = options.enhance,
            "generation started"
        );

        let mut fragments = self.source.stream(&ctx).await?;
        // the busy guard keeps check and record on this generator race-free
        if options.enhance {
            self.limiter.record();
        }

        let mut buffer = VariationStream::new();
        let mut variations = Vec::new();
        let mut error = None;

        while let Some(fragment) = fragments.next().await {
            let mut found = Vec::new();
            let pushed = fragment.and_then(|text| buffer.push(&text, &mut found));
            for variation in found {
                on_variation(&variation);
                variations.push(variation);
            }
            if let Err(e) = pushed {
                warn!(error = %e, emitted = variations.len(), "generation aborted");
                error = Some(e);
                break;
            }
        }

        let tail = buffer.finish();
        if !tail.trim().is_empty() {
            debug!(discarded = tail.len(), "unconsumed text dropped");
        }

        info!(variations = variations.len(), failed = error.is_some(), "generation finished");

        Ok(GenerationOutcome { variations, error })
    }
}
