use tracing::trace;

use crate::error::Result;
use crate::variation::Variation;
use crate::variation::extract::extract_first;

/// Accumulates streamed text and yields variations as their spans complete.
///
/// Each consumed span is cut out of the buffer by the exact byte range it
/// was matched at, so the buffer holds only unconsumed text plus at most
/// one in-progress record.
#[derive(Debug, Default)]
pub struct VariationStream {
    buffer: String,
    emitted: usize,
}

impl VariationStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and drain every span it completes into `found`,
    /// in order.
    ///
    /// Spans completed before a malformed one are still appended to `found`
    /// when the error is returned. The offending span stays in the buffer;
    /// callers are expected to abandon the stream.
    pub fn push(&mut self, fragment: &str, found: &mut Vec<Variation>) -> Result<()> {
        self.buffer.push_str(fragment);

        while let Some(extracted) = extract_first(&self.buffer)? {
            self.buffer.replace_range(extracted.span.clone(), "");
            self.emitted += 1;
            trace!(
                index = self.emitted,
                span_len = extracted.span.len(),
                remaining = self.buffer.len(),
                "variation extracted"
            );
            found.push(extracted.variation);
        }
        Ok(())
    }

    /// End the stream, returning whatever unconsumed text remains.
    pub fn finish(self) -> String {
        self.buffer
    }
}
