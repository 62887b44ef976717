/// Per-call inputs passed to every [`CompletionSource`](super::CompletionSource).
///
/// Bundled so the trait signature stays stable as request options grow.
pub struct GenerateContext<'a> {
    /// Rendered system instruction.
    pub system_prompt: &'a str,
    /// The user's base prompt.
    pub message: &'a str,
}
