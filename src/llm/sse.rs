use serde::Deserialize;

use crate::error::{PromptError, Result};

/// One meaningful event from a chat-completions SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A non-empty `choices[0].delta.content` fragment.
    Delta(String),
    /// The `data: [DONE]` terminator.
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Line-buffering decoder for `text/event-stream` bodies.
///
/// Network chunks can split a line (or a multibyte character) anywhere, so
/// bytes are held until a newline arrives and only whole lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, returning the events of every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = parse_line(&line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Decode a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Result<Option<SseEvent>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.pending);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Result<Option<SseEvent>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| PromptError::Llm(format!("stream is not valid UTF-8: {e}")))?
        .trim_end_matches(['\r', '\n']);

    // comments, `event:` and `id:` lines carry nothing we use
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();

    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| PromptError::Llm(format!("malformed stream chunk: {e}")))?;

    if let Some(err) = chunk.error {
        return Err(PromptError::Llm(format!("stream error: {}", err.message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseEvent::Delta))
}
