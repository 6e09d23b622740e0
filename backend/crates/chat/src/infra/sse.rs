//! Upstream SSE decoding
//!
//! Re-frames the OpenAI-compatible `text/event-stream` body into discrete
//! events. Network chunks split lines arbitrarily, so the decoder keeps the
//! unterminated tail in a buffer and a cursor marking how far it has read.

use serde::Deserialize;

/// One meaningful upstream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Token text to relay
    Delta(String),
    /// `[DONE]` or a `finish_reason`
    Finished,
    /// Error payload sent in-band after the stream started
    Error(String),
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

/// Incremental line decoder
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    cursor: usize,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning the events it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.buffer[self.cursor..].iter().position(|b| *b == b'\n') {
            let end = self.cursor + offset;
            let line = String::from_utf8_lossy(&self.buffer[self.cursor..end]).into_owned();
            self.cursor = end + 1;
            decode_line(&line, &mut events);
        }

        // Compact once the consumed prefix dominates
        if self.cursor > 0 && self.cursor * 2 >= self.buffer.len() {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }

        events
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.cursor < self.buffer.len() {
            let line = String::from_utf8_lossy(&self.buffer[self.cursor..]).into_owned();
            decode_line(&line, &mut events);
        }
        self.buffer.clear();
        self.cursor = 0;
        events
    }

    /// Bytes received but not yet decoded
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.cursor
    }
}

fn decode_line(line: &str, events: &mut Vec<SseEvent>) {
    let line = line.strip_suffix('\r').unwrap_or(line);

    // Blank lines separate events; `:` lines are keep-alive comments
    if line.is_empty() || line.starts_with(':') {
        return;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return;
    };
    let data = data.trim();

    if data == "[DONE]" {
        events.push(SseEvent::Finished);
        return;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable upstream SSE payload");
            return;
        }
    };

    if let Some(error) = chunk.error {
        let message = if error.message.is_empty() {
            "upstream reported an error".to_string()
        } else {
            error.message
        };
        events.push(SseEvent::Error(message));
        return;
    }

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(SseEvent::Delta(content));
        }
        if choice.finish_reason.is_some() {
            events.push(SseEvent::Finished);
        }
    }
}
