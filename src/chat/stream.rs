//! Incremental decoder for `data:`-prefixed completion streams
//!
//! Bytes are appended to a rolling buffer and only complete, newline
//! terminated lines are consumed from its front. `\n` never occurs inside a
//! multi-byte UTF-8 sequence, so splitting on raw bytes is safe even when a
//! chunk boundary falls in the middle of a character.

use serde::Deserialize;
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Outcome of decoding one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Comment, blank, unprefixed, or a payload without text
    Skip,
    /// `[DONE]` sentinel
    Done,
    /// Non-empty text delta
    Delta(String),
    /// `data:` line whose payload is not valid JSON
    Malformed,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify a single line, already stripped of its `\n`.
pub fn decode_line(line: &str) -> LineEvent {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.starts_with(':') || line.trim().is_empty() {
        return LineEvent::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Skip;
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return LineEvent::Done;
    }

    // Only syntactic validity matters; a well-formed payload of another shape
    // carries no text.
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => return LineEvent::Malformed,
    };

    let content = serde_json::from_value::<CompletionChunk>(value)
        .ok()
        .and_then(|chunk| chunk.choices.into_iter().next())
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content);

    match content {
        Some(text) if !text.is_empty() => LineEvent::Delta(text),
        _ => LineEvent::Skip,
    }
}

/// Rolling-buffer decoder for one streamed response
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return the text deltas of every complete line.
    ///
    /// A line whose JSON does not parse is put back at the front of the buffer
    /// and scanning stops until the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();

            match decode_line(&String::from_utf8_lossy(&line)) {
                LineEvent::Skip => {}
                LineEvent::Delta(text) => deltas.push(text),
                LineEvent::Done => {
                    self.done = true;
                    break;
                }
                LineEvent::Malformed => {
                    debug!(len = line.len(), "Incomplete payload, waiting for more bytes");
                    line.push(b'\n');
                    line.extend_from_slice(&self.buffer);
                    self.buffer = line;
                    break;
                }
            }
        }

        deltas
    }

    /// Flush whatever is left once the body has ended.
    ///
    /// Every remaining line gets one pass; sentinels and malformed payloads
    /// are skipped rather than retried.
    pub fn finish(self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }

        let rest = String::from_utf8_lossy(&self.buffer);
        if rest.trim().is_empty() {
            return Vec::new();
        }

        rest.split('\n')
            .filter_map(|raw| match decode_line(raw) {
                LineEvent::Delta(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}
