//! Incremental frame decoder for the streaming endpoint
//!
//! Accepts both SSE framing (`data: {...}` lines separated by blank lines) and
//! bare newline-delimited JSON. Network chunks may split lines and multi-byte
//! UTF-8 sequences anywhere; bytes are buffered until a full line is available.

use super::wire::{StreamEvent, WireFrame};

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline terminated
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(raw: &[u8]) -> Option<StreamEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping stream line with invalid UTF-8");
            return None;
        }
    };
    let line = line.trim_end_matches(['\n', '\r']);

    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.strip_prefix(' ').unwrap_or(data)
    } else if is_sse_field(line) {
        return None;
    } else {
        line
    };

    match serde_json::from_str::<WireFrame>(payload) {
        Ok(frame) => {
            let event = frame.into_event();
            if event.is_none() {
                tracing::debug!(payload = %payload, "Ignoring unknown stream frame type");
            }
            event
        }
        Err(e) => {
            tracing::warn!(error = %e, payload = %payload, "Skipping malformed stream frame");
            None
        }
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}
