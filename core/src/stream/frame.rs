//! Blank-line-delimited frame decoding.
//!
//! Lines are split on `\n` (a trailing `\r` is dropped). Lines starting with
//! `data:` accumulate into the current payload, joined with `\n`; any other
//! non-empty line is ignored. A blank line ends the frame.

use serde::de::DeserializeOwned;
use tracing::debug;

pub const DATA_MARKER: &str = "data:";

#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    data: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes (any chunking) and collect every payload completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(payload) = self.push_line(line.trim_end_matches('\r')) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Feed one complete line (without its terminator).
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_payload();
        }
        if let Some(rest) = line.strip_prefix(DATA_MARKER) {
            let value = rest.trim_start();
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }

    /// End of input: a trailing unterminated line and any accumulated payload
    /// still count as a final frame.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.push_line(line.trim_end_matches('\r'));
        }
        self.take_payload()
    }

    fn take_payload(&mut self) -> Option<String> {
        self.data.take().filter(|d| !d.trim().is_empty())
    }
}

/// Parse a frame payload; malformed payloads are dropped, not fatal.
pub fn parse_frame<T: DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(target: "event_stream", error = %e, payload, "Dropping malformed frame");
            None
        }
    }
}
