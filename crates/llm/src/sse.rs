//! Incremental Server-Sent-Events decoder.
//!
//! Consumes raw byte chunks from the upstream body and yields complete
//! events without ever buffering the whole stream. Partial lines and
//! partial UTF-8 sequences are retained across reads. Egress encoding is
//! handled by the axum SSE responder, which writes the same
//! `event: <name>` / `data: <json>` framing.

use crate::error::LlmError;

/// Buffer ceiling. Crossing it flushes everything parsed so far; a single
/// line larger than this fails the stream.
const MAX_BUFFER: usize = 1024 * 1024;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A complete event: optional `event:` name plus joined `data:` payload.
    Event { name: Option<String>, data: String },
    /// The `data: [DONE]` sentinel.
    Done,
}

/// Incremental SSE decoder. One instance per response stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Incomplete UTF-8 sequence carried over from the previous chunk.
    byte_tail: Vec<u8>,
    /// Incomplete line carried over from the previous chunk.
    line_tail: String,
    /// `event:` field of the event under construction.
    event_name: Option<String>,
    /// `data:` lines of the event under construction.
    data_lines: Vec<String>,
    failed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, LlmError> {
        if self.failed {
            return Err(LlmError::UpstreamStreamError(
                "SSE decoder previously exceeded its buffer limit".to_string(),
            ));
        }

        self.byte_tail.extend_from_slice(chunk);

        let text = self.take_decodable()?;

        let mut frames = Vec::new();
        self.line_tail.push_str(&text);

        while let Some(newline) = self.line_tail.find('\n') {
            let mut line: String = self.line_tail.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            self.process_line(&line, &mut frames);
        }

        if self.line_tail.len() > MAX_BUFFER {
            self.failed = true;
            return Err(LlmError::UpstreamStreamError(format!(
                "SSE line exceeded the {MAX_BUFFER} byte buffer limit"
            )));
        }

        // Controlled flush: a pathological event with endless data lines is
        // emitted early, preserving only the incomplete tail.
        if self.pending_len() > MAX_BUFFER {
            if let Some(frame) = self.flush_event() {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    /// Flush any residual state at end of stream.
    pub fn finish(&mut self) -> Result<Vec<SseFrame>, LlmError> {
        if self.failed {
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();

        // A trailing line without a newline still counts.
        if !self.byte_tail.is_empty() {
            let tail = String::from_utf8_lossy(&self.byte_tail).into_owned();
            self.byte_tail.clear();
            self.line_tail.push_str(&tail);
        }

        if !self.line_tail.is_empty() {
            let line = std::mem::take(&mut self.line_tail);
            self.process_line(&line, &mut frames);
        }

        if let Some(frame) = self.flush_event() {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Split the longest decodable UTF-8 prefix off `byte_tail`.
    fn take_decodable(&mut self) -> Result<String, LlmError> {
        match std::str::from_utf8(&self.byte_tail) {
            Ok(text) => {
                let text = text.to_string();
                self.byte_tail.clear();
                Ok(text)
            }
            Err(error) => {
                let valid_up_to = error.valid_up_to();

                match error.error_len() {
                    // Incomplete trailing sequence: keep it for the next chunk.
                    None => {
                        let rest = self.byte_tail.split_off(valid_up_to);
                        let text = String::from_utf8(std::mem::replace(&mut self.byte_tail, rest))
                            .expect("validated prefix");
                        Ok(text)
                    }
                    // Invalid bytes mid-stream: decode lossily and move on.
                    Some(_) => {
                        let text = String::from_utf8_lossy(&self.byte_tail).into_owned();
                        self.byte_tail.clear();
                        Ok(text)
                    }
                }
            }
        }
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            if let Some(frame) = self.flush_event() {
                frames.push(frame);
            }
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);

            if value == "[DONE]" {
                if let Some(frame) = self.flush_event() {
                    frames.push(frame);
                }
                frames.push(SseFrame::Done);
                return;
            }

            self.data_lines.push(value.to_string());
            return;
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.event_name = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
            return;
        }

        // Comments and the fields we don't interpret.
        if line.starts_with(':') || line.starts_with("id:") || line.starts_with("retry:") {
            return;
        }

        // Anything else is kept as payload so downstream consumers still see it.
        self.data_lines.push(line.to_string());
    }

    fn flush_event(&mut self) -> Option<SseFrame> {
        if self.event_name.is_none() && self.data_lines.is_empty() {
            return None;
        }

        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data_lines).join("\n");

        Some(SseFrame::Event { name, data })
    }

    fn pending_len(&self) -> usize {
        self.data_lines.iter().map(String::len).sum()
    }
}
