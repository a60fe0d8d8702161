//! Incremental decoder for workload migration progress.
//!
//! The API streams concatenated JSON objects such as
//! `{"Message":"Moving 3 units...\n"}` in arbitrary chunks. Some deployments
//! emit a non-JSON preamble before the first object; it is skipped. Once the
//! first object has been decoded the stream must stay well-formed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Substring marking a progress message as an error report.
pub const ERROR_MARKER: &str = "Error";

/// One progress message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMessage {
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl MoveMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.message.contains(ERROR_MARKER)
    }

    /// Message text without the trailing newline the API appends.
    pub fn text(&self) -> &str {
        self.message.trim_end_matches(['\r', '\n'])
    }
}

#[derive(Debug, Error)]
#[error("invalid progress stream at byte {offset}: {reason}")]
pub struct DecodeError {
    pub offset: usize,
    pub reason: String,
}

enum Step {
    Drained,
    Decoded(MoveMessage, usize),
    Partial,
    Invalid(serde_json::Error),
}

/// Buffers chunks and yields complete messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
    consumed: usize,
    synced: bool,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Result<Option<MoveMessage>, DecodeError> {
        loop {
            if !self.synced && !self.skip_to_object() {
                return Ok(None);
            }

            let step = {
                let mut objects =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<MoveMessage>();
                match objects.next() {
                    None => Step::Drained,
                    Some(Ok(message)) => Step::Decoded(message, objects.byte_offset()),
                    Some(Err(err)) if err.is_eof() => Step::Partial,
                    Some(Err(err)) => Step::Invalid(err),
                }
            };

            match step {
                Step::Drained => {
                    self.discard(self.buffer.len());
                    return Ok(None);
                }
                Step::Decoded(message, end) => {
                    self.discard(end);
                    self.synced = true;
                    return Ok(Some(message));
                }
                Step::Partial => return Ok(None),
                Step::Invalid(_) if !self.synced => {
                    // A brace inside the preamble; keep scanning past it.
                    self.discard(1);
                }
                Step::Invalid(err) => {
                    return Err(DecodeError {
                        offset: self.consumed,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    /// Signal end of stream; a trailing partial object is an error.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        let leftover = self
            .buffer
            .iter()
            .any(|byte| !byte.is_ascii_whitespace());
        if self.synced && leftover {
            return Err(DecodeError {
                offset: self.consumed,
                reason: "stream ended inside a message".to_string(),
            });
        }
        self.discard(self.buffer.len());
        Ok(())
    }

    /// Drop preamble bytes up to the next `{`. Returns false if none is buffered.
    fn skip_to_object(&mut self) -> bool {
        match self.buffer.iter().position(|byte| *byte == b'{') {
            Some(start) => {
                self.discard(start);
                true
            }
            None => {
                self.discard(self.buffer.len());
                false
            }
        }
    }

    fn discard(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.consumed += count;
    }
}

impl Iterator for MessageDecoder {
    type Item = Result<MoveMessage, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}
