//! Frame decoder for the field-device line protocol.
//!
//! Two frame shapes share one stream:
//!
//! ```text
//! :light1=5\r\n                 scalar, retained
//! !light1=5\r\n                 scalar, live
//! :note=12$=hello\r\nworld\r\n  length-prefixed string, payload may hold CRLF
//! ```
//!
//! The first byte marks the frame as live (`!`) or as a restatement of
//! last-known state (anything else, normally `:`).

use fieldmq_common::{TopicPrefix, Update, Value, escape_bytes};
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";
const STRING_MARKER: &[u8] = b"$=";
const LIVE_MARKER: u8 = b'!';

/// Session-fatal decoder failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unconsumed input outgrew the configured bound, or a string frame
    /// announced a size that can never fit in it.
    #[error("decoder buffer overflow: {needed} bytes needed, limit is {limit}")]
    BufferOverflow { needed: usize, limit: usize },
}

/// Everything one `feed` call produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub updates: Vec<Update>,
    /// Lines discarded as malformed.
    pub malformed: usize,
}

/// Outcome of looking at the head of the buffer.
enum Step {
    Frame { update: Update, consumed: usize },
    Malformed { consumed: usize },
    /// No terminator yet (`awaiting` is `None`), or a string frame that
    /// completes once `awaiting` bytes are buffered.
    NeedMore { awaiting: Option<usize> },
}

/// Stateful decoder; holds partial frames across reads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    prefix: TopicPrefix,
    max_buffer: usize,
    /// Leading bytes already searched for a terminator without success.
    scanned: usize,
    /// Total size of the string frame at the head, while it is incomplete.
    awaiting: Option<usize>,
}

impl FrameDecoder {
    pub fn new(prefix: TopicPrefix, max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            prefix,
            max_buffer,
            scanned: 0,
            awaiting: None,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `bytes` and decode every complete frame now available.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Decoded::default();
        if let Some(needed) = self.awaiting
            && self.buffer.len() < needed
        {
            return Ok(decoded);
        }
        self.awaiting = None;

        let mut pos = 0;
        let mut scan_from = self.scanned;
        self.scanned = 0;

        let result = loop {
            match self.step(&self.buffer[pos..], scan_from) {
                Ok(Step::Frame { update, consumed }) => {
                    pos += consumed;
                    scan_from = 0;
                    decoded.updates.push(update);
                }
                Ok(Step::Malformed { consumed }) => {
                    tracing::warn!(
                        line = %escape_bytes(&self.buffer[pos..pos + consumed]),
                        "Discarding malformed line"
                    );
                    pos += consumed;
                    scan_from = 0;
                    decoded.malformed += 1;
                }
                Ok(Step::NeedMore { awaiting }) => {
                    // a trailing '\r' may still pair with the next '\n'
                    if awaiting.is_none() {
                        self.scanned = (self.buffer.len() - pos).saturating_sub(1);
                    }
                    self.awaiting = awaiting;
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.buffer.drain(..pos);
        result?;

        if self.buffer.len() > self.max_buffer {
            return Err(DecodeError::BufferOverflow {
                needed: self.buffer.len(),
                limit: self.max_buffer,
            });
        }

        Ok(decoded)
    }

    fn step(&self, buf: &[u8], scan_from: usize) -> Result<Step, DecodeError> {
        let scan_from = scan_from.min(buf.len());
        let Some(rn) = find(&buf[scan_from..], CRLF).map(|i| i + scan_from) else {
            return Ok(Step::NeedMore { awaiting: None });
        };
        let line_end = rn + CRLF.len();

        let Some(eq1) = buf[..rn].iter().position(|&b| b == b'=') else {
            return Ok(Step::Malformed { consumed: line_end });
        };

        let retained = buf[0] != LIVE_MARKER;

        if let Some(offset) = find(&buf[eq1 + 1..rn], STRING_MARKER)
            && eq1 > 0
        {
            let eq2 = eq1 + 1 + offset;
            let Some(len) = parse_length(&buf[eq1 + 1..eq2]) else {
                return Ok(Step::Malformed { consumed: line_end });
            };

            let needed = eq2
                .checked_add(len)
                .and_then(|n| n.checked_add(STRING_MARKER.len() + CRLF.len()))
                .unwrap_or(usize::MAX);
            if needed > self.max_buffer {
                return Err(DecodeError::BufferOverflow {
                    needed,
                    limit: self.max_buffer,
                });
            }
            if buf.len() < needed {
                return Ok(Step::NeedMore {
                    awaiting: Some(needed),
                });
            }

            let start = eq2 + STRING_MARKER.len();
            let payload = &buf[start..start + len];
            return Ok(match self.update(&buf[1..eq1], payload, retained) {
                Some(update) => Step::Frame {
                    update,
                    consumed: needed,
                },
                None => Step::Malformed { consumed: needed },
            });
        }

        if eq1 > 1 {
            let payload = &buf[eq1 + 1..rn];
            return Ok(match self.update(&buf[1..eq1], payload, retained) {
                Some(update) => Step::Frame {
                    update,
                    consumed: line_end,
                },
                None => Step::Malformed { consumed: line_end },
            });
        }

        Ok(Step::Malformed { consumed: line_end })
    }

    fn update(&self, name: &[u8], payload: &[u8], retained: bool) -> Option<Update> {
        let name = std::str::from_utf8(name).ok()?;
        Some(Update::new(
            self.prefix.topic(name),
            Value::from_payload(payload),
            retained,
        ))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
