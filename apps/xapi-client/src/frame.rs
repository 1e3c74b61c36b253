//! JSON Message Framing
//!
//! The xAPI wire protocol carries one JSON object per message with no length
//! prefix and no delimiter, so message boundaries must be inferred from JSON
//! structure itself. [`DecodeBuffer`] accumulates bytes as they arrive off
//! the socket and extracts each complete value from the front of the buffer
//! as soon as one can be parsed.
//!
//! # Boundary detection
//!
//! Extraction is structural: a streaming deserialize of the buffer prefix
//! either yields a value (and the number of bytes it consumed), reports that
//! the input ended mid-value (read more and retry), or reports a genuine
//! syntax error (the connection is unrecoverable). Scanning for a separator
//! byte would be wrong here: braces and quotes nest freely inside values.
//!
//! Top-level messages are JSON objects per the wire contract, which keeps
//! extraction unambiguous: a bare top-level number would have no detectable
//! end without a delimiter.

use serde_json::Value;

/// Default cap on buffered-but-unparsed bytes (8 MiB).
///
/// A peer that streams bytes without ever completing a value fails with
/// [`FrameError::Overflow`] instead of growing the buffer without bound.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

/// Framing errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer prefix is invalid JSON (not merely incomplete).
    #[error("malformed JSON frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The peer sent more than the configured limit without completing a value.
    #[error("decode buffer exceeded {limit} bytes without a complete value")]
    Overflow {
        /// Configured buffer limit in bytes.
        limit: usize,
    },
}

/// Accumulator for bytes received but not yet resolved into a complete JSON
/// value.
///
/// Invariant: after each successful [`extract`](Self::extract), the buffer
/// holds exactly the unconsumed suffix of everything fed so far, with no
/// leading whitespace. One `DecodeBuffer` is owned exclusively by one
/// transport and never shared.
#[derive(Debug)]
pub struct DecodeBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeBuffer {
    /// Create a buffer with the default size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_BUFFERED_BYTES)
    }

    /// Create a buffer that holds at most `limit` unparsed bytes.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Append a chunk of received bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Overflow`] if the chunk would push the buffer
    /// past its limit.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        if self.buf.len() + chunk.len() > self.limit {
            return Err(FrameError::Overflow { limit: self.limit });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Try to extract one complete JSON value from the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffered prefix is not yet a complete
    /// value (the caller should read more bytes and retry). On success the
    /// consumed prefix and any whitespace that follows it are removed, so
    /// leftover bytes seed the next extraction.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if the prefix can never become
    /// valid JSON no matter how many bytes follow.
    pub fn extract(&mut self) -> Result<Option<Value>, FrameError> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();

        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buf.drain(..consumed);
                let whitespace = self
                    .buf
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .count();
                self.buf.drain(..whitespace);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(FrameError::Malformed(e)),
            None => Ok(None),
        }
    }

    /// Number of buffered, unparsed bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
