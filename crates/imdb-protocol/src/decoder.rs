//! Inbound line decoder
//!
//! The transport hands over arbitrary byte chunks; line boundaries do not
//! line up with chunk boundaries. `LineDecoder` keeps the unterminated tail
//! of every chunk and prepends it to the next one, so a line split across
//! reads comes out exactly once.

use bytes::BytesMut;

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum length of a single unterminated line (1MB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Splits a byte stream into complete lines
pub struct LineDecoder {
    buffer: BytesMut,
    max_line_length: usize,
    closed: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line_length,
            closed: false,
        }
    }

    /// Add a chunk of inbound data
    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        if self.closed {
            return Err(ProtocolError::DecoderClosed);
        }

        // Only the unterminated tail counts against the limit
        let pending = match data.iter().rposition(|&b| b == b'\n') {
            Some(pos) => data.len() - pos - 1,
            None => self.partial_len() + data.len(),
        };
        if pending > self.max_line_length {
            return Err(ProtocolError::LineTooLong {
                size: pending,
                max: self.max_line_length,
            });
        }

        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Take the next complete line, if any.
    ///
    /// The delimiter (`\n` or `\r\n`) and trailing whitespace are stripped;
    /// blank lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let line_end = self.buffer.iter().position(|&b| b == b'\n')?;
            let raw = self.buffer.split_to(line_end + 1);
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }

    /// Lazily drain every complete line currently buffered
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { decoder: self }
    }

    /// Mark the end of the stream.
    ///
    /// Returns the unterminated tail, if there was one. Any later `feed`
    /// fails with [`ProtocolError::DecoderClosed`].
    pub fn finish(&mut self) -> Option<String> {
        self.closed = true;
        let rest = self.buffer.split();
        let tail = String::from_utf8_lossy(&rest);
        let tail = tail.trim();
        (!tail.is_empty()).then(|| tail.to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes held back waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn partial_len(&self) -> usize {
        match self.buffer.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.buffer.len() - pos - 1,
            None => self.buffer.len(),
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the complete lines of a [`LineDecoder`]
pub struct Lines<'a> {
    decoder: &'a mut LineDecoder,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.decoder.next_line()
    }
}
