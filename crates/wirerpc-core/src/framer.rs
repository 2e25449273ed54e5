//! Delimiter framing for byte streams.
//!
//! Transports hand over whatever arrived on the wire; [`MessageBuffer`]
//! holds the tail and yields complete messages in arrival order.

use bytes::{Buf, BytesMut};

/// Accumulates raw chunks and splits them on a fixed delimiter.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    /// Offset below which the tail is known to hold no delimiter
    scanned: usize,
}

impl MessageBuffer {
    /// Create a buffer splitting on `delimiter`.
    ///
    /// # Panics
    ///
    /// Panics if `delimiter` is empty. Configs are validated before a buffer
    /// is built, see [`crate::ProtocolConfig::validate`].
    pub fn new(delimiter: &str) -> Self {
        assert!(!delimiter.is_empty(), "delimiter must not be empty");
        Self {
            delimiter: delimiter.as_bytes().to_vec(),
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Append a raw chunk to the tail.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Append a chunk that is known to be one or more complete messages,
    /// terminating it when the sender left the final delimiter off. Used for
    /// transports that deliver whole bodies rather than a stream.
    pub fn push_message(&mut self, body: &[u8]) {
        self.buffer.extend_from_slice(body);
        if !body.is_empty() && !body.ends_with(&self.delimiter) {
            self.buffer.extend_from_slice(&self.delimiter);
        }
    }

    /// True when no complete message is waiting to be extracted.
    pub fn is_finished(&self) -> bool {
        self.find_delimiter().is_none()
    }

    /// Extract the next complete message, delimiter stripped. Returns `None`
    /// once [`is_finished`](Self::is_finished) is true.
    pub fn handle_data(&mut self) -> Option<String> {
        let Some(index) = self.find_delimiter() else {
            // A delimiter split across chunks starts in the last len - 1 bytes
            self.scanned = self.buffer.len().saturating_sub(self.delimiter.len() - 1);
            return None;
        };
        let message = self.buffer.split_to(index);
        self.buffer.advance(self.delimiter.len());
        self.scanned = 0;
        Some(String::from_utf8_lossy(&message).into_owned())
    }

    /// Discard everything buffered so far.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Bytes held that are not yet part of an extracted message.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn find_delimiter(&self) -> Option<usize> {
        let delimiter = self.delimiter.as_slice();
        if self.buffer.len() < self.scanned + delimiter.len() {
            return None;
        }
        self.buffer[self.scanned..]
            .windows(delimiter.len())
            .position(|window| window == delimiter)
            .map(|index| self.scanned + index)
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DELIMITER)
    }
}

impl Iterator for MessageBuffer {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.handle_data()
    }
}
