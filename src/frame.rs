// envnode - Environmental sensor node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bounds-checked frame writer
//!
//! Append-only cursor over a caller-provided byte slice. Every write is
//! checked against the remaining space before any byte is copied, so a
//! failed write leaves the frame exactly as it was.

use crate::error::EncodeError;

/// Append-only writer over a fixed destination
#[derive(Debug)]
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    /// Start writing at the beginning of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.pos
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// Space left in the destination
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Append one byte
    pub fn push(&mut self, byte: u8) -> Result<(), EncodeError> {
        self.extend(&[byte])
    }

    /// Append a byte sequence
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.reserve(bytes.len())?;
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Append a header byte followed by its value, all or nothing
    pub fn field(&mut self, header: u8, value: &[u8]) -> Result<(), EncodeError> {
        self.reserve(1 + value.len())?;
        self.buf[self.pos] = header;
        self.buf[self.pos + 1..self.pos + 1 + value.len()].copy_from_slice(value);
        self.pos += 1 + value.len();
        Ok(())
    }

    /// Written prefix of the destination
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// Finish writing and return the frame length
    pub fn finish(self) -> usize {
        self.pos
    }

    fn reserve(&self, n: usize) -> Result<(), EncodeError> {
        if n > self.remaining() {
            return Err(EncodeError::BufferTooSmall {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }
}
