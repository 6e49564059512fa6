//! Bounded byte container with a read/write cursor
//!
//! Invariant: `position <= length <= maximum_size`. Reads consume from
//! `position` up to `length`; writes advance `position` and may grow
//! `length` up to `maximum_size`.

use thiserror::Error;

use crate::status::Status;

/// Access past `length` (read) or `maximum_size` (write), or an invalid
/// position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer access out of bounds")]
pub struct OutOfBounds;

impl From<OutOfBounds> for Status {
    fn from(_: OutOfBounds) -> Status {
        Status::EncodingError
    }
}

/// Owned byte buffer used by every encoder and decoder
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    position: u32,
    length: u32,
}

impl Buffer {
    /// Create an empty buffer able to hold `maximum_size` bytes
    pub fn new(maximum_size: u32) -> Self {
        Self {
            data: vec![0; maximum_size as usize],
            position: 0,
            length: 0,
        }
    }

    /// Create a buffer holding `bytes`, positioned at the start, ready to
    /// be decoded
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            position: 0,
            length: bytes.len() as u32,
        }
    }

    /// Current cursor
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Number of valid bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Total capacity
    pub fn maximum_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Bytes left to read
    pub fn remaining(&self) -> u32 {
        self.length - self.position
    }

    /// Move the cursor; requires `p <= length`
    pub fn set_position(&mut self, p: u32) -> Result<(), OutOfBounds> {
        if p > self.length {
            return Err(OutOfBounds);
        }
        self.position = p;
        Ok(())
    }

    /// Shrink the valid region; requires `l <= maximum_size`. The cursor is
    /// clamped to the new length.
    pub fn set_length(&mut self, l: u32) -> Result<(), OutOfBounds> {
        if l as usize > self.data.len() {
            return Err(OutOfBounds);
        }
        self.length = l;
        if self.position > l {
            self.position = l;
        }
        Ok(())
    }

    /// Forget all content. Idempotent.
    pub fn reset(&mut self) {
        self.position = 0;
        self.length = 0;
    }

    /// Append `bytes` at the cursor; requires `position + n <= maximum_size`
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), OutOfBounds> {
        let n = bytes.len();
        let end = self.position as usize + n;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }
        self.data[self.position as usize..end].copy_from_slice(bytes);
        self.position = end as u32;
        if self.length < self.position {
            self.length = self.position;
        }
        Ok(())
    }

    /// Copy `out.len()` bytes from the cursor; requires
    /// `position + n <= length`
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), OutOfBounds> {
        let n = out.len();
        let end = self.position as usize + n;
        if end > self.length as usize {
            return Err(OutOfBounds);
        }
        out.copy_from_slice(&self.data[self.position as usize..end]);
        self.position = end as u32;
        Ok(())
    }

    /// Read exactly `N` bytes as a fixed array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], OutOfBounds> {
        let mut out = [0u8; N];
        self.read(&mut out)?;
        Ok(out)
    }

    /// Valid content as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }

    /// Mutable access to the valid content, for in-place decryption
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.length as usize]
    }
}
