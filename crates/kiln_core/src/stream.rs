//! Binary memory streams.
//!
//! Every serialized Kiln format (world snapshots, controllers, module
//! state) is a flat little-endian byte sequence of plain-old-data values
//! and null-terminated strings. [`OutputMemoryStream`] appends, and
//! [`InputMemoryStream`] reads back with bounds checking.

use bytemuck::{AnyBitPattern, NoUninit};

use crate::errors::{KilnError, Result};

/// Growable byte buffer that values are appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputMemoryStream {
    data: Vec<u8>,
}

impl OutputMemoryStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn write<T: NoUninit>(&mut self, value: &T) {
        self.data.extend_from_slice(bytemuck::bytes_of(value));
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_slice<T: NoUninit>(&mut self, values: &[T]) {
        self.data.extend_from_slice(bytemuck::cast_slice(values));
    }

    /// Writes a `u32` element count followed by the raw elements.
    pub fn write_array<T: NoUninit>(&mut self, values: &[T]) {
        self.write(&(values.len() as u32));
        self.write_slice(values);
    }

    /// Writes the string followed by a terminating zero byte.
    pub fn write_string(&mut self, value: &str) {
        debug_assert!(!value.as_bytes().contains(&0), "embedded nul in serialized string");
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Swaps the backing buffer with `other`, used to recycle allocations.
    pub fn swap_buffer(&mut self, other: &mut Vec<u8>) {
        std::mem::swap(&mut self.data, other);
    }
}

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct InputMemoryStream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> InputMemoryStream<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn eof(&self, needed: usize) -> KilnError {
        KilnError::UnexpectedEof {
            needed,
            offset: self.pos,
            available: self.remaining(),
        }
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(self.eof(count));
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    pub fn read<T: AnyBitPattern>(&mut self) -> Result<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read::<u8>()? != 0)
    }

    /// Reads `count` consecutive elements.
    pub fn read_vec<T: AnyBitPattern>(&mut self, count: usize) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or_else(|| self.eof(usize::MAX))?;
        let bytes = self.read_bytes(size)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>().max(1))
            .take(count)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Counterpart of [`OutputMemoryStream::write_array`].
    pub fn read_array<T: AnyBitPattern>(&mut self) -> Result<Vec<T>> {
        let count = self.read::<u32>()? as usize;
        self.read_vec(count)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(KilnError::UnterminatedString(self.pos));
        };
        let value = std::str::from_utf8(&rest[..len])?.to_owned();
        self.pos += len + 1;
        Ok(value)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.read_bytes(count).map(|_| ())
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}
