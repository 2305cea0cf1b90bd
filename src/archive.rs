//! Byte archives used to pack typed messages.
//!
//! An [`InArchive`] is the growable write side a channel appends to; once
//! flushed it is frozen into [`Bytes`] and shipped as-is. The receiver wraps
//! the same bytes in an [`OutArchive`] and pops values back in append order.
//!
//! Values are any [`bytemuck::Pod`] type, stored native-endian and
//! unaligned. Zero-sized types such as `()` occupy no bytes, which is how
//! gid-only messages are expressed.

use bytemuck::Pod;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::bsp_error::BspError;

/// Growable write buffer.
#[derive(Debug, Default, Clone)]
pub struct InArchive {
    buf: BytesMut,
}

impl InArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    /// Appends the raw bytes of `value`.
    #[inline]
    pub fn push<T: Pod>(&mut self, value: &T) {
        self.buf.put_slice(bytemuck::bytes_of(value));
    }

    #[inline]
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Number of bytes appended so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Hands the content out as immutable bytes and leaves `self` empty
    /// with a fresh allocation of `cap` bytes.
    pub fn take_and_reserve(&mut self, cap: usize) -> Bytes {
        std::mem::replace(&mut self.buf, BytesMut::with_capacity(cap)).freeze()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Read cursor over a received buffer.
#[derive(Debug, Default, Clone)]
pub struct OutArchive {
    buf: Bytes,
}

impl OutArchive {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Pops the next `T`.
    ///
    /// # Errors
    /// Returns [`BspError::ArchiveUnderflow`] if fewer than
    /// `size_of::<T>()` bytes remain; nothing is consumed in that case.
    #[inline]
    pub fn pop<T: Pod>(&mut self) -> Result<T, BspError> {
        let needed = std::mem::size_of::<T>();
        if self.buf.remaining() < needed {
            return Err(BspError::ArchiveUnderflow {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        let value = bytemuck::pod_read_unaligned(&self.buf[..needed]);
        self.buf.advance(needed);
        Ok(value)
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf
    }
}

impl From<Bytes> for OutArchive {
    fn from(buf: Bytes) -> Self {
        Self::new(buf)
    }
}
