//! Growable, cursor-addressed byte buffer.
//!
//! Requests are built body-first: the CIP payload is written, then each
//! enclosing layer (Unconnected Send, CPF, encapsulation header) is prepended
//! with [`ByteBuffer::prepend`] once the inner length is known.

use crate::error::{EipError, Result};
use crate::resource::Shared;
use parking_lot::Mutex;

/// Data buffer shared between a tag and an in-flight request
pub type SharedBuffer = Shared<Mutex<ByteBuffer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    cursor: usize,
    order: ByteOrder,
}

macro_rules! int_accessors {
    ($($ty:ty => $get:ident, $set:ident, $put:ident, $take:ident;)*) => {
        $(
            /// Reads a value at an absolute offset without moving the cursor
            pub fn $get(&self, offset: usize) -> Result<$ty> {
                const N: usize = std::mem::size_of::<$ty>();
                let bytes = self.slice_at(offset, N)?;
                let mut raw = [0u8; N];
                raw.copy_from_slice(bytes);
                Ok(match self.order {
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                })
            }

            /// Overwrites a value at an absolute offset; never grows the buffer
            pub fn $set(&mut self, offset: usize, value: $ty) -> Result<()> {
                const N: usize = std::mem::size_of::<$ty>();
                let raw = match self.order {
                    ByteOrder::Little => value.to_le_bytes(),
                    ByteOrder::Big => value.to_be_bytes(),
                };
                self.slice_at_mut(offset, N)?.copy_from_slice(&raw);
                Ok(())
            }

            /// Writes a value at the cursor and advances it, growing as needed
            pub fn $put(&mut self, value: $ty) {
                let raw = match self.order {
                    ByteOrder::Little => value.to_le_bytes(),
                    ByteOrder::Big => value.to_be_bytes(),
                };
                self.write_bytes(&raw);
            }

            /// Reads a value at the cursor and advances it
            pub fn $take(&mut self) -> Result<$ty> {
                let value = self.$get(self.cursor)?;
                self.cursor += std::mem::size_of::<$ty>();
                Ok(value)
            }
        )*
    };
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// A zero-filled buffer of `len` bytes with the cursor at the start
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0; len],
            ..Self::default()
        }
    }

    /// Wraps existing bytes; the cursor is placed at the end
    pub fn from_vec(data: Vec<u8>) -> Self {
        let cursor = data.len();
        Self {
            data,
            cursor,
            order: ByteOrder::Little,
        }
    }

    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor. Positions past the end are allowed; the next write
    /// zero-fills the gap.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Resizes to `len`, zero-filling new bytes and clamping the cursor
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.cursor = self.cursor.min(len);
    }

    /// Writes `bytes` at the cursor, overwriting or extending, and advances
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    /// Reads `len` bytes at the cursor and advances
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.cursor;
        self.slice_at(start, len)?;
        self.cursor += len;
        Ok(&self.data[start..start + len])
    }

    /// Opens `n` zero bytes at the front, shifting existing content right.
    /// The cursor moves to 0 so the gap can be filled in place.
    pub fn reserve_front(&mut self, n: usize) {
        if n == 0 {
            self.cursor = 0;
            return;
        }
        self.data.splice(0..0, std::iter::repeat(0u8).take(n));
        self.cursor = 0;
    }

    /// Inserts `header` before the current content. The cursor is left at
    /// the end of the buffer.
    pub fn prepend(&mut self, header: &[u8]) {
        self.reserve_front(header.len());
        self.data[..header.len()].copy_from_slice(header);
        self.cursor = self.data.len();
    }

    /// Pads with a zero byte if the length is odd (CIP word alignment)
    pub fn pad_to_even(&mut self) {
        self.cursor = self.data.len();
        if self.data.len() % 2 != 0 {
            self.put_u8(0);
        }
    }

    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(EipError::OutOfBounds {
            offset,
            size: len,
            len: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(EipError::OutOfBounds {
                offset,
                size: len,
                len: self.data.len(),
            });
        }
        Ok(&self.data[offset..end])
    }

    pub fn slice_at_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let data_len = self.data.len();
        let end = offset.checked_add(len).ok_or(EipError::OutOfBounds {
            offset,
            size: len,
            len: data_len,
        })?;
        if end > data_len {
            return Err(EipError::OutOfBounds {
                offset,
                size: len,
                len: data_len,
            });
        }
        Ok(&mut self.data[offset..end])
    }

    int_accessors! {
        u8 => get_u8, set_u8, put_u8, take_u8;
        i8 => get_i8, set_i8, put_i8, take_i8;
        u16 => get_u16, set_u16, put_u16, take_u16;
        i16 => get_i16, set_i16, put_i16, take_i16;
        u32 => get_u32, set_u32, put_u32, take_u32;
        i32 => get_i32, set_i32, put_i32, take_i32;
        u64 => get_u64, set_u64, put_u64, take_u64;
        i64 => get_i64, set_i64, put_i64, take_i64;
        f32 => get_f32, set_f32, put_f32, take_f32;
        f64 => get_f64, set_f64, put_f64, take_f64;
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
