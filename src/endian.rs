//! Byte-order primitives.
//!
//! Flips for 16/32/64-bit values and arrays of them, plus endian-dynamic
//! read/write helpers built on `byteorder` so the rest of the engine can decode a
//! value in the *file's* order and re-encode it in the *target's* order without
//! caring which one the host uses.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Byte order of a stream or of a target layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// Byte order of the running process.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Self::Little;
    /// Byte order of the running process.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Self::Big;

    /// The other byte order.
    pub fn flipped(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }

    /// Reads an unsigned integer of `width` (1, 2, 4 or 8) bytes.
    ///
    /// Returns `None` for unsupported widths or a short slice.
    pub fn read_uint(self, bytes: &[u8], width: usize) -> Option<u64> {
        if bytes.len() < width {
            return None;
        }
        let bytes = &bytes[..width];
        Some(match (width, self) {
            (1, _) => u64::from(bytes[0]),
            (2, Self::Little) => u64::from(LittleEndian::read_u16(bytes)),
            (2, Self::Big) => u64::from(BigEndian::read_u16(bytes)),
            (4, Self::Little) => u64::from(LittleEndian::read_u32(bytes)),
            (4, Self::Big) => u64::from(BigEndian::read_u32(bytes)),
            (8, Self::Little) => LittleEndian::read_u64(bytes),
            (8, Self::Big) => BigEndian::read_u64(bytes),
            _ => return None,
        })
    }

    /// Writes the low `width` bytes of `value`. Returns `false` when the width or
    /// destination is unusable.
    pub fn write_uint(self, bytes: &mut [u8], width: usize, value: u64) -> bool {
        if bytes.len() < width {
            return false;
        }
        let bytes = &mut bytes[..width];
        match (width, self) {
            (1, _) => bytes[0] = value as u8,
            (2, Self::Little) => LittleEndian::write_u16(bytes, value as u16),
            (2, Self::Big) => BigEndian::write_u16(bytes, value as u16),
            (4, Self::Little) => LittleEndian::write_u32(bytes, value as u32),
            (4, Self::Big) => BigEndian::write_u32(bytes, value as u32),
            (8, Self::Little) => LittleEndian::write_u64(bytes, value),
            (8, Self::Big) => BigEndian::write_u64(bytes, value),
            _ => return false,
        }
        true
    }

    /// Reads a `u16` from a stream.
    pub fn read_u16<R: Read + ?Sized>(self, r: &mut R) -> io::Result<u16> {
        match self {
            Self::Little => r.read_u16::<LittleEndian>(),
            Self::Big => r.read_u16::<BigEndian>(),
        }
    }

    /// Reads a `u32` from a stream.
    pub fn read_u32<R: Read + ?Sized>(self, r: &mut R) -> io::Result<u32> {
        match self {
            Self::Little => r.read_u32::<LittleEndian>(),
            Self::Big => r.read_u32::<BigEndian>(),
        }
    }

    /// Reads a `u64` from a stream.
    pub fn read_u64<R: Read + ?Sized>(self, r: &mut R) -> io::Result<u64> {
        match self {
            Self::Little => r.read_u64::<LittleEndian>(),
            Self::Big => r.read_u64::<BigEndian>(),
        }
    }

    /// Writes a `u16` to a stream.
    pub fn write_u16<W: Write + ?Sized>(self, w: &mut W, v: u16) -> io::Result<()> {
        match self {
            Self::Little => w.write_u16::<LittleEndian>(v),
            Self::Big => w.write_u16::<BigEndian>(v),
        }
    }

    /// Writes a `u32` to a stream.
    pub fn write_u32<W: Write + ?Sized>(self, w: &mut W, v: u32) -> io::Result<()> {
        match self {
            Self::Little => w.write_u32::<LittleEndian>(v),
            Self::Big => w.write_u32::<BigEndian>(v),
        }
    }

    /// Writes a `u64` to a stream.
    pub fn write_u64<W: Write + ?Sized>(self, w: &mut W, v: u64) -> io::Result<()> {
        match self {
            Self::Little => w.write_u64::<LittleEndian>(v),
            Self::Big => w.write_u64::<BigEndian>(v),
        }
    }
}

/// Flips a 16-bit value.
#[inline]
pub fn swap16(v: u16) -> u16 {
    v.swap_bytes()
}

/// Flips a 32-bit value.
#[inline]
pub fn swap32(v: u32) -> u32 {
    v.swap_bytes()
}

/// Flips a 64-bit value.
#[inline]
pub fn swap64(v: u64) -> u64 {
    v.swap_bytes()
}

/// Flips every element of a 16-bit array in place.
pub fn swap16_array(values: &mut [u16]) {
    values.iter_mut().for_each(|v| *v = v.swap_bytes());
}

/// Flips every element of a 32-bit array in place.
pub fn swap32_array(values: &mut [u32]) {
    values.iter_mut().for_each(|v| *v = v.swap_bytes());
}

/// Flips every element of a 64-bit array in place.
pub fn swap64_array(values: &mut [u64]) {
    values.iter_mut().for_each(|v| *v = v.swap_bytes());
}

/// Flips a packed byte buffer made of `width`-byte elements in place.
///
/// Widths of 0 or 1 and any trailing partial element are left untouched.
pub fn swap_in_place(bytes: &mut [u8], width: usize) {
    if width < 2 {
        return;
    }
    for element in bytes.chunks_exact_mut(width) {
        element.reverse();
    }
}
