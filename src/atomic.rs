//! The atomic type table and element-wise numeric casting.
//!
//! Atomic types are the fixed set of primitive scalars a schema can name without
//! declaring a struct. Each entry has a byte size and a precomputed name hash;
//! schema members are mapped onto this table by hash.
//!
//! Casting decodes every source element into an `f64` and re-encodes it into the
//! destination type with Rust's numeric `as` conversions (saturating, not
//! bit-reinterpreting). The `f64` intermediate is exact for every type up to 32
//! bits wide; 64-bit integers beyond 2^53 lose precision and 64-bit integer to
//! 32-bit float is lossy by construction. There is no integer-only path.

use std::sync::LazyLock;

use crate::endian::Endian;
use crate::error::{DriftError, Result};
use crate::hash::hash_str;

/// One of the primitive scalar types known to every schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    /// Signed 8-bit character.
    Char,
    /// Unsigned 8-bit character.
    UChar,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Schema `long`: 32 bits on every platform the format targets.
    Long,
    /// Schema `ulong`: 32 bits.
    ULong,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// Build-configurable float alias (`f32`, or `f64` with the `scalar-f64` feature).
    Scalar,
    /// No value. Only meaningful behind a pointer.
    Void,
}

/// Every atomic type, in table order.
pub const ATOMIC_TYPES: [AtomicType; 14] = [
    AtomicType::Char,
    AtomicType::UChar,
    AtomicType::Short,
    AtomicType::UShort,
    AtomicType::Int,
    AtomicType::UInt,
    AtomicType::Long,
    AtomicType::ULong,
    AtomicType::Float,
    AtomicType::Double,
    AtomicType::Int64,
    AtomicType::UInt64,
    AtomicType::Scalar,
    AtomicType::Void,
];

static NAME_HASHES: LazyLock<[u64; 14]> =
    LazyLock::new(|| ATOMIC_TYPES.map(|t| hash_str(t.name())));

#[cfg(feature = "scalar-f64")]
const SCALAR_SIZE: usize = 8;
#[cfg(not(feature = "scalar-f64"))]
const SCALAR_SIZE: usize = 4;

impl AtomicType {
    /// The type name as it appears in a schema blob.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Long => "long",
            Self::ULong => "ulong",
            Self::Float => "float",
            Self::Double => "double",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Scalar => "scalar_t",
            Self::Void => "void",
        }
    }

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Long | Self::ULong | Self::Float => 4,
            Self::Double | Self::Int64 | Self::UInt64 => 8,
            Self::Scalar => SCALAR_SIZE,
            Self::Void => 0,
        }
    }

    /// Position in [`ATOMIC_TYPES`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Precomputed hash of [`Self::name`].
    pub fn name_hash(self) -> u64 {
        NAME_HASHES[self.index()]
    }

    /// Looks a type up by its name hash.
    pub fn from_hash(hash: u64) -> Option<Self> {
        NAME_HASHES
            .iter()
            .position(|h| *h == hash)
            .map(|i| ATOMIC_TYPES[i])
    }

    /// Looks a type up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_hash(hash_str(name))
    }

    /// True for every type with a numeric value (everything except `void`).
    pub fn is_numeric(self) -> bool {
        self != Self::Void
    }

    /// True for the one-byte character types.
    pub fn is_char(self) -> bool {
        matches!(self, Self::Char | Self::UChar)
    }

    fn decode(self, bytes: &[u8], order: Endian) -> Option<f64> {
        let raw = order.read_uint(bytes, self.size())?;
        Some(match self {
            Self::Char => f64::from(raw as u8 as i8),
            Self::UChar => f64::from(raw as u8),
            Self::Short => f64::from(raw as u16 as i16),
            Self::UShort => f64::from(raw as u16),
            Self::Int | Self::Long => f64::from(raw as u32 as i32),
            Self::UInt | Self::ULong => f64::from(raw as u32),
            Self::Float => f64::from(f32::from_bits(raw as u32)),
            Self::Double => f64::from_bits(raw),
            Self::Int64 => raw as i64 as f64,
            Self::UInt64 => raw as f64,
            Self::Scalar if SCALAR_SIZE == 8 => f64::from_bits(raw),
            Self::Scalar => f64::from(f32::from_bits(raw as u32)),
            Self::Void => return None,
        })
    }

    fn encode(self, value: f64, out: &mut [u8], order: Endian) -> bool {
        let raw = match self {
            Self::Char => u64::from(value as i8 as u8),
            Self::UChar => u64::from(value as u8),
            Self::Short => u64::from(value as i16 as u16),
            Self::UShort => u64::from(value as u16),
            Self::Int | Self::Long => u64::from(value as i32 as u32),
            Self::UInt | Self::ULong => u64::from(value as u32),
            Self::Float => u64::from((value as f32).to_bits()),
            Self::Double => value.to_bits(),
            Self::Int64 => value as i64 as u64,
            Self::UInt64 => value as u64,
            Self::Scalar if SCALAR_SIZE == 8 => value.to_bits(),
            Self::Scalar => u64::from((value as f32).to_bits()),
            Self::Void => return false,
        };
        order.write_uint(out, self.size(), raw)
    }
}

/// True when both hashes name a numeric atomic type.
pub fn can_cast(src: u64, dst: u64) -> bool {
    matches!(
        (AtomicType::from_hash(src), AtomicType::from_hash(dst)),
        (Some(a), Some(b)) if a.is_numeric() && b.is_numeric()
    )
}

/// Casts `length` elements of `src_type` into `dst_type`, both in native byte order.
pub fn cast(
    src: &[u8],
    dst: &mut [u8],
    src_type: AtomicType,
    dst_type: AtomicType,
    length: usize,
) -> Result<()> {
    cast_ordered(src, Endian::NATIVE, dst, Endian::NATIVE, src_type, dst_type, length)
}

/// Casts `length` elements, decoding in `src_order` and encoding in `dst_order`.
///
/// A pure byte-order conversion is the special case `src_type == dst_type`.
pub fn cast_ordered(
    src: &[u8],
    src_order: Endian,
    dst: &mut [u8],
    dst_order: Endian,
    src_type: AtomicType,
    dst_type: AtomicType,
    length: usize,
) -> Result<()> {
    if !(src_type.is_numeric() && dst_type.is_numeric()) {
        return Err(DriftError::Internal(format!(
            "cannot cast {} to {}",
            src_type.name(),
            dst_type.name()
        )));
    }
    let (ss, ds) = (src_type.size(), dst_type.size());
    if src.len() < ss * length || dst.len() < ds * length {
        return Err(DriftError::Internal(format!(
            "cast of {length} x {} -> {} overruns its buffers ({} / {} bytes)",
            src_type.name(),
            dst_type.name(),
            src.len(),
            dst.len()
        )));
    }

    for (s, d) in src.chunks_exact(ss).zip(dst.chunks_exact_mut(ds)).take(length) {
        let value = src_type
            .decode(s, src_order)
            .ok_or_else(|| DriftError::Internal("atomic decode failed".into()))?;
        if !dst_type.encode(value, d, dst_order) {
            return Err(DriftError::Internal("atomic encode failed".into()));
        }
    }
    Ok(())
}
