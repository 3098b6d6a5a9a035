//! Defines the physical binary layout of Driftfile streams.
//!
//! # Layout
//! A stream is a 12-byte file header followed by a flat sequence of chunks:
//!
//! `[File Header] [Chunk] [Chunk] ... [DNA1 Chunk] [ENDB Chunk]`
//!
//! ## File Header
//! `signature(7) | address marker(1) | endian marker(1) | version(3 ASCII digits)`
//!
//! ## Chunk Anatomy
//! `code(4) | length(4) | address(4 or 8) | structId(4) | count(4) | payload(length)`
//!
//! The address field is as wide as the writing platform's pointers, so the
//! header is 20 bytes on 32-bit platforms and 24 bytes on 64-bit ones.

use serde::{Deserialize, Serialize};

use crate::endian::Endian;
use crate::error::{DriftError, Result};

/// Size of the file header.
pub const FILE_HEADER_SIZE: usize = 12;

/// Length of the application signature at the start of the file header.
pub const SIGNATURE_LEN: usize = 7;

/// Upper bound on a chunk's repeat count.
pub const MAX_CHUNK_ARRAY_LENGTH: u32 = 1 << 20;

/// Address-width marker for 4-byte addresses.
pub const MARKER_ADDRESS_4: u8 = b'_';
/// Address-width marker for 8-byte addresses.
pub const MARKER_ADDRESS_8: u8 = b'-';
/// Endian marker for big-endian streams.
pub const MARKER_BIG_ENDIAN: u8 = b'V';
/// Endian marker for little-endian streams.
pub const MARKER_LITTLE_ENDIAN: u8 = b'v';

/// Schema blob section tags.
pub mod tags {
    /// Blob root.
    pub const ROOT: [u8; 4] = *b"SDNA";
    /// Declarator strings.
    pub const NAMES: [u8; 4] = *b"NAME";
    /// Type name strings.
    pub const TYPES: [u8; 4] = *b"TYPE";
    /// Per-type byte sizes.
    pub const SIZES: [u8; 4] = *b"TLEN";
    /// Struct records.
    pub const STRUCTS: [u8; 4] = *b"STRC";
}

/// Width of a stored address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressWidth {
    /// 32-bit addresses.
    Four,
    /// 64-bit addresses.
    Eight,
}

impl AddressWidth {
    /// Address width of the running process.
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: Self = Self::Eight;
    /// Address width of the running process.
    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: Self = Self::Four;

    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Parses a width given in bytes.
    pub fn from_bytes(width: usize) -> Result<Self> {
        match width {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(DriftError::UnsupportedAddressWidth(other as u64)),
        }
    }

    /// Largest address representable at this width.
    pub const fn max_address(self) -> u64 {
        match self {
            Self::Four => u32::MAX as u64,
            Self::Eight => u64::MAX,
        }
    }

    /// Size of a full chunk header at this width.
    pub const fn chunk_header_size(self) -> usize {
        16 + self.bytes()
    }

    fn marker(self) -> u8 {
        match self {
            Self::Four => MARKER_ADDRESS_4,
            Self::Eight => MARKER_ADDRESS_8,
        }
    }
}

/// A memory layout: how wide addresses are and which byte order values use.
///
/// The loader produces objects in the layout of its configured platform, which
/// defaults to the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Width of stored addresses.
    pub address_width: AddressWidth,
    /// Byte order.
    pub endian: Endian,
}

impl Platform {
    /// The running process.
    pub const NATIVE: Self = Self {
        address_width: AddressWidth::NATIVE,
        endian: Endian::NATIVE,
    };

    /// Builds a platform from its parts.
    pub const fn new(address_width: AddressWidth, endian: Endian) -> Self {
        Self {
            address_width,
            endian,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::NATIVE
    }
}

/// The file header at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Application signature.
    pub signature: [u8; SIGNATURE_LEN],
    /// Layout of the platform that wrote the stream.
    pub platform: Platform,
    /// Application version, 0..=999.
    pub version: u16,
}

impl FileHeader {
    /// Serializes the header.
    pub fn to_bytes(&self) -> Result<[u8; FILE_HEADER_SIZE]> {
        if self.version > 999 {
            return Err(DriftError::Header(format!(
                "version {} does not fit in three digits",
                self.version
            )));
        }
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[..SIGNATURE_LEN].copy_from_slice(&self.signature);
        buf[7] = self.platform.address_width.marker();
        buf[8] = match self.platform.endian {
            Endian::Big => MARKER_BIG_ENDIAN,
            Endian::Little => MARKER_LITTLE_ENDIAN,
        };
        let digits = format!("{:03}", self.version);
        buf[9..12].copy_from_slice(digits.as_bytes());
        Ok(buf)
    }

    /// Parses a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(DriftError::Header("stream shorter than file header".into()));
        }
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[..SIGNATURE_LEN]);

        let address_width = match bytes[7] {
            MARKER_ADDRESS_4 => AddressWidth::Four,
            MARKER_ADDRESS_8 => AddressWidth::Eight,
            other => {
                return Err(DriftError::Header(format!(
                    "unknown address marker 0x{other:02x}"
                )));
            }
        };
        let endian = match bytes[8] {
            MARKER_BIG_ENDIAN => Endian::Big,
            MARKER_LITTLE_ENDIAN => Endian::Little,
            other => {
                return Err(DriftError::Header(format!(
                    "unknown endian marker 0x{other:02x}"
                )));
            }
        };

        let mut version = 0u16;
        for &d in &bytes[9..12] {
            if !d.is_ascii_digit() {
                return Err(DriftError::Header("version is not three ASCII digits".into()));
            }
            version = version * 10 + u16::from(d - b'0');
        }

        Ok(Self {
            signature,
            platform: Platform::new(address_width, endian),
            version,
        })
    }
}

/// Conversions a load session has to perform, derived from the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderFlags {
    /// File byte order differs from the target's.
    pub endian_swap: bool,
    /// File address width differs from the target's.
    pub address_width_mismatch: bool,
    /// Width of the address field in every chunk header of the stream.
    pub chunk_width: AddressWidth,
    /// Byte order of every integer in the stream.
    pub file_endian: Endian,
}

impl HeaderFlags {
    /// Compares the writing platform against the target platform.
    pub fn derive(file: Platform, target: Platform) -> Self {
        Self {
            endian_swap: file.endian != target.endian,
            address_width_mismatch: file.address_width != target.address_width,
            chunk_width: file.address_width,
            file_endian: file.endian,
        }
    }

    /// Flags for reading a stream written by `platform` on that same platform.
    pub fn native_to(platform: Platform) -> Self {
        Self::derive(platform, platform)
    }
}

/// A four-byte chunk code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkCode(pub [u8; 4]);

impl ChunkCode {
    /// Embedded schema chunk.
    pub const SCHEMA: Self = Self(*b"DNA1");
    /// End of stream.
    pub const END: Self = Self(*b"ENDB");
    /// Reserved no-op chunk, skipped by the loader.
    pub const TEST: Self = Self(*b"TEST");
    /// Conventional code for raw payloads.
    pub const DATA: Self = Self(*b"DATA");

    /// Builds a code from a 2 or 4 character string; two-letter codes are NUL padded.
    pub fn new(code: &str) -> Result<Self> {
        let b = code.as_bytes();
        let bytes = match b.len() {
            2 => [b[0], b[1], 0, 0],
            4 => [b[0], b[1], b[2], b[3]],
            _ => {
                return Err(DriftError::Internal(format!(
                    "chunk code {code:?} must be 2 or 4 characters"
                )));
            }
        };
        let code = Self(bytes);
        if !code.is_valid() {
            return Err(DriftError::Internal(format!(
                "chunk code {code:?} has characters outside [A-Za-z0-9_ ]"
            )));
        }
        Ok(code)
    }

    /// A code is 4 identifier-class bytes, or 2 followed by two NULs.
    pub fn is_valid(&self) -> bool {
        let [a, b, c, d] = self.0;
        let ident = |x: u8| x.is_ascii_alphanumeric() || x == b'_' || x == b' ';
        ident(a) && ident(b) && ((ident(c) && ident(d)) || (c == 0 && d == 0))
    }

    /// True for codes the loader consumes itself.
    pub fn is_reserved(&self) -> bool {
        *self == Self::SCHEMA || *self == Self::END || *self == Self::TEST
    }
}

impl std::fmt::Debug for ChunkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkCode({self})")
    }
}

impl std::fmt::Display for ChunkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in &self.0 {
            match b {
                0 => {}
                b if b.is_ascii_graphic() || b == b' ' => write!(f, "{}", b as char)?,
                b => write!(f, "\\x{b:02x}")?,
            }
        }
        Ok(())
    }
}
