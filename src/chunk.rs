//! The chunk protocol: fixed-layout `(header, payload)` records.
//!
//! Readers never abort on a malformed header. They report what they found in a
//! [`ChunkStatus`] and leave the decision to continue to the caller; only genuine
//! stream failures come back as `Err`.

use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::Serialize;

use crate::error::Result;
use crate::format::{AddressWidth, ChunkCode, HeaderFlags, MAX_CHUNK_ARRAY_LENGTH, Platform};

/// Size of the narrow scan-only header: `{code, length}`.
pub const SCAN_HEADER_SIZE: usize = 8;

/// Outcome of validating one chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChunkStatus {
    /// Header is well formed.
    Ok,
    /// Length or count out of bounds.
    InvalidLength,
    /// Stream ended inside the header.
    InvalidRead,
    /// Code contains bytes outside `[A-Za-z0-9_ ]`.
    CodeError,
}

/// A chunk header normalized to a width-independent form.
///
/// The address is always held as a `u64` whatever width the stream used, so a
/// header read from a 32-bit file and one read from a 64-bit file compare equal
/// when they describe the same chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk code.
    pub code: ChunkCode,
    /// Payload size in bytes.
    pub length: u32,
    /// Address the payload had in the writing process.
    pub address: u64,
    /// Index into the writing schema's struct table.
    pub struct_id: u32,
    /// Number of repeated records in the payload.
    pub count: u32,
}

/// Result of a scan or read.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRead {
    /// The header as decoded. Meaningful only when `status` is [`ChunkStatus::Ok`].
    pub header: ChunkHeader,
    /// Bytes consumed from the stream.
    pub consumed: usize,
    /// Validation outcome.
    pub status: ChunkStatus,
}

impl ChunkHeader {
    /// Builds a header for a payload of `length` bytes.
    pub fn new(code: ChunkCode, length: u32, address: u64, struct_id: u32, count: u32) -> Self {
        Self {
            code,
            length,
            address,
            struct_id,
            count,
        }
    }

    /// Writes header and payload for `platform`. Returns bytes written.
    pub fn write<W: Write + ?Sized>(
        &self,
        payload: &[u8],
        platform: Platform,
        w: &mut W,
    ) -> Result<usize> {
        let order = platform.endian;
        w.write_all(&self.code.0)?;
        order.write_u32(w, self.length)?;
        match platform.address_width {
            AddressWidth::Four => order.write_u32(w, self.address as u32)?,
            AddressWidth::Eight => order.write_u64(w, self.address)?,
        }
        order.write_u32(w, self.struct_id)?;
        order.write_u32(w, self.count)?;
        w.write_all(payload)?;
        Ok(platform.address_width.chunk_header_size() + payload.len())
    }

    /// Peeks `{code, length}` and positions the stream past the full header.
    ///
    /// Used to walk a stream without decoding payloads. Only the code and length
    /// are validated; the returned header has zero address, struct id and count.
    pub fn scan<R: Read + Seek + ?Sized>(
        r: &mut R,
        flags: &HeaderFlags,
        total_size: u64,
    ) -> Result<ChunkRead> {
        let mut narrow = [0u8; SCAN_HEADER_SIZE];
        if !read_full(r, &mut narrow)? {
            return Ok(ChunkRead::short(SCAN_HEADER_SIZE));
        }
        let code = ChunkCode([narrow[0], narrow[1], narrow[2], narrow[3]]);
        let length = flags.file_endian.read_u32(&mut &narrow[4..8])?;

        let rest = (flags.chunk_width.chunk_header_size() - SCAN_HEADER_SIZE) as i64;
        r.seek(SeekFrom::Current(rest))?;

        let header = Self::new(code, length, 0, 0, 0);
        let status = if !code.is_valid() {
            ChunkStatus::CodeError
        } else if u64::from(length) > total_size {
            ChunkStatus::InvalidLength
        } else {
            ChunkStatus::Ok
        };
        Ok(ChunkRead {
            header,
            consumed: flags.chunk_width.chunk_header_size(),
            status,
        })
    }

    /// Reads and validates a full header, whatever address width the stream uses.
    pub fn read<R: Read + ?Sized>(
        r: &mut R,
        flags: &HeaderFlags,
        total_size: u64,
    ) -> Result<ChunkRead> {
        let size = flags.chunk_width.chunk_header_size();
        let mut raw = [0u8; 24];
        if !read_full(r, &mut raw[..size])? {
            return Ok(ChunkRead::short(size));
        }

        let order = flags.file_endian;
        let mut cursor = &raw[4..size];
        let length = order.read_u32(&mut cursor)?;
        let address = match flags.chunk_width {
            AddressWidth::Four => u64::from(order.read_u32(&mut cursor)?),
            AddressWidth::Eight => order.read_u64(&mut cursor)?,
        };
        let struct_id = order.read_u32(&mut cursor)?;
        let count = order.read_u32(&mut cursor)?;

        let header = Self::new(
            ChunkCode([raw[0], raw[1], raw[2], raw[3]]),
            length,
            address,
            struct_id,
            count,
        );
        Ok(ChunkRead {
            header,
            consumed: size,
            status: header.validate(total_size),
        })
    }

    /// Applies the header rules in order: code, length, count, `count * length`.
    pub fn validate(&self, total_size: u64) -> ChunkStatus {
        if !self.code.is_valid() {
            return ChunkStatus::CodeError;
        }
        if u64::from(self.length) > total_size {
            return ChunkStatus::InvalidLength;
        }
        if self.count < 1 || self.count > MAX_CHUNK_ARRAY_LENGTH {
            return ChunkStatus::InvalidLength;
        }
        if u64::from(self.count) * u64::from(self.length) > total_size {
            return ChunkStatus::InvalidLength;
        }
        ChunkStatus::Ok
    }
}

impl ChunkRead {
    fn short(consumed: usize) -> Self {
        Self {
            header: ChunkHeader::new(ChunkCode([0; 4]), 0, 0, 0, 0),
            consumed,
            status: ChunkStatus::InvalidRead,
        }
    }
}

/// Fills `buf` completely. Returns `false` on a clean or partial end of stream.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
