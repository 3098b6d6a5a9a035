//! Low-level I/O: where load bytes come from and how chunks go out.
//!
//! A load session needs the whole stream addressable at once, so input is either
//! a memory-mapped file or an owned buffer behind [`DataSource`]. Output goes
//! through [`ChunkWriter`], which tracks the running offset so callers can report
//! where each chunk landed.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::chunk::ChunkHeader;
use crate::error::Result;
use crate::format::{FileHeader, Platform};

/// Backing storage for a stream being loaded.
#[derive(Debug)]
pub enum DataSource {
    /// A read-only memory map of a file.
    Mapped(Mmap),
    /// An owned in-memory buffer.
    Memory(Vec<u8>),
}

impl DataSource {
    /// Maps a file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::Memory(Vec::new()));
        }
        // Safety: the map is read-only and owned by the session. Concurrent external
        // modification of the file is outside what the loader can defend against.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::Mapped(mmap))
    }

    /// The stream bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Memory(v) => v,
        }
    }
}

/// A sequential writer that emits file and chunk headers for one platform.
#[derive(Debug)]
pub struct ChunkWriter<W: Write> {
    writer: W,
    platform: Platform,
    current_offset: u64,
    chunks_written: usize,
}

impl<W: Write> ChunkWriter<W> {
    /// Wraps an existing writer.
    pub fn new(writer: W, platform: Platform) -> Self {
        Self {
            writer,
            platform,
            current_offset: 0,
            chunks_written: 0,
        }
    }

    /// Writes the 12-byte file header. Returns the offset it started at.
    pub fn write_file_header(&mut self, header: &FileHeader) -> Result<u64> {
        let start = self.current_offset;
        let bytes = header.to_bytes()?;
        self.writer.write_all(&bytes)?;
        self.current_offset += bytes.len() as u64;
        Ok(start)
    }

    /// Writes one chunk. Returns the offset the chunk header started at.
    pub fn write_chunk(&mut self, header: &ChunkHeader, payload: &[u8]) -> Result<u64> {
        let start = self.current_offset;
        let written = header.write(payload, self.platform, &mut self.writer)?;
        self.current_offset += written as u64;
        self.chunks_written += 1;
        Ok(start)
    }

    /// Returns the current stream position.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Number of chunks written so far.
    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
