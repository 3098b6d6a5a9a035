//! The capability interface between the engine and the application that owns
//! the objects.
//!
//! The engine never interprets objects itself. It asks the application for its
//! current schema blob, tells it when each object has been relinked, and at save
//! time hands it an [`ObjectWriter`] to emit its live objects as chunks.

use std::collections::HashSet;

use crate::atomic::AtomicType;
use crate::chunk::{ChunkHeader, ChunkStatus};
use crate::error::{DriftError, Result};
use crate::format::{ChunkCode, SIGNATURE_LEN};
use crate::io::ChunkWriter;
use crate::schema::{SchemaGraph, Struct};

/// What an application provides to the engine.
pub trait Application {
    /// Seven-byte signature written into and checked against every file header.
    fn signature(&self) -> [u8; SIGNATURE_LEN];

    /// Version written into the file header, 0..=999.
    fn version(&self) -> u16 {
        0
    }

    /// The current schema blob, encoded for the platform objects are loaded into
    /// or saved from.
    fn schema_blob(&self) -> &[u8];

    /// Called once per object after the whole graph has been relinked.
    fn object_linked(&mut self, _object: &LinkedObject<'_>) {}

    /// Emits every live object. The default writes nothing.
    fn write_objects(&self, _writer: &mut ObjectWriter<'_>) -> Result<()> {
        Ok(())
    }
}

/// A relinked object as the application sees it.
#[derive(Debug, Clone, Copy)]
pub struct LinkedObject<'a> {
    /// Chunk code the object was saved under.
    pub code: ChunkCode,
    /// Address the object had in the writing process.
    pub file_address: u64,
    /// Address relinked pointers use for this object.
    pub load_address: u64,
    /// Type name in the current schema; the atomic type name for raw payloads.
    pub type_name: &'a str,
    /// Number of struct instances.
    pub count: u32,
    /// Current-layout bytes.
    pub data: &'a [u8],
    /// Current-schema struct, `None` for raw payloads.
    pub structure: Option<&'a Struct>,
}

/// Emits objects as chunks during a save.
///
/// Struct chunks are resolved by type name in the current schema, and their
/// payload must be exactly `count` instances long.
#[derive(Debug)]
pub struct ObjectWriter<'a> {
    chunks: &'a mut ChunkWriter<Vec<u8>>,
    schema: &'a SchemaGraph,
    addresses: HashSet<u64>,
}

impl<'a> ObjectWriter<'a> {
    pub(crate) fn new(chunks: &'a mut ChunkWriter<Vec<u8>>, schema: &'a SchemaGraph) -> Self {
        Self {
            chunks,
            schema,
            addresses: HashSet::new(),
        }
    }

    /// The schema objects are written against.
    pub fn schema(&self) -> &SchemaGraph {
        self.schema
    }

    fn claim(&mut self, code: ChunkCode, address: u64) -> Result<()> {
        if code.is_reserved() || !code.is_valid() {
            return Err(DriftError::Internal(format!(
                "chunk code {code} cannot carry objects"
            )));
        }
        if address == 0 {
            return Err(DriftError::Internal(
                "address 0 is the null address and cannot name an object".into(),
            ));
        }
        if !self.addresses.insert(address) {
            return Err(DriftError::DuplicateAddress(address));
        }
        Ok(())
    }

    /// Writes `count` instances of the struct named `type_name`.
    pub fn write_struct(
        &mut self,
        code: ChunkCode,
        type_name: &str,
        address: u64,
        count: u32,
        bytes: &[u8],
    ) -> Result<()> {
        let s = self
            .schema
            .find_struct(type_name)
            .filter(|s| !s.is_atomic())
            .ok_or_else(|| DriftError::Schema(format!("struct {type_name} is not in the schema")))?;
        if bytes.len() as u64 != u64::from(count) * u64::from(s.size) {
            return Err(DriftError::Chunk {
                status: ChunkStatus::InvalidLength,
                offset: self.chunks.current_offset(),
            });
        }
        let length = u32::try_from(bytes.len()).map_err(|_| DriftError::Chunk {
            status: ChunkStatus::InvalidLength,
            offset: self.chunks.current_offset(),
        })?;
        self.claim(code, address)?;
        let header = ChunkHeader::new(code, length, address, s.id.as_u32(), count);
        self.chunks.write_chunk(&header, bytes)?;
        Ok(())
    }

    /// Writes a raw payload of `atomic` elements, loaded back verbatim.
    pub fn write_raw(
        &mut self,
        code: ChunkCode,
        address: u64,
        atomic: AtomicType,
        bytes: &[u8],
    ) -> Result<()> {
        let s = self
            .schema
            .find_struct_by_hash(atomic.name_hash())
            .filter(|s| s.is_atomic())
            .ok_or_else(|| {
                DriftError::Schema(format!(
                    "no raw record for {} in the schema",
                    atomic.name()
                ))
            })?;
        let length = u32::try_from(bytes.len()).map_err(|_| DriftError::Chunk {
            status: ChunkStatus::InvalidLength,
            offset: self.chunks.current_offset(),
        })?;
        self.claim(code, address)?;
        let header = ChunkHeader::new(code, length, address, s.id.as_u32(), 1);
        self.chunks.write_chunk(&header, bytes)?;
        Ok(())
    }

    /// Chunks written so far, including the file's own bookkeeping chunks.
    pub fn chunks_written(&self) -> usize {
        self.chunks.chunks_written()
    }
}
