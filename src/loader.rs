//! The object loader.
//!
//! A load is a strictly sequential pipeline driven by [`LoadStage`]:
//!
//! ```text
//! ReadHeader -> InitializeCurrentSchema -> PrescanForEmbeddedSchema
//!   -> ParseEmbeddedSchema -> SeekToDataStart -> StreamChunks
//!   -> RebuildObjectGraph -> Done
//! ```
//!
//! Any stage failure moves the loader to `Failed` with the error's status and
//! releases every object read so far.
//!
//! Stored addresses are only ever keys into the session's address table. Each
//! retained object gets a fresh *load address* from a session-scoped virtual
//! heap; relinked pointers hold load addresses, and [`Loader::resolve`] maps them
//! back to objects.

use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use crate::app::{Application, LinkedObject, ObjectWriter};
use crate::atomic::AtomicType;
use crate::chunk::{ChunkHeader, ChunkStatus};
use crate::compression::CompressorRegistry;
use crate::config::LoadOptions;
use crate::endian::swap_in_place;
use crate::error::{DriftError, Result, Status};
use crate::format::{AddressWidth, ChunkCode, FILE_HEADER_SIZE, FileHeader, HeaderFlags};
use crate::inspector::{SchemaComparison, hex_dump};
use crate::io::DataSource;
use crate::relink::Relinker;
use crate::schema::{SchemaGraph, Struct, StructId};

/// First address handed out by the virtual heap.
pub const HEAP_BASE: u64 = 0x10000;

/// Alignment of every load address.
pub const HEAP_ALIGN: u64 = 16;

/// Where a load currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStage {
    /// Nothing loaded yet.
    Idle,
    /// Parsing the 12-byte file header.
    ReadHeader,
    /// Compiling the application's current schema.
    InitializeCurrentSchema,
    /// Skipping chunks until the embedded schema is found.
    PrescanForEmbeddedSchema,
    /// Compiling the embedded schema.
    ParseEmbeddedSchema,
    /// Rewinding to the first chunk.
    SeekToDataStart,
    /// Ingesting every data chunk.
    StreamChunks,
    /// Casting members and relinking pointers.
    RebuildObjectGraph,
    /// The object graph is ready.
    Done,
    /// The load stopped; every object was released.
    Failed(Status),
}

/// Hands out load addresses.
///
/// Addresses start at [`HEAP_BASE`], are [`HEAP_ALIGN`]-aligned and must fit the
/// target address width.
#[derive(Debug, Clone)]
pub(crate) struct VirtualHeap {
    next: u64,
    width: AddressWidth,
}

impl VirtualHeap {
    pub(crate) fn new(width: AddressWidth) -> Self {
        Self {
            next: HEAP_BASE,
            width,
        }
    }

    pub(crate) fn alloc(&mut self, size: usize) -> Result<u64> {
        let addr = self.next;
        let end = addr
            .checked_add((size as u64).max(1))
            .and_then(|e| e.checked_add(HEAP_ALIGN - 1))
            .map(|e| e & !(HEAP_ALIGN - 1))
            .ok_or(DriftError::UnsupportedAddressWidth(addr))?;
        if end > self.width.max_address() {
            return Err(DriftError::UnsupportedAddressWidth(addr));
        }
        self.next = end;
        Ok(addr)
    }
}

/// A pointer array rebuilt at the target address width.
#[derive(Debug, Clone)]
pub struct AddressBlock {
    pub(crate) load_address: u64,
    pub(crate) source: usize,
    pub(crate) bytes: Vec<u8>,
}

impl AddressBlock {
    /// Load address of the block.
    pub fn load_address(&self) -> u64 {
        self.load_address
    }

    /// Target-width, target-order addresses.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One chunk retained by a load.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub(crate) header: ChunkHeader,
    pub(crate) file_bytes: Vec<u8>,
    pub(crate) data: Vec<u8>,
    pub(crate) file_struct: StructId,
    pub(crate) memory_struct: Option<StructId>,
    pub(crate) raw: Option<AtomicType>,
    pub(crate) load_address: u64,
    pub(crate) address_block: Option<usize>,
    pub(crate) linked: bool,
}

impl ObjectRecord {
    /// The chunk header as stored.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Chunk code.
    pub fn code(&self) -> ChunkCode {
        self.header.code
    }

    /// Address the object had in the writing process.
    pub fn file_address(&self) -> u64 {
        self.header.address
    }

    /// Address relinked pointers use for this object.
    pub fn load_address(&self) -> u64 {
        self.load_address
    }

    /// Number of instances.
    pub fn count(&self) -> u32 {
        self.header.count
    }

    /// Current-layout bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Struct in the embedded schema.
    pub fn file_struct(&self) -> StructId {
        self.file_struct
    }

    /// Struct in the current schema; `None` for raw payloads.
    pub fn memory_struct(&self) -> Option<StructId> {
        self.memory_struct
    }

    /// Element type of a raw payload.
    pub fn raw_type(&self) -> Option<AtomicType> {
        self.raw
    }

    /// True once the object went through the relink pass.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// True when this object was referenced as a pointer array and rebuilt.
    pub fn has_address_block(&self) -> bool {
        self.address_block.is_some()
    }
}

/// What a load address points at.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    /// A retained object.
    Object(&'a ObjectRecord),
    /// A rebuilt pointer array.
    AddressBlock(&'a AddressBlock),
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Object(usize),
    Block(usize),
}

/// A load session: both schemas, every retained object and the address tables.
///
/// ```rust,no_run
/// use driftfile::{Application, LoadOptions, Loader};
///
/// fn open(app: &mut impl Application) -> driftfile::Result<()> {
///     let mut loader = Loader::new(LoadOptions::default());
///     loader.load_file("scene.drift", app)?;
///     for object in loader.objects() {
///         println!("{} @0x{:x}", object.code(), object.load_address());
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Loader {
    options: LoadOptions,
    stage: LoadStage,
    file_header: Option<FileHeader>,
    flags: Option<HeaderFlags>,
    file_schema: Option<SchemaGraph>,
    memory_schema: Option<SchemaGraph>,
    objects: Vec<ObjectRecord>,
    blocks: Vec<AddressBlock>,
    by_file_address: HashMap<u64, usize>,
    by_load_address: HashMap<u64, Target>,
    pending: Vec<usize>,
    dropped: usize,
    heap: VirtualHeap,
}

impl Loader {
    /// Creates an idle loader.
    pub fn new(options: LoadOptions) -> Self {
        let heap = VirtualHeap::new(options.platform.address_width);
        Self {
            options,
            stage: LoadStage::Idle,
            file_header: None,
            flags: None,
            file_schema: None,
            memory_schema: None,
            objects: Vec::new(),
            blocks: Vec::new(),
            by_file_address: HashMap::new(),
            by_load_address: HashMap::new(),
            pending: Vec::new(),
            dropped: 0,
            heap,
        }
    }

    /// Maps and loads a file.
    pub fn load_file<P, A>(&mut self, path: P, app: &mut A) -> Result<()>
    where
        P: AsRef<Path>,
        A: Application + ?Sized,
    {
        let source = match DataSource::open(path) {
            Ok(s) => s,
            Err(e) => {
                self.release();
                self.stage = LoadStage::Failed(e.status());
                return Err(e);
            }
        };
        self.load_bytes(source.as_bytes(), app)
    }

    /// Loads a complete stream, compressed or not. Any previous session is released first.
    pub fn load_bytes<A: Application + ?Sized>(&mut self, data: &[u8], app: &mut A) -> Result<()> {
        self.release();
        let registry = CompressorRegistry::new();
        let signature = app.signature();
        let result = registry
            .unwrap_stream(data, Some(&signature))
            .and_then(|plain| self.run(&plain, app));
        match result {
            Ok(()) => {
                self.enter(LoadStage::Done);
                log::debug!(
                    "loaded {} objects ({} dropped, {} address blocks)",
                    self.objects.len(),
                    self.dropped,
                    self.blocks.len()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("load failed during {:?}: {e}", self.stage);
                self.release();
                self.stage = LoadStage::Failed(e.status());
                Err(e)
            }
        }
    }

    fn enter(&mut self, stage: LoadStage) {
        log::debug!("load stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn release(&mut self) {
        self.file_header = None;
        self.flags = None;
        self.file_schema = None;
        self.memory_schema = None;
        self.objects.clear();
        self.blocks.clear();
        self.by_file_address.clear();
        self.by_load_address.clear();
        self.pending.clear();
        self.dropped = 0;
        self.heap = VirtualHeap::new(self.options.platform.address_width);
        self.stage = LoadStage::Idle;
    }

    fn run<A: Application + ?Sized>(&mut self, data: &[u8], app: &mut A) -> Result<()> {
        let total = data.len() as u64;

        self.enter(LoadStage::ReadHeader);
        let header = FileHeader::from_bytes(data)?;
        if header.signature != app.signature() {
            return Err(DriftError::Header(format!(
                "signature {:?} does not belong to this application",
                String::from_utf8_lossy(&header.signature)
            )));
        }
        let flags = HeaderFlags::derive(header.platform, self.options.platform);
        log::debug!(
            "file v{} written {:?}; endian swap: {}, address width change: {}",
            header.version,
            header.platform,
            flags.endian_swap,
            flags.address_width_mismatch
        );
        self.file_header = Some(header);
        self.flags = Some(flags);

        self.enter(LoadStage::InitializeCurrentSchema);
        let memory = SchemaGraph::parse(app.schema_blob().to_vec(), self.options.platform)?;
        memory.ensure_linked()?;

        self.enter(LoadStage::PrescanForEmbeddedSchema);
        let mut cursor = Cursor::new(data);
        cursor.set_position(FILE_HEADER_SIZE as u64);
        let blob = prescan_schema(&mut cursor, &flags, total)?;

        self.enter(LoadStage::ParseEmbeddedSchema);
        let mut file = SchemaGraph::parse(blob, header.platform)?;
        if self.options.check_duplicate_keys {
            let dup = file.verify_unique_hashes();
            if !dup.is_ok() {
                return Err(DriftError::Link(file.link_status() | dup));
            }
        }
        file.ensure_linked()?;
        let mut memory = memory;
        file.mark_absent(&memory);
        memory.mark_absent(&file);
        if self.options.compare_schemas {
            log::debug!("{}", SchemaComparison::new(&file, &memory));
        }

        self.enter(LoadStage::SeekToDataStart);
        cursor.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;

        self.enter(LoadStage::StreamChunks);
        loop {
            let offset = cursor.position();
            let read = ChunkHeader::read(&mut cursor, &flags, total)?;
            if read.status != ChunkStatus::Ok {
                return Err(DriftError::Chunk {
                    status: read.status,
                    offset,
                });
            }
            let h = read.header;
            if h.code == ChunkCode::SCHEMA || h.code == ChunkCode::END {
                break;
            }
            let start = cursor.position();
            let end = start + u64::from(h.length);
            if end > total {
                return Err(DriftError::Chunk {
                    status: ChunkStatus::InvalidRead,
                    offset,
                });
            }
            cursor.set_position(end);
            if h.code == ChunkCode::TEST {
                continue;
            }
            let payload = &data[start as usize..end as usize];
            if self.options.dump_chunks {
                log::trace!("chunk {} @{offset}:\n{}", h.code, hex_dump(payload, start, 512));
            }
            self.ingest(h, payload, offset, &flags, &file, &memory)?;
        }

        self.enter(LoadStage::RebuildObjectGraph);
        self.file_schema = Some(file);
        self.memory_schema = Some(memory);
        self.rebuild()?;
        self.notify(app);
        Ok(())
    }

    fn drop_object(&mut self, h: &ChunkHeader, why: &str) {
        self.dropped += 1;
        if self.options.log_dropped_objects {
            log::warn!("dropped chunk {} @0x{:x}: {why}", h.code, h.address);
        }
    }

    fn ingest(
        &mut self,
        h: ChunkHeader,
        payload: &[u8],
        offset: u64,
        flags: &HeaderFlags,
        file: &SchemaGraph,
        memory: &SchemaGraph,
    ) -> Result<()> {
        if self.by_file_address.contains_key(&h.address) {
            return Err(DriftError::DuplicateAddress(h.address));
        }
        let Some(fs) = file.struct_by_id(h.struct_id) else {
            self.drop_object(&h, "struct id not in the embedded schema");
            return Ok(());
        };

        let (size, memory_struct, raw) = if h.struct_id < file.first_user_struct() {
            (payload.len(), None, fs.atomic)
        } else {
            let Some(ms) = memory
                .find_struct_by_hash(fs.type_hash)
                .filter(|s| !s.is_atomic())
            else {
                self.drop_object(&h, "struct absent from the current schema");
                return Ok(());
            };
            if u64::from(h.length) != u64::from(h.count) * u64::from(fs.size) {
                return Err(DriftError::Chunk {
                    status: ChunkStatus::InvalidLength,
                    offset,
                });
            }
            let max = self.options.max_element_size;
            for size in [fs.size as usize, ms.size as usize] {
                if size > max {
                    return Err(DriftError::ElementTooLarge { size, max });
                }
            }
            (h.count as usize * ms.size as usize, Some(ms.id), None)
        };

        // reserve before allocating; an unaddressable object never gets a buffer
        let load_address = self.heap.alloc(size)?;
        let data = if memory_struct.is_some() {
            vec![0u8; size]
        } else {
            let mut data = payload.to_vec();
            if flags.endian_swap
                && let Some(a) = raw
            {
                swap_in_place(&mut data, a.size());
            }
            data
        };
        let index = self.objects.len();
        self.by_file_address.insert(h.address, index);
        self.by_load_address.insert(load_address, Target::Object(index));
        self.pending.push(index);
        self.objects.push(ObjectRecord {
            header: h,
            file_bytes: payload.to_vec(),
            data,
            file_struct: fs.id,
            memory_struct,
            raw,
            load_address,
            address_block: None,
            linked: false,
        });
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let (Some(file), Some(memory), Some(flags)) =
            (&self.file_schema, &self.memory_schema, self.flags)
        else {
            return Err(DriftError::Internal("rebuild without schemas".into()));
        };
        let addresses = self
            .by_file_address
            .iter()
            .map(|(&stored, &i)| (stored, (i, self.objects[i].load_address)))
            .collect();
        let mut relinker =
            Relinker::new(file, memory, flags, &self.options, addresses, &mut self.heap);

        for &i in &self.pending {
            let obj = &mut self.objects[i];
            if obj.linked {
                continue;
            }
            let mut data = std::mem::take(&mut obj.data);
            let result = relinker.cast_object(&self.objects, i, &mut data);
            let obj = &mut self.objects[i];
            obj.data = data;
            obj.linked = true;
            result?;
        }

        let (blocks, stats) = relinker.finish();
        log::debug!(
            "relinked {} objects with {} cast plans; {} address blocks ({} reuses), {} unresolved addresses",
            stats.objects,
            stats.plans,
            stats.blocks,
            stats.blocks_reused,
            stats.unresolved
        );
        for (b, block) in blocks.iter().enumerate() {
            self.objects[block.source].address_block = Some(b);
            self.by_load_address
                .insert(block.load_address, Target::Block(b));
        }
        self.blocks = blocks;
        self.pending.clear();
        for obj in &mut self.objects {
            obj.file_bytes = Vec::new();
        }
        Ok(())
    }

    fn notify<A: Application + ?Sized>(&self, app: &mut A) {
        let Some(memory) = &self.memory_schema else {
            return;
        };
        for obj in &self.objects {
            let structure = obj.memory_struct.and_then(|id| memory.struct_by_id(id.as_u32()));
            let type_name = match (structure, obj.raw) {
                (Some(s), _) => memory.struct_name(s),
                (None, Some(a)) => a.name(),
                (None, None) => "?",
            };
            app.object_linked(&LinkedObject {
                code: obj.header.code,
                file_address: obj.header.address,
                load_address: obj.load_address,
                type_name,
                count: obj.header.count,
                data: &obj.data,
                structure,
            });
        }
    }

    /// Current stage.
    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// Options the loader was created with.
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Header of the loaded file.
    pub fn file_header(&self) -> Option<&FileHeader> {
        self.file_header.as_ref()
    }

    /// Conversions the loaded file required.
    pub fn header_flags(&self) -> Option<HeaderFlags> {
        self.flags
    }

    /// Schema embedded in the loaded file.
    pub fn file_schema(&self) -> Option<&SchemaGraph> {
        self.file_schema.as_ref()
    }

    /// The application's current schema.
    pub fn memory_schema(&self) -> Option<&SchemaGraph> {
        self.memory_schema.as_ref()
    }

    /// Every retained object in stream order.
    pub fn objects(&self) -> &[ObjectRecord] {
        &self.objects
    }

    /// Pointer arrays rebuilt during the relink pass.
    pub fn address_blocks(&self) -> &[AddressBlock] {
        &self.blocks
    }

    /// Chunks skipped because one of the schemas does not know their struct.
    pub fn dropped_objects(&self) -> usize {
        self.dropped
    }

    /// Looks an object up by the address it was saved with.
    pub fn object_by_file_address(&self, stored: u64) -> Option<&ObjectRecord> {
        self.by_file_address
            .get(&stored)
            .and_then(|&i| self.objects.get(i))
    }

    /// Maps a load address back to what it names.
    pub fn resolve(&self, load_address: u64) -> Option<Resolved<'_>> {
        match self.by_load_address.get(&load_address)? {
            Target::Object(i) => self.objects.get(*i).map(Resolved::Object),
            Target::Block(b) => self.blocks.get(*b).map(Resolved::AddressBlock),
        }
    }

    /// Follows a load address that names an object.
    pub fn follow(&self, load_address: u64) -> Option<&ObjectRecord> {
        match self.resolve(load_address)? {
            Resolved::Object(o) => Some(o),
            Resolved::AddressBlock(_) => None,
        }
    }

    /// Current-schema struct of an object.
    pub fn struct_of(&self, object: &ObjectRecord) -> Option<&Struct> {
        let memory = self.memory_schema.as_ref()?;
        memory.struct_by_id(object.memory_struct?.as_u32())
    }

    /// Bytes of the leaf at `path` (e.g. `pos.x`) in instance `instance` of `object`.
    pub fn field<'a>(&'a self, object: &'a ObjectRecord, instance: usize, path: &str) -> Option<&'a [u8]> {
        let s = self.struct_of(object)?;
        let leaf = s.leaves().iter().find(|l| l.path == path)?;
        let base = instance.checked_mul(s.size as usize)?;
        let range = leaf.range();
        object.data.get(base + range.start..base + range.end)
    }

    /// Reads one target-layout address from the leaf at `path`.
    pub fn read_address(&self, object: &ObjectRecord, instance: usize, path: &str) -> Option<u64> {
        let bytes = self.field(object, instance, path)?;
        let p = self.options.platform;
        p.endian.read_uint(bytes, p.address_width.bytes())
    }

    /// Writes every object back out through `writer`, keyed by load address.
    ///
    /// Pointers inside objects already hold load addresses, so the written file is
    /// self-consistent. A pointer array that was rebuilt at the target width is
    /// written once, as its [`AddressBlock`]; the file-time source chunk is
    /// skipped. The writer must use the current schema.
    pub fn write_objects(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        let Some(memory) = &self.memory_schema else {
            return Err(DriftError::Internal("no loaded session to write".into()));
        };
        for obj in self.objects.iter().filter(|o| o.address_block.is_none()) {
            match (obj.memory_struct, obj.raw) {
                (Some(id), _) => {
                    let s = memory
                        .struct_by_id(id.as_u32())
                        .ok_or_else(|| DriftError::Internal("current struct vanished".into()))?;
                    writer.write_struct(
                        obj.header.code,
                        memory.struct_name(s),
                        obj.load_address,
                        obj.header.count,
                        &obj.data,
                    )?;
                }
                (None, Some(a)) => {
                    writer.write_raw(obj.header.code, obj.load_address, a, &obj.data)?;
                }
                (None, None) => {}
            }
        }
        let address_type = match self.options.platform.address_width {
            AddressWidth::Four => AtomicType::UInt,
            AddressWidth::Eight => AtomicType::UInt64,
        };
        for block in &self.blocks {
            writer.write_raw(ChunkCode::DATA, block.load_address, address_type, &block.bytes)?;
        }
        Ok(())
    }
}

/// Walks the stream with the narrow scan reader until the schema chunk, and
/// returns its payload.
fn prescan_schema(cursor: &mut Cursor<&[u8]>, flags: &HeaderFlags, total: u64) -> Result<Vec<u8>> {
    loop {
        let offset = cursor.position();
        if offset >= total {
            return Err(DriftError::MissingSchema);
        }
        let read = ChunkHeader::scan(cursor, flags, total)?;
        match read.status {
            ChunkStatus::Ok => {}
            status => return Err(DriftError::Chunk { status, offset }),
        }
        let code = read.header.code;
        if code == ChunkCode::END {
            return Err(DriftError::MissingSchema);
        }
        let start = cursor.position();
        let end = start + u64::from(read.header.length);
        if end > total {
            return Err(DriftError::Chunk {
                status: ChunkStatus::InvalidRead,
                offset,
            });
        }
        if code == ChunkCode::SCHEMA {
            let bytes = cursor.get_ref();
            log::debug!("embedded schema at offset {offset}, {} bytes", read.header.length);
            return Ok(bytes[start as usize..end as usize].to_vec());
        }
        cursor.set_position(end);
    }
}
