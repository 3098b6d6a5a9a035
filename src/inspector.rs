//! Opt-in diagnostics for Driftfile streams.
//!
//! None of this is needed to load a file. It lists chunks, compares two schemas
//! side by side and renders hex dumps, for debugging layout drift.

use std::fmt;
use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;

use serde::Serialize;

use crate::chunk::{ChunkHeader, ChunkStatus};
use crate::compression::{CompressorRegistry, is_enveloped};
use crate::error::Result;
use crate::format::{ChunkCode, FILE_HEADER_SIZE, FileHeader, HeaderFlags, Platform};
use crate::io::DataSource;
use crate::schema::{Leaf, LinkStatus, SchemaGraph};

/// A structural report of a stream.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// Stream size on disk, before decompression.
    pub file_size: u64,
    /// Whether the stream was wrapped in a compression envelope.
    pub compressed: bool,
    /// Signature as text.
    pub signature: String,
    /// Application version.
    pub version: u16,
    /// Writing platform.
    pub platform: Platform,
    /// Every chunk up to the end chunk or the first malformed header.
    pub chunks: Vec<ChunkInfo>,
    /// Summary of the embedded schema, when it parsed.
    pub schema: Option<SchemaSummary>,
}

/// One chunk header as found in the stream.
#[derive(Debug, Serialize)]
pub struct ChunkInfo {
    /// Offset of the chunk header.
    pub offset: u64,
    /// Chunk code as text.
    pub code: String,
    /// Payload size.
    pub length: u32,
    /// Stored address.
    pub address: u64,
    /// Struct index.
    pub struct_id: u32,
    /// Repeat count.
    pub count: u32,
    /// Struct name from the embedded schema.
    pub type_name: Option<String>,
    /// Header validation outcome.
    pub status: ChunkStatus,
}

/// What the embedded schema contains.
#[derive(Debug, Serialize)]
pub struct SchemaSummary {
    /// Number of struct records, pseudo-structs included.
    pub struct_count: usize,
    /// Index of the first user struct.
    pub first_user_struct: u32,
    /// Link outcome.
    pub link_status: LinkStatus,
    /// Undefined member types.
    pub undefined_types: Vec<String>,
}

/// The Driftfile inspector tool.
#[derive(Debug)]
pub struct DriftInspector;

impl DriftInspector {
    /// Analyzes a file and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<FileReport> {
        let source = DataSource::open(path)?;
        Self::inspect_bytes(source.as_bytes())
    }

    /// Analyzes an in-memory stream.
    pub fn inspect_bytes(data: &[u8]) -> Result<FileReport> {
        let compressed = is_enveloped(data, None);
        let registry = CompressorRegistry::new();
        let plain = registry.unwrap_stream(data, None)?;
        let header = FileHeader::from_bytes(&plain)?;
        let flags = HeaderFlags::native_to(header.platform);
        let total = plain.len() as u64;

        let mut chunks = Vec::new();
        let mut schema_range = None;
        let mut cursor = Cursor::new(&plain[..]);
        cursor.set_position(FILE_HEADER_SIZE as u64);
        while cursor.position() < total {
            let offset = cursor.position();
            let read = ChunkHeader::read(&mut cursor, &flags, total)?;
            let h = read.header;
            chunks.push(ChunkInfo {
                offset,
                code: h.code.to_string(),
                length: h.length,
                address: h.address,
                struct_id: h.struct_id,
                count: h.count,
                type_name: None,
                status: read.status,
            });
            if read.status != ChunkStatus::Ok || h.code == ChunkCode::END {
                break;
            }
            let start = cursor.position();
            let end = (start + u64::from(h.length)).min(total);
            if h.code == ChunkCode::SCHEMA {
                schema_range = Some(start as usize..end as usize);
            }
            cursor.set_position(end);
        }

        let graph = schema_range.and_then(|r| SchemaGraph::parse(plain[r].to_vec(), header.platform).ok());
        if let Some(g) = &graph {
            for c in &mut chunks {
                let code = c.code.as_str();
                if code == "DNA1" || code == "ENDB" {
                    continue;
                }
                c.type_name = g
                    .struct_by_id(c.struct_id)
                    .map(|s| g.struct_name(s).to_string());
            }
        }

        Ok(FileReport {
            file_size: data.len() as u64,
            compressed,
            signature: String::from_utf8_lossy(&header.signature).into_owned(),
            version: header.version,
            platform: header.platform,
            chunks,
            schema: graph.map(|g| SchemaSummary {
                struct_count: g.structs().len(),
                first_user_struct: g.first_user_struct(),
                link_status: g.link_status(),
                undefined_types: g.undefined_types().to_vec(),
            }),
        })
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== DRIFTFILE INSPECTOR REPORT ===")?;
        writeln!(
            f,
            "Signature: {} v{:03} | {:?} | {} bytes{}",
            self.signature,
            self.version,
            self.platform,
            self.file_size,
            if self.compressed { " (compressed)" } else { "" }
        )?;
        if let Some(s) = &self.schema {
            writeln!(
                f,
                "Schema: {} structs ({} user) | {}",
                s.struct_count,
                s.struct_count.saturating_sub(s.first_user_struct as usize),
                s.link_status
            )?;
        }
        writeln!(f, "\n[CHUNKS]")?;
        for (i, c) in self.chunks.iter().enumerate() {
            let connector = if i + 1 == self.chunks.len() { "└── " } else { "├── " };
            writeln!(
                f,
                "{connector}@{:<8} {:<4} {:>8}b x{:<4} 0x{:<12x} {}{}",
                c.offset,
                c.code,
                c.length,
                c.count,
                c.address,
                c.type_name.as_deref().unwrap_or("-"),
                if c.status == ChunkStatus::Ok {
                    String::new()
                } else {
                    format!(" [{:?}]", c.status)
                }
            )?;
        }
        Ok(())
    }
}

/// Offset, size and type of a leaf on one side of a comparison.
#[derive(Debug, Clone, Serialize)]
pub struct LeafSide {
    /// Byte offset in the struct.
    pub offset: u32,
    /// Byte size.
    pub size: u32,
    /// Type name with one `*` per indirection.
    pub type_name: String,
}

/// A leaf present in one or both schemas.
#[derive(Debug, Clone, Serialize)]
pub struct LeafMatch {
    /// Leaf path.
    pub path: String,
    /// Embedded-schema side.
    pub file: Option<LeafSide>,
    /// Current-schema side.
    pub memory: Option<LeafSide>,
}

/// One struct compared across both schemas.
#[derive(Debug, Clone, Serialize)]
pub struct StructComparison {
    /// Struct name.
    pub name: String,
    /// Size in the embedded schema.
    pub file_size: Option<u32>,
    /// Size in the current schema.
    pub memory_size: Option<u32>,
    /// Leaves, current-schema order first, then file-only leaves.
    pub leaves: Vec<LeafMatch>,
}

/// Side-by-side comparison of an embedded schema and the current one.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaComparison {
    /// Every user struct of either schema.
    pub structs: Vec<StructComparison>,
}

fn side(graph: &SchemaGraph, leaf: &Leaf) -> LeafSide {
    let type_name = graph
        .struct_by_id(leaf.member.owner.as_u32())
        .and_then(|s| s.members.get(leaf.member.index as usize))
        .map_or("?", |m| graph.type_name(m.type_index));
    LeafSide {
        offset: leaf.offset,
        size: leaf.size,
        type_name: format!("{type_name}{}", "*".repeat(usize::from(leaf.pointer_depth))),
    }
}

impl SchemaComparison {
    /// Matches every user struct by name and every leaf by search key.
    pub fn new(file: &SchemaGraph, memory: &SchemaGraph) -> Self {
        let mut structs = Vec::new();

        for ms in memory.structs().iter().filter(|s| !s.is_atomic()) {
            let fs = file.find_struct_by_hash(ms.type_hash).filter(|s| !s.is_atomic());
            let mut leaves: Vec<LeafMatch> = ms
                .leaves()
                .iter()
                .map(|ml| LeafMatch {
                    path: ml.path.clone(),
                    file: fs.and_then(|fs| fs.leaf_by_key(ml.key)).map(|fl| side(file, fl)),
                    memory: Some(side(memory, ml)),
                })
                .collect();
            if let Some(fs) = fs {
                leaves.extend(
                    fs.leaves()
                        .iter()
                        .filter(|fl| ms.leaf_by_key(fl.key).is_none())
                        .map(|fl| LeafMatch {
                            path: fl.path.clone(),
                            file: Some(side(file, fl)),
                            memory: None,
                        }),
                );
            }
            structs.push(StructComparison {
                name: memory.struct_name(ms).to_string(),
                file_size: fs.map(|s| s.size),
                memory_size: Some(ms.size),
                leaves,
            });
        }

        for fs in file.structs().iter().filter(|s| !s.is_atomic()) {
            if memory.find_struct_by_hash(fs.type_hash).is_some() {
                continue;
            }
            structs.push(StructComparison {
                name: file.struct_name(fs).to_string(),
                file_size: Some(fs.size),
                memory_size: None,
                leaves: fs
                    .leaves()
                    .iter()
                    .map(|fl| LeafMatch {
                        path: fl.path.clone(),
                        file: Some(side(file, fl)),
                        memory: None,
                    })
                    .collect(),
            });
        }

        Self { structs }
    }
}

impl fmt::Display for SchemaComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = |s: Option<u32>| s.map_or_else(|| "absent".to_string(), |s| format!("{s}b"));
        let cell = |s: &Option<LeafSide>| {
            s.as_ref().map_or_else(String::new, |s| {
                format!("{} @{} ({}b)", s.type_name, s.offset, s.size)
            })
        };
        writeln!(f, "=== SCHEMA COMPARISON (file | current) ===")?;
        for s in &self.structs {
            writeln!(
                f,
                "struct {}: {} | {}",
                s.name,
                size(s.file_size),
                size(s.memory_size)
            )?;
            for l in &s.leaves {
                writeln!(f, "  {:<24} {:<28} | {}", l.path, cell(&l.file), cell(&l.memory))?;
            }
        }
        Ok(())
    }
}

/// Renders `bytes` as 16-byte rows of hex and ASCII, labelling rows from `base`.
/// Output stops after `limit` bytes.
pub fn hex_dump(bytes: &[u8], base: u64, limit: usize) -> String {
    let mut out = String::new();
    let shown = &bytes[..bytes.len().min(limit)];
    for (row, chunk) in shown.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", base + (row * 16) as u64);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    if bytes.len() > shown.len() {
        let _ = writeln!(out, "... {} more bytes", bytes.len() - shown.len());
    }
    out
}
