#![allow(dead_code)]

use driftfile::endian::Endian;
use driftfile::format::{AddressWidth, ChunkCode, Platform};
use driftfile::schema::SchemaBuilder;
use driftfile::{Application, AtomicType, LinkedObject, ObjectWriter};

pub const SIGNATURE: [u8; 7] = *b"DRFTEST";

pub const LE32: Platform = Platform::new(AddressWidth::Four, Endian::Little);
pub const BE32: Platform = Platform::new(AddressWidth::Four, Endian::Big);
pub const LE64: Platform = Platform::new(AddressWidth::Eight, Endian::Little);
pub const BE64: Platform = Platform::new(AddressWidth::Eight, Endian::Big);

/// An object the test application will write.
#[derive(Debug, Clone)]
pub enum Stored {
    Struct {
        code: &'static str,
        type_name: &'static str,
        address: u64,
        count: u32,
        bytes: Vec<u8>,
    },
    Raw {
        code: &'static str,
        address: u64,
        atomic: AtomicType,
        bytes: Vec<u8>,
    },
}

/// Records what the engine reported back.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub type_name: String,
    pub file_address: u64,
    pub load_address: u64,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct TestApp {
    pub schema: Vec<u8>,
    pub objects: Vec<Stored>,
    pub seen: Vec<Seen>,
}

impl TestApp {
    pub fn new(schema: Vec<u8>) -> Self {
        Self {
            schema,
            objects: Vec::new(),
            seen: Vec::new(),
        }
    }

    pub fn with_struct(
        mut self,
        code: &'static str,
        type_name: &'static str,
        address: u64,
        count: u32,
        bytes: Vec<u8>,
    ) -> Self {
        self.objects.push(Stored::Struct {
            code,
            type_name,
            address,
            count,
            bytes,
        });
        self
    }

    pub fn with_raw(mut self, code: &'static str, address: u64, atomic: AtomicType, bytes: Vec<u8>) -> Self {
        self.objects.push(Stored::Raw {
            code,
            address,
            atomic,
            bytes,
        });
        self
    }
}

impl Application for TestApp {
    fn signature(&self) -> [u8; 7] {
        SIGNATURE
    }

    fn version(&self) -> u16 {
        42
    }

    fn schema_blob(&self) -> &[u8] {
        &self.schema
    }

    fn object_linked(&mut self, object: &LinkedObject<'_>) {
        self.seen.push(Seen {
            type_name: object.type_name.to_string(),
            file_address: object.file_address,
            load_address: object.load_address,
            count: object.count,
        });
    }

    fn write_objects(&self, writer: &mut ObjectWriter<'_>) -> driftfile::Result<()> {
        for o in &self.objects {
            match o {
                Stored::Struct {
                    code,
                    type_name,
                    address,
                    count,
                    bytes,
                } => writer.write_struct(ChunkCode::new(code)?, type_name, *address, *count, bytes)?,
                Stored::Raw {
                    code,
                    address,
                    atomic,
                    bytes,
                } => writer.write_raw(ChunkCode::new(code)?, *address, *atomic, bytes)?,
            }
        }
        Ok(())
    }
}

/// Builds a blob for `platform` from `(struct, members)` declarations.
pub fn schema(platform: Platform, structs: &[(&str, &[(&str, &str)])]) -> Vec<u8> {
    let mut builder = SchemaBuilder::new();
    for (name, members) in structs {
        builder.add_struct(name, members).expect("declaration");
    }
    builder.build(platform).expect("schema links")
}

/// Writes instance bytes in a platform's layout.
#[derive(Debug, Clone)]
pub struct Bytes {
    platform: Platform,
    buf: Vec<u8>,
}

impl Bytes {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            buf: Vec::new(),
        }
    }

    fn put(mut self, width: usize, v: u64) -> Self {
        let mut b = [0u8; 8];
        self.platform.endian.write_uint(&mut b, width, v);
        self.buf.extend_from_slice(&b[..width]);
        self
    }

    pub fn i16(self, v: i16) -> Self {
        self.put(2, v as u16 as u64)
    }

    pub fn i32(self, v: i32) -> Self {
        self.put(4, v as u32 as u64)
    }

    pub fn i64(self, v: i64) -> Self {
        self.put(8, v as u64)
    }

    pub fn f32(self, v: f32) -> Self {
        self.put(4, u64::from(v.to_bits()))
    }

    pub fn f64(self, v: f64) -> Self {
        self.put(8, v.to_bits())
    }

    pub fn addr(self, v: u64) -> Self {
        let w = self.platform.address_width.bytes();
        self.put(w, v)
    }

    pub fn chars(mut self, s: &str, len: usize) -> Self {
        let mut field = vec![0u8; len];
        field[..s.len()].copy_from_slice(s.as_bytes());
        self.buf.extend_from_slice(&field);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

pub fn read_i32(bytes: &[u8], platform: Platform) -> i32 {
    platform.endian.read_uint(bytes, 4).expect("4 bytes") as u32 as i32
}

pub fn read_i16(bytes: &[u8], platform: Platform) -> i16 {
    platform.endian.read_uint(bytes, 2).expect("2 bytes") as u16 as i16
}

pub fn read_f32(bytes: &[u8], platform: Platform) -> f32 {
    f32::from_bits(platform.endian.read_uint(bytes, 4).expect("4 bytes") as u32)
}

pub fn read_f64(bytes: &[u8], platform: Platform) -> f64 {
    f64::from_bits(platform.endian.read_uint(bytes, 8).expect("8 bytes"))
}

/// Assembles a stream by hand: header, `chunks`, then the schema chunk (when given)
/// and the end chunk.
pub fn raw_stream(
    platform: Platform,
    chunks: &[(driftfile::chunk::ChunkHeader, Vec<u8>)],
    schema: Option<&[u8]>,
) -> Vec<u8> {
    use driftfile::chunk::ChunkHeader;
    use driftfile::format::FileHeader;
    use driftfile::io::ChunkWriter;

    let mut w = ChunkWriter::new(Vec::new(), platform);
    w.write_file_header(&FileHeader {
        signature: SIGNATURE,
        platform,
        version: 1,
    })
    .expect("header");
    for (h, payload) in chunks {
        w.write_chunk(h, payload).expect("chunk");
    }
    if let Some(blob) = schema {
        let h = ChunkHeader::new(ChunkCode::SCHEMA, blob.len() as u32, 0, 0, 1);
        w.write_chunk(&h, blob).expect("schema");
    }
    w.write_chunk(&ChunkHeader::new(ChunkCode::END, 0, 0, 0, 1), &[])
        .expect("end");
    w.into_inner()
}

/// Struct id of `name` in a blob compiled for `platform`.
pub fn struct_id(blob: &[u8], platform: Platform, name: &str) -> u32 {
    let g = driftfile::schema::SchemaGraph::parse(blob.to_vec(), platform).expect("schema");
    g.find_struct(name).expect("struct").id.as_u32()
}
