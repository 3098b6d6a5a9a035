//! Builds schema blobs from struct declarations.
//!
//! The builder is an explicit object threaded through the declarations rather
//! than accumulated global state. It registers every atomic type and one atomic
//! pseudo-struct per type up front, so raw payload chunks always have a struct
//! id below the first user struct.

use std::collections::HashMap;

use super::decl::Declarator;
use super::graph::SchemaGraph;
use crate::atomic::{ATOMIC_TYPES, AtomicType};
use crate::endian::Endian;
use crate::error::{DriftError, Result};
use crate::format::{Platform, tags};

/// Accumulates types, names and struct records, then encodes them as a blob.
///
/// ```rust
/// use driftfile::format::Platform;
/// use driftfile::schema::SchemaBuilder;
///
/// let mut builder = SchemaBuilder::new();
/// builder.add_struct("Vec3", &[("float", "x"), ("float", "y"), ("float", "z")])?;
/// let blob = builder.build(Platform::NATIVE)?;
/// assert_eq!(&blob[..4], b"SDNA");
/// # Ok::<(), driftfile::DriftError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    names: Vec<String>,
    name_index: HashMap<String, u16>,
    types: Vec<String>,
    type_index: HashMap<String, u16>,
    sizes: Vec<u16>,
    structs: Vec<(u16, Vec<(u16, u16)>)>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// Creates a builder with the atomic types and their pseudo-structs registered.
    pub fn new() -> Self {
        let mut builder = Self {
            names: Vec::new(),
            name_index: HashMap::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            sizes: Vec::new(),
            structs: Vec::new(),
        };
        for atomic in ATOMIC_TYPES {
            let index = builder.intern_type(atomic.name(), atomic.size() as u16);
            if atomic != AtomicType::Void {
                builder.structs.push((index, Vec::new()));
            }
        }
        builder
    }

    fn intern_type(&mut self, name: &str, size: u16) -> u16 {
        if let Some(&i) = self.type_index.get(name) {
            return i;
        }
        let i = self.types.len() as u16;
        self.types.push(name.to_string());
        self.sizes.push(size);
        self.type_index.insert(name.to_string(), i);
        i
    }

    fn intern_name(&mut self, decl: &str) -> u16 {
        if let Some(&i) = self.name_index.get(decl) {
            return i;
        }
        let i = self.names.len() as u16;
        self.names.push(decl.to_string());
        self.name_index.insert(decl.to_string(), i);
        i
    }

    /// Registers an opaque type of fixed size that has no struct record.
    pub fn add_type(&mut self, name: &str, size: u16) -> &mut Self {
        let i = self.intern_type(name, size);
        self.sizes[usize::from(i)] = size;
        self
    }

    /// Declares a struct. Members are `(type name, declarator)` pairs in layout order.
    ///
    /// Member types do not have to be declared yet; a type that is never declared
    /// shows up as an undefined type when the blob is compiled.
    pub fn add_struct(&mut self, name: &str, members: &[(&str, &str)]) -> Result<&mut Self> {
        if self.types.len() + members.len() > usize::from(u16::MAX)
            || self.names.len() + members.len() > usize::from(u16::MAX)
        {
            return Err(DriftError::Schema("schema exceeds 65535 entries".into()));
        }
        let type_index = self.intern_type(name, 0);
        if self
            .structs
            .iter()
            .any(|(t, m)| *t == type_index && !m.is_empty())
        {
            return Err(DriftError::Schema(format!("struct {name} declared twice")));
        }
        let mut record = Vec::with_capacity(members.len());
        for (ty, decl) in members {
            Declarator::parse(decl)?;
            let t = self.intern_type(ty, 0);
            let n = self.intern_name(decl);
            record.push((t, n));
        }
        self.structs.push((type_index, record));
        Ok(self)
    }

    /// Encodes the blob as declared, with every struct size recorded as zero.
    pub fn encode(&self, platform: Platform) -> Vec<u8> {
        let order = platform.endian;
        let mut out = Vec::new();
        out.extend_from_slice(&tags::ROOT);

        out.extend_from_slice(&tags::NAMES);
        put(&mut out, order, 4, self.names.len() as u64);
        for n in &self.names {
            out.extend_from_slice(n.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(&tags::TYPES);
        put(&mut out, order, 4, self.types.len() as u64);
        for t in &self.types {
            out.extend_from_slice(t.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(&tags::SIZES);
        for &s in &self.sizes {
            put(&mut out, order, 2, u64::from(s));
        }
        pad4(&mut out);

        out.extend_from_slice(&tags::STRUCTS);
        put(&mut out, order, 4, self.structs.len() as u64);
        for (t, members) in &self.structs {
            put(&mut out, order, 2, u64::from(*t));
            put(&mut out, order, 2, members.len() as u64);
            for &(mt, mn) in members {
                put(&mut out, order, 2, u64::from(mt));
                put(&mut out, order, 2, u64::from(mn));
            }
        }
        out
    }

    /// Compiles the declarations for `platform` and returns a blob with every
    /// struct size filled in.
    ///
    /// Fails with [`DriftError::Link`] when the declarations do not link.
    pub fn build(&self, platform: Platform) -> Result<Vec<u8>> {
        let graph = SchemaGraph::parse(self.encode(platform), platform)?;
        graph.ensure_linked()?;

        let mut patched = self.clone();
        for s in graph.structs().iter().filter(|s| !s.is_atomic()) {
            let size = u16::try_from(s.size).map_err(|_| {
                DriftError::Schema(format!(
                    "struct {} is {} bytes, more than a size entry holds",
                    graph.struct_name(s),
                    s.size
                ))
            })?;
            patched.sizes[usize::from(s.type_index)] = size;
        }
        Ok(patched.encode(platform))
    }
}

fn put(out: &mut Vec<u8>, order: Endian, width: usize, value: u64) {
    let mut buf = [0u8; 8];
    order.write_uint(&mut buf, width, value);
    out.extend_from_slice(&buf[..width]);
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}
