//! Parses a schema blob into a struct/member graph.
//!
//! The blob's four sections are read in fixed order, then the graph is linked:
//! struct sizes are computed by fixed-point iteration, member offsets are laid
//! out and alignment-checked, search keys are derived and every struct is
//! flattened into castable leaves. Link problems are aggregated into a
//! [`LinkStatus`]; only a structurally broken blob fails the parse itself.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use super::decl::Declarator;
use super::id::{MemberRef, StructId};
use super::model::{Leaf, LinkStatus, Member, NameEntry, Struct, StructFlags, TypeEntry};
use crate::atomic::AtomicType;
use crate::endian::Endian;
use crate::error::{DriftError, Result};
use crate::format::{Platform, tags};
use crate::hash::{fold, fold_all, hash_bytes, hash_str};

/// Deepest value nesting of one struct inside another that a schema may declare.
const MAX_NESTING: usize = 32;

/// Most leaves a single struct may flatten into. Every element of an array of
/// structs contributes its own leaves.
const MAX_LEAVES: u64 = 1 << 16;

/// Search-key type component shared by every numeric atomic type, so a member
/// whose type was promoted or truncated between schemas still matches.
static NUMERIC_CLASS_HASH: LazyLock<u64> = LazyLock::new(|| hash_str("<numeric>"));

#[derive(Debug, Clone, Copy, Default)]
struct LeafShape {
    count: u64,
    height: usize,
}

struct RawStruct {
    type_index: u16,
    members: Vec<(u16, u16)>,
}

struct RawSchema {
    names: Vec<Range<usize>>,
    types: Vec<Range<usize>>,
    sizes: Vec<u16>,
    structs: Vec<RawStruct>,
}

struct BlobCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    order: Endian,
    section: &'static str,
}

impl<'a> BlobCursor<'a> {
    fn truncated(&self) -> DriftError {
        DriftError::Schema(format!("blob truncated in {} section", self.section))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(slice)
    }

    fn expect_tag(&mut self, tag: [u8; 4], section: &'static str) -> Result<()> {
        self.section = section;
        let found = self.take(4)?;
        if found != tag {
            return Err(DriftError::Schema(format!(
                "expected tag {:?}, found {:?}",
                String::from_utf8_lossy(&tag),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        self.order
            .read_uint(b, 2)
            .map(|v| v as u16)
            .ok_or_else(|| self.truncated())
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        self.order
            .read_uint(b, 4)
            .map(|v| v as u32)
            .ok_or_else(|| self.truncated())
    }

    /// A count that must fit a 16-bit index and cannot exceed the remaining bytes.
    fn count(&mut self) -> Result<usize> {
        let n = self.u32()? as usize;
        if n > usize::from(u16::MAX) + 1 || n > self.bytes.len().saturating_sub(self.pos) {
            return Err(DriftError::Schema(format!(
                "{} count {n} is out of range",
                self.section
            )));
        }
        Ok(n)
    }

    fn cstr(&mut self) -> Result<Range<usize>> {
        let rest = self.bytes.get(self.pos..).ok_or_else(|| self.truncated())?;
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.truncated())?;
        let span = self.pos..self.pos + len;
        self.pos += len + 1;
        Ok(span)
    }

    fn align4(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

impl RawSchema {
    fn read(bytes: &[u8], order: Endian) -> Result<Self> {
        let mut c = BlobCursor {
            bytes,
            pos: 0,
            order,
            section: "root",
        };
        c.expect_tag(tags::ROOT, "root")?;

        c.expect_tag(tags::NAMES, "names")?;
        let n = c.count()?;
        let names = (0..n).map(|_| c.cstr()).collect::<Result<Vec<_>>>()?;
        c.align4();

        c.expect_tag(tags::TYPES, "types")?;
        let n = c.count()?;
        let types = (0..n).map(|_| c.cstr()).collect::<Result<Vec<_>>>()?;
        c.align4();

        c.expect_tag(tags::SIZES, "sizes")?;
        let sizes = (0..types.len()).map(|_| c.u16()).collect::<Result<Vec<_>>>()?;
        c.align4();

        c.expect_tag(tags::STRUCTS, "structs")?;
        let n = c.count()?;
        let mut structs = Vec::with_capacity(n);
        for _ in 0..n {
            let type_index = c.u16()?;
            let member_count = c.u16()?;
            let mut members = Vec::with_capacity(usize::from(member_count));
            for _ in 0..member_count {
                let t = c.u16()?;
                let n = c.u16()?;
                members.push((t, n));
            }
            structs.push(RawStruct {
                type_index,
                members,
            });
        }

        Ok(Self {
            names,
            types,
            sizes,
            structs,
        })
    }
}

/// An immutable struct/member graph compiled from one schema blob.
///
/// The graph keeps the blob alive and resolves every name and type string
/// straight out of it.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    blob: Arc<[u8]>,
    platform: Platform,
    names: Vec<NameEntry>,
    types: Vec<TypeEntry>,
    structs: Vec<Struct>,
    first_user_struct: u32,
    by_type_hash: HashMap<u64, StructId>,
    type_by_hash: HashMap<u64, u16>,
    status: LinkStatus,
    undefined: Vec<String>,
}

impl SchemaGraph {
    /// Parses and links a blob whose integers are in `platform.endian` and whose
    /// pointers are `platform.address_width` wide.
    ///
    /// Link problems do not fail the parse; check [`Self::link_status`] or call
    /// [`Self::ensure_linked`].
    pub fn parse(blob: impl Into<Arc<[u8]>>, platform: Platform) -> Result<Self> {
        let blob: Arc<[u8]> = blob.into();
        let raw = RawSchema::read(&blob, platform.endian)?;

        let mut names = Vec::with_capacity(raw.names.len());
        for span in &raw.names {
            let text = utf8(&blob, span)?;
            names.push(NameEntry {
                hash: hash_bytes(text.as_bytes()),
                decl: Declarator::parse(text)?,
                span: span.clone(),
            });
        }

        let mut types = Vec::with_capacity(raw.types.len());
        for (span, &recorded_size) in raw.types.iter().zip(&raw.sizes) {
            let text = utf8(&blob, span)?;
            let hash = hash_bytes(text.as_bytes());
            let mut atomic = AtomicType::from_hash(hash);
            if let Some(a) = atomic
                && recorded_size != 0
                && usize::from(recorded_size) != a.size()
            {
                log::warn!(
                    "type {text} is recorded as {recorded_size} bytes, not {}; treating it as opaque",
                    a.size()
                );
                atomic = None;
            }
            types.push(TypeEntry {
                span: span.clone(),
                hash,
                recorded_size,
                struct_id: None,
                atomic,
            });
        }

        let mut graph = Self {
            blob,
            platform,
            names,
            types,
            structs: Vec::with_capacity(raw.structs.len()),
            first_user_struct: 0,
            by_type_hash: HashMap::new(),
            type_by_hash: HashMap::new(),
            status: LinkStatus::ok(),
            undefined: Vec::new(),
        };
        graph.register_structs(&raw)?;
        graph.link(&raw)?;
        Ok(graph)
    }

    fn register_structs(&mut self, raw: &RawSchema) -> Result<()> {
        let mut first_user = None;
        for (i, rs) in raw.structs.iter().enumerate() {
            let id = StructId::new(i as u32);
            let ti = usize::from(rs.type_index);
            if ti >= self.types.len() {
                return Err(DriftError::Schema(format!(
                    "struct {i} references type {ti} of {}",
                    self.types.len()
                )));
            }
            for &(t, n) in &rs.members {
                if usize::from(t) >= self.types.len() || usize::from(n) >= self.names.len() {
                    return Err(DriftError::Schema(format!(
                        "struct {i} member ({t}, {n}) is out of range"
                    )));
                }
            }

            let atomic = if rs.members.is_empty() {
                self.types[ti].atomic
            } else {
                None
            };
            if atomic.is_none() {
                if self.types[ti].struct_id.is_some() {
                    return Err(DriftError::Schema(format!(
                        "type {} has more than one struct record",
                        self.type_name(rs.type_index)
                    )));
                }
                self.types[ti].struct_id = Some(id);
                first_user.get_or_insert(i);
            }

            let type_hash = self.types[ti].hash;
            self.by_type_hash.entry(type_hash).or_insert(id);
            self.structs.push(Struct {
                id,
                type_index: rs.type_index,
                type_hash,
                size: 0,
                members: Vec::with_capacity(rs.members.len()),
                flags: StructFlags::default(),
                atomic,
                leaves: Vec::new(),
                leaf_index: HashMap::new(),
            });
        }
        self.first_user_struct = first_user.unwrap_or(self.structs.len()) as u32;
        for (i, t) in self.types.iter().enumerate() {
            self.type_by_hash.entry(t.hash).or_insert(i as u16);
        }
        Ok(())
    }

    fn non_struct_size(&self, type_index: u16) -> Option<u32> {
        let t = &self.types[usize::from(type_index)];
        let size = match (t.recorded_size, t.atomic) {
            (0, Some(a)) => a.size() as u32,
            (recorded, _) => u32::from(recorded),
        };
        (size != 0).then_some(size)
    }

    fn member_elem_size(&self, type_index: u16, decl: &Declarator, sizes: &[Option<u32>]) -> Option<u32> {
        if decl.is_pointer() {
            return Some(self.platform.address_width.bytes() as u32);
        }
        match self.types[usize::from(type_index)].struct_id {
            Some(sid) => sizes[sid.index()],
            None => self.non_struct_size(type_index),
        }
    }

    fn raw_struct_size(&self, rs: &RawStruct, sizes: &[Option<u32>]) -> Option<u32> {
        if rs.members.is_empty() {
            return None;
        }
        let mut total = 0u32;
        for &(t, n) in &rs.members {
            let decl = &self.names[usize::from(n)].decl;
            let elem = self.member_elem_size(t, decl, sizes)?;
            total = total.checked_add(elem.checked_mul(decl.array_len)?)?;
        }
        Some(total)
    }

    fn link(&mut self, raw: &RawSchema) -> Result<()> {
        // Fixed point: a struct whose members reference a still-unsized struct
        // waits for a later pass.
        let mut sizes: Vec<Option<u32>> = self
            .structs
            .iter()
            .map(|s| s.atomic.map(|a| a.size() as u32))
            .collect();
        let mut passes = 0;
        loop {
            passes += 1;
            let mut progress = false;
            for (i, rs) in raw.structs.iter().enumerate() {
                if sizes[i].is_none()
                    && let Some(size) = self.raw_struct_size(rs, &sizes)
                {
                    sizes[i] = Some(size);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        log::trace!("struct sizes converged after {passes} passes");

        for (i, rs) in raw.structs.iter().enumerate() {
            if sizes[i].is_some() {
                continue;
            }
            self.status.insert(LinkStatus::UNDEFINED_TYPE);
            let owner = self.type_name(rs.type_index).to_string();
            if rs.members.is_empty() {
                log::error!("undefined type: struct {owner} has no members");
                self.undefined.push(owner);
                continue;
            }
            for &(t, n) in &rs.members {
                let decl = &self.names[usize::from(n)].decl;
                if self.member_elem_size(t, decl, &sizes).is_none() {
                    let entry = format!(
                        "{owner}.{}: {}",
                        self.name(n),
                        self.type_name(t)
                    );
                    log::error!("undefined type: {entry}");
                    self.undefined.push(entry);
                }
            }
        }

        for (i, rs) in raw.structs.iter().enumerate() {
            self.layout_struct(i, rs, &sizes);
        }

        let mut shapes = vec![None; self.structs.len()];
        for (i, s) in self.structs.iter().enumerate() {
            if s.atomic.is_some() || sizes[i].is_none() {
                continue;
            }
            let shape = self.leaf_shape(s.id, 0, &mut shapes)?;
            if shape.count > MAX_LEAVES {
                return Err(DriftError::Schema(format!(
                    "struct {} flattens into {} leaves, more than {MAX_LEAVES}",
                    self.struct_name(s),
                    shape.count
                )));
            }
        }

        let leaves: Vec<Vec<Leaf>> = (0..self.structs.len())
            .map(|i| {
                let s = &self.structs[i];
                match shapes[i] {
                    Some(shape) if s.atomic.is_none() && sizes[i].is_some() => {
                        let mut out = Vec::with_capacity(shape.count as usize);
                        self.flatten_into(s.id, s.type_hash, 0, "", &mut out);
                        out
                    }
                    _ => Vec::new(),
                }
            })
            .collect();
        for (s, leaves) in self.structs.iter_mut().zip(leaves) {
            let mut index = HashMap::with_capacity(leaves.len());
            for (li, leaf) in leaves.iter().enumerate() {
                if index.insert(leaf.key, li).is_some() {
                    log::warn!("search key collision on {} in struct {}", leaf.path, s.id);
                }
            }
            s.leaves = leaves;
            s.leaf_index = index;
        }
        Ok(())
    }

    /// Leaf count and nesting height of a sized struct, memoized in `shapes`.
    ///
    /// Counting happens before any leaf is built, so an oversized struct fails
    /// the link without allocating its leaves.
    fn leaf_shape(
        &self,
        id: StructId,
        depth: usize,
        shapes: &mut [Option<LeafShape>],
    ) -> Result<LeafShape> {
        let too_deep = || {
            DriftError::Schema(format!(
                "struct {id} nests deeper than {MAX_NESTING} levels"
            ))
        };
        if let Some(shape) = shapes.get(id.index()).copied().flatten() {
            if depth + shape.height > MAX_NESTING {
                return Err(too_deep());
            }
            return Ok(shape);
        }
        if depth > MAX_NESTING {
            return Err(too_deep());
        }
        let Some(s) = self.structs.get(id.index()) else {
            return Ok(LeafShape::default());
        };
        let mut shape = LeafShape::default();
        for m in &s.members {
            match m.nested {
                Some(sub) => {
                    let inner = self.leaf_shape(sub, depth + 1, shapes)?;
                    shape.count = shape
                        .count
                        .saturating_add(u64::from(m.array_len).saturating_mul(inner.count));
                    shape.height = shape.height.max(inner.height + 1);
                }
                None => shape.count = shape.count.saturating_add(1),
            }
        }
        shapes[id.index()] = Some(shape);
        Ok(shape)
    }

    fn layout_struct(&mut self, i: usize, rs: &RawStruct, sizes: &[Option<u32>]) {
        let width = self.platform.address_width.bytes() as u32;
        let owner_hash = self.structs[i].type_hash;
        let owner_name = self.type_name(rs.type_index).to_string();
        let mut flags = self.structs[i].flags;
        let mut members = Vec::with_capacity(rs.members.len());
        let mut offset = 0u32;

        for (mi, &(t, n)) in rs.members.iter().enumerate() {
            let ty = &self.types[usize::from(t)];
            let decl = &self.names[usize::from(n)].decl;
            let elem_size = self.member_elem_size(t, decl, sizes).unwrap_or(0);
            let nested = if decl.is_pointer() { None } else { ty.struct_id };
            if nested.is_some() {
                flags.set_nested();
            }

            let required = if decl.is_pointer() {
                width
            } else if nested.is_none() && matches!(elem_size, 2 | 4 | 8) {
                elem_size
            } else {
                1
            };
            if offset % required != 0 {
                log::warn!(
                    "misaligned member: {owner_name}.{} ({}) at offset {offset} needs {required}-byte alignment",
                    self.name(n),
                    self.type_name(t)
                );
                flags.set_misaligned();
                self.status.insert(LinkStatus::MISALIGNED);
            }

            let size = elem_size.saturating_mul(decl.array_len);
            members.push(Member {
                owner: MemberRef {
                    owner: StructId::new(i as u32),
                    index: mi as u32,
                },
                type_index: t,
                name_index: n,
                type_hash: ty.hash,
                name_hash: decl.base_hash,
                offset,
                size,
                elem_size,
                pointer_depth: decl.pointer_depth,
                array_len: decl.array_len,
                key: fold_all(owner_hash, &[self.key_type_hash(t), decl.base_hash]),
                nested,
                atomic: ty.atomic,
            });
            offset = offset.saturating_add(size);
        }

        let mut size = sizes[i].unwrap_or(0);
        if self.structs[i].atomic.is_none() && sizes[i].is_some() {
            let recorded = u32::from(self.types[usize::from(rs.type_index)].recorded_size);
            if recorded != 0 && recorded != size {
                log::error!(
                    "size mismatch: struct {owner_name} is recorded as {recorded} bytes but its members sum to {size}"
                );
                flags.set_size_mismatch();
                self.status.insert(LinkStatus::SIZE_MISMATCH);
            }
        }
        if self.structs[i].atomic.is_some() {
            size = self.non_struct_size(rs.type_index).unwrap_or(size);
        }

        let s = &mut self.structs[i];
        s.size = size;
        s.flags = flags;
        s.members = members;
    }

    fn flatten_into(
        &self,
        id: StructId,
        prefix: u64,
        base: u32,
        path: &str,
        out: &mut Vec<Leaf>,
    ) {
        let Some(s) = self.structs.get(id.index()) else {
            return;
        };
        for m in &s.members {
            let name = self.member_name(m);
            if let Some(sub) = m.nested {
                for idx in 0..m.array_len {
                    let mut p = fold_all(prefix, &[m.type_hash, m.name_hash]);
                    let sub_path = if m.array_len > 1 {
                        p = fold(p, u64::from(idx));
                        format!("{path}{name}[{idx}].")
                    } else {
                        format!("{path}{name}.")
                    };
                    let at = base + m.offset + idx * m.elem_size;
                    self.flatten_into(sub, p, at, &sub_path, out);
                }
            } else {
                out.push(Leaf {
                    key: fold_all(prefix, &[self.key_type_hash(m.type_index), m.name_hash]),
                    path: format!("{path}{name}"),
                    offset: base + m.offset,
                    size: m.size,
                    elem_size: m.elem_size,
                    array_len: m.array_len,
                    pointer_depth: m.pointer_depth,
                    type_hash: m.type_hash,
                    atomic: m.atomic,
                    member: m.owner,
                });
            }
        }
    }

    fn key_type_hash(&self, type_index: u16) -> u64 {
        let t = &self.types[usize::from(type_index)];
        match t.atomic {
            Some(a) if a.is_numeric() => *NUMERIC_CLASS_HASH,
            _ => t.hash,
        }
    }

    /// Compares every name against every other name and every type against every
    /// other type. Any shared hash sets [`LinkStatus::DUPLICATE_HASH`].
    pub fn verify_unique_hashes(&self) -> LinkStatus {
        let mut status = LinkStatus::ok();
        for (i, a) in self.names.iter().enumerate() {
            for b in &self.names[i + 1..] {
                if a.hash == b.hash {
                    log::error!(
                        "duplicate name hash: {:?} / {:?}",
                        self.str_at(&a.span),
                        self.str_at(&b.span)
                    );
                    status.insert(LinkStatus::DUPLICATE_HASH);
                }
            }
        }
        for (i, a) in self.types.iter().enumerate() {
            for b in &self.types[i + 1..] {
                if a.hash == b.hash {
                    log::error!(
                        "duplicate type hash: {:?} / {:?}",
                        self.str_at(&a.span),
                        self.str_at(&b.span)
                    );
                    status.insert(LinkStatus::DUPLICATE_HASH);
                }
            }
        }
        status
    }

    /// Flags every user struct that has no same-named struct in `other`.
    pub fn mark_absent(&mut self, other: &SchemaGraph) {
        for s in &mut self.structs {
            if s.atomic.is_none() {
                s.flags.set_absent(other.find_struct_by_hash(s.type_hash).is_none());
            }
        }
    }

    /// Fails with [`DriftError::Link`] when the link status carries a fatal problem.
    pub fn ensure_linked(&self) -> Result<()> {
        if self.status.is_fatal() {
            return Err(DriftError::Link(self.status));
        }
        Ok(())
    }

    /// Aggregated link problems.
    pub fn link_status(&self) -> LinkStatus {
        self.status
    }

    /// One entry per undefined member type, as `Owner.member: type`.
    pub fn undefined_types(&self) -> &[String] {
        &self.undefined
    }

    /// Layout the graph was compiled for.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The blob the graph was parsed from.
    pub fn blob(&self) -> &Arc<[u8]> {
        &self.blob
    }

    /// All struct records, pseudo-structs first.
    pub fn structs(&self) -> &[Struct] {
        &self.structs
    }

    /// Index of the first record that is not an atomic pseudo-struct.
    pub fn first_user_struct(&self) -> u32 {
        self.first_user_struct
    }

    /// Bounds-checked struct lookup.
    pub fn struct_by_id(&self, id: u32) -> Option<&Struct> {
        self.structs.get(id as usize)
    }

    /// Struct lookup by type-name hash.
    pub fn find_struct_by_hash(&self, type_hash: u64) -> Option<&Struct> {
        self.by_type_hash
            .get(&type_hash)
            .and_then(|id| self.structs.get(id.index()))
    }

    /// Struct lookup by type name.
    pub fn find_struct(&self, name: &str) -> Option<&Struct> {
        self.find_struct_by_hash(hash_str(name))
    }

    /// Type index lookup by name.
    pub fn find_type(&self, name: &str) -> Option<u16> {
        self.type_by_hash.get(&hash_str(name)).copied()
    }

    /// Names section.
    pub fn names(&self) -> &[NameEntry] {
        &self.names
    }

    /// Types section.
    pub fn types(&self) -> &[TypeEntry] {
        &self.types
    }

    /// Full declarator string at `index`.
    pub fn name(&self, index: u16) -> &str {
        self.names
            .get(usize::from(index))
            .map_or("?", |n| self.str_at(&n.span))
    }

    /// Type name at `index`.
    pub fn type_name(&self, index: u16) -> &str {
        self.types
            .get(usize::from(index))
            .map_or("?", |t| self.str_at(&t.span))
    }

    /// Type name of a struct.
    pub fn struct_name(&self, s: &Struct) -> &str {
        self.type_name(s.type_index)
    }

    /// Bare identifier of a member.
    pub fn member_name(&self, m: &Member) -> &str {
        let Some(entry) = self.names.get(usize::from(m.name_index)) else {
            return "?";
        };
        let decl = self.str_at(&entry.span);
        decl.get(entry.decl.base.clone()).unwrap_or(decl)
    }

    fn str_at(&self, span: &Range<usize>) -> &str {
        self.blob
            .get(span.clone())
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or("?")
    }
}

fn utf8<'a>(blob: &'a [u8], span: &Range<usize>) -> Result<&'a str> {
    blob.get(span.clone())
        .and_then(|b| std::str::from_utf8(b).ok())
        .ok_or_else(|| DriftError::Schema("schema string is not valid UTF-8".into()))
}
