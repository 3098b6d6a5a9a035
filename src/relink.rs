//! Member casting and pointer relocation.
//!
//! For every (file struct, current struct) pair a [`CastPlan`] is built once: each
//! leaf of the current struct is matched to a file leaf by search key and given a
//! cast kind. Applying a plan turns one file-layout instance into one
//! current-layout instance. Stored addresses are rewritten through the session's
//! address table and never dereferenced.

use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use crate::atomic::{AtomicType, cast_ordered};
use crate::config::LoadOptions;
use crate::error::{DriftError, Result};
use crate::format::{HeaderFlags, Platform};
use crate::inspector::hex_dump;
use crate::loader::{AddressBlock, ObjectRecord, VirtualHeap};
use crate::schema::{Leaf, SchemaGraph, Struct, StructId};

/// How one matched member is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Same type, same byte order: plain byte copy.
    Copy,
    /// Character array: copied up to and including the first NUL.
    Chars,
    /// Element-wise numeric cast with byte-order conversion.
    Atomic {
        /// File-side element type.
        from: AtomicType,
        /// Current-side element type.
        to: AtomicType,
    },
    /// Single indirection: every address is looked up in the session table.
    Address,
    /// Double indirection: the referenced address array is rebuilt at the target width.
    AddressArray,
}

/// One member conversion inside a struct instance.
#[derive(Debug, Clone)]
pub struct CastOp {
    /// Conversion kind.
    pub kind: CastKind,
    /// Leaf path in the current struct.
    pub path: String,
    /// Byte offset in the file instance.
    pub src_offset: usize,
    /// Byte length of the file member.
    pub src_len: usize,
    /// Byte offset in the current instance.
    pub dst_offset: usize,
    /// Byte length of the current member.
    pub dst_len: usize,
    /// Number of elements converted.
    pub elements: usize,
    /// Size of one file element.
    pub src_elem: usize,
    /// Size of one current element.
    pub dst_elem: usize,
}

impl CastOp {
    fn written(&self) -> Range<usize> {
        let len = match self.kind {
            CastKind::Chars => self.dst_len,
            _ => self.elements * self.dst_elem,
        };
        self.dst_offset..self.dst_offset + len
    }
}

/// Conversions for one (file struct, current struct) pair.
#[derive(Debug, Clone, Default)]
pub struct CastPlan {
    /// Member conversions in current-layout order.
    pub ops: Vec<CastOp>,
    /// Current-layout byte ranges no conversion writes to.
    pub untouched: Vec<Range<usize>>,
}

impl CastPlan {
    /// Matches every leaf of `current` against `file` by search key.
    pub fn build(
        file: &SchemaGraph,
        file_struct: &Struct,
        memory: &SchemaGraph,
        current: &Struct,
        endian_swap: bool,
    ) -> Self {
        let name = memory.struct_name(current);
        let src_width = file.platform().address_width.bytes();
        let dst_width = memory.platform().address_width.bytes();
        let mut ops = Vec::with_capacity(current.leaves().len());

        for ml in current.leaves() {
            let Some(fl) = file_struct.leaf_by_key(ml.key) else {
                log::trace!("{name}.{} is new; left zero", ml.path);
                continue;
            };
            let kind = match (fl.pointer_depth, ml.pointer_depth) {
                (0, 0) => value_kind(fl, ml, endian_swap),
                (1, 1) => Some(CastKind::Address),
                (a, b) if a >= 2 && b >= 2 => Some(CastKind::AddressArray),
                _ => None,
            };
            let Some(kind) = kind else {
                log::warn!(
                    "{name}.{}: stored member has an incompatible type; left zero",
                    ml.path
                );
                continue;
            };
            let (elements, src_elem, dst_elem) = match kind {
                CastKind::Copy => (fl.size.min(ml.size) as usize, 1, 1),
                CastKind::Chars => (fl.size.min(ml.size) as usize, 1, 1),
                CastKind::Atomic { from, to } => (
                    fl.array_len.min(ml.array_len) as usize,
                    from.size(),
                    to.size(),
                ),
                CastKind::Address | CastKind::AddressArray => (
                    fl.array_len.min(ml.array_len) as usize,
                    src_width,
                    dst_width,
                ),
            };
            ops.push(CastOp {
                kind,
                path: ml.path.clone(),
                src_offset: fl.offset as usize,
                src_len: fl.size as usize,
                dst_offset: ml.offset as usize,
                dst_len: ml.size as usize,
                elements,
                src_elem,
                dst_elem,
            });
        }

        let mut written: Vec<Range<usize>> = ops.iter().map(CastOp::written).collect();
        written.sort_by_key(|r| r.start);
        let mut untouched = Vec::new();
        let mut cursor = 0;
        for r in written {
            if r.start > cursor {
                untouched.push(cursor..r.start);
            }
            cursor = cursor.max(r.end);
        }
        let size = current.size as usize;
        if cursor < size {
            untouched.push(cursor..size);
        }

        Self { ops, untouched }
    }
}

fn value_kind(fl: &Leaf, ml: &Leaf, endian_swap: bool) -> Option<CastKind> {
    match (fl.atomic, ml.atomic) {
        (Some(a), Some(b)) if a.is_char() && b.is_char() && (fl.array_len > 1 || ml.array_len > 1) => {
            Some(CastKind::Chars)
        }
        (Some(a), Some(_)) if fl.type_hash == ml.type_hash && (!endian_swap || a.size() == 1) => {
            Some(CastKind::Copy)
        }
        (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => {
            Some(CastKind::Atomic { from: a, to: b })
        }
        (None, None) if fl.type_hash == ml.type_hash && fl.size == ml.size => Some(CastKind::Copy),
        _ => None,
    }
}

/// Copies a character array up to and including its first NUL. Bytes after the
/// terminator keep whatever the destination held; a truncated string is
/// re-terminated.
pub fn copy_chars(src: &[u8], dst: &mut [u8]) {
    let n = src.len().min(dst.len());
    match src[..n].iter().position(|&b| b == 0) {
        Some(p) => dst[..=p].copy_from_slice(&src[..=p]),
        None => {
            dst[..n].copy_from_slice(&src[..n]);
            if n < src.len() && n > 0 {
                dst[n - 1] = 0;
            }
        }
    }
}

/// Counters reported at the end of a relink pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RelinkStats {
    pub objects: usize,
    pub plans: usize,
    pub unresolved: usize,
    pub blocks: usize,
    pub blocks_reused: usize,
}

/// The relink pass over one session's objects.
pub(crate) struct Relinker<'s> {
    file: &'s SchemaGraph,
    memory: &'s SchemaGraph,
    flags: HeaderFlags,
    target: Platform,
    options: &'s LoadOptions,
    addresses: HashMap<u64, (usize, u64)>,
    heap: &'s mut VirtualHeap,
    plans: HashMap<(StructId, StructId), Rc<CastPlan>>,
    blocks: Vec<AddressBlock>,
    block_of: HashMap<usize, usize>,
    stats: RelinkStats,
}

impl<'s> Relinker<'s> {
    pub(crate) fn new(
        file: &'s SchemaGraph,
        memory: &'s SchemaGraph,
        flags: HeaderFlags,
        options: &'s LoadOptions,
        addresses: HashMap<u64, (usize, u64)>,
        heap: &'s mut VirtualHeap,
    ) -> Self {
        Self {
            file,
            memory,
            flags,
            target: options.platform,
            options,
            addresses,
            heap,
            plans: HashMap::new(),
            blocks: Vec::new(),
            block_of: HashMap::new(),
            stats: RelinkStats::default(),
        }
    }

    fn plan(&mut self, fs: &Struct, ms: &Struct) -> Rc<CastPlan> {
        let (file, memory, swap) = (self.file, self.memory, self.flags.endian_swap);
        let stats = &mut self.stats;
        Rc::clone(self.plans.entry((fs.id, ms.id)).or_insert_with(|| {
            stats.plans += 1;
            Rc::new(CastPlan::build(file, fs, memory, ms, swap))
        }))
    }

    /// Casts every instance of `objects[index]` into `dst`.
    pub(crate) fn cast_object(
        &mut self,
        objects: &[ObjectRecord],
        index: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        let obj = objects
            .get(index)
            .ok_or_else(|| DriftError::Internal(format!("object {index} out of range")))?;
        let Some(ms_id) = obj.memory_struct else {
            return Ok(());
        };
        let (file, memory) = (self.file, self.memory);
        let fs = file
            .struct_by_id(obj.file_struct.as_u32())
            .ok_or_else(|| DriftError::Internal("file struct vanished".into()))?;
        let ms = memory
            .struct_by_id(ms_id.as_u32())
            .ok_or_else(|| DriftError::Internal("current struct vanished".into()))?;
        let plan = self.plan(fs, ms);
        let (fsz, msz) = (fs.size as usize, ms.size as usize);

        if self.options.dump_casts {
            log::trace!(
                "cast {} @0x{:x} before:\n{}",
                memory.struct_name(ms),
                obj.header.address,
                hex_dump(dst, 0, 256)
            );
        }

        for i in 0..obj.header.count as usize {
            let src = obj
                .file_bytes
                .get(i * fsz..(i + 1) * fsz)
                .ok_or_else(|| DriftError::Internal("file instance out of range".into()))?;
            let out = dst
                .get_mut(i * msz..(i + 1) * msz)
                .ok_or_else(|| DriftError::Internal("current instance out of range".into()))?;
            for op in &plan.ops {
                self.apply(op, src, out, objects)?;
            }
            if self.options.strict_zero_check {
                for r in &plan.untouched {
                    if let Some(p) = out[r.clone()].iter().position(|&b| b != 0) {
                        return Err(DriftError::Overflow {
                            structure: memory.struct_name(ms).to_string(),
                            offset: r.start + p,
                        });
                    }
                }
            }
        }

        if self.options.dump_casts {
            log::trace!(
                "cast {} @0x{:x} after:\n{}",
                memory.struct_name(ms),
                obj.header.address,
                hex_dump(dst, 0, 256)
            );
        }
        self.stats.objects += 1;
        Ok(())
    }

    fn apply(
        &mut self,
        op: &CastOp,
        src: &[u8],
        out: &mut [u8],
        objects: &[ObjectRecord],
    ) -> Result<()> {
        let s = src
            .get(op.src_offset..op.src_offset + op.src_len)
            .ok_or_else(|| DriftError::Internal(format!("{}: source out of range", op.path)))?;
        let d = out
            .get_mut(op.dst_offset..op.dst_offset + op.dst_len)
            .ok_or_else(|| DriftError::Internal(format!("{}: destination out of range", op.path)))?;

        match op.kind {
            CastKind::Copy => d[..op.elements].copy_from_slice(&s[..op.elements]),
            CastKind::Chars => copy_chars(s, d),
            CastKind::Atomic { from, to } => cast_ordered(
                s,
                self.flags.file_endian,
                d,
                self.target.endian,
                from,
                to,
                op.elements,
            )?,
            CastKind::Address | CastKind::AddressArray => {
                for e in 0..op.elements {
                    let stored = self
                        .flags
                        .file_endian
                        .read_uint(&s[e * op.src_elem..], op.src_elem)
                        .unwrap_or(0);
                    let mapped = if op.kind == CastKind::Address {
                        self.lookup(stored)
                    } else {
                        self.materialize(stored, objects)?
                    };
                    self.target
                        .endian
                        .write_uint(&mut d[e * op.dst_elem..], op.dst_elem, mapped);
                }
            }
        }
        Ok(())
    }

    fn lookup(&mut self, stored: u64) -> u64 {
        if stored == 0 {
            return 0;
        }
        match self.addresses.get(&stored) {
            Some(&(_, load)) => load,
            None => {
                log::trace!("stored address 0x{stored:x} has no object; nulled");
                self.stats.unresolved += 1;
                0
            }
        }
    }

    /// Rebuilds the address array stored at `stored` at the target width, once per
    /// referenced object.
    fn materialize(&mut self, stored: u64, objects: &[ObjectRecord]) -> Result<u64> {
        if stored == 0 {
            return Ok(0);
        }
        let Some(&(j, _)) = self.addresses.get(&stored) else {
            self.stats.unresolved += 1;
            return Ok(0);
        };
        if let Some(&b) = self.block_of.get(&j) {
            self.stats.blocks_reused += 1;
            return Ok(self.blocks[b].load_address);
        }

        let fw = self.flags.chunk_width.bytes();
        let tw = self.target.address_width.bytes();
        let src = &objects[j].file_bytes;
        let n = src.len() / fw;
        let mut bytes = vec![0u8; n * tw];
        for e in 0..n {
            let v = self
                .flags
                .file_endian
                .read_uint(&src[e * fw..], fw)
                .unwrap_or(0);
            let mapped = self.lookup(v);
            self.target.endian.write_uint(&mut bytes[e * tw..], tw, mapped);
        }

        let load_address = self.heap.alloc(bytes.len())?;
        self.block_of.insert(j, self.blocks.len());
        self.blocks.push(AddressBlock {
            load_address,
            source: j,
            bytes,
        });
        self.stats.blocks += 1;
        Ok(load_address)
    }

    /// Materialized blocks, the object each came from, and the pass counters.
    pub(crate) fn finish(self) -> (Vec<AddressBlock>, RelinkStats) {
        (self.blocks, self.stats)
    }
}
