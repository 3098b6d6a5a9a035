//! The records a compiled schema graph is made of.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use serde::Serialize;

use super::decl::Declarator;
use super::id::{MemberRef, StructId};
use crate::atomic::AtomicType;

/// Aggregated outcome of compiling a schema graph.
///
/// Problems are collected rather than reported one at a time, so a single
/// compile surfaces every undefined type and misaligned member at once.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct LinkStatus(u8);

impl LinkStatus {
    /// A member references a type that never received a size.
    pub const UNDEFINED_TYPE: Self = Self(0b0001);
    /// A member starts at an offset its size or address width does not divide.
    pub const MISALIGNED: Self = Self(0b0010);
    /// A recorded struct size disagrees with the size computed from its members.
    pub const SIZE_MISMATCH: Self = Self(0b0100);
    /// Two distinct schema strings share a hash.
    pub const DUPLICATE_HASH: Self = Self(0b1000);

    const FATAL_MASK: u8 = 0b1101;

    /// No problems.
    pub const fn ok() -> Self {
        Self(0)
    }

    /// True when nothing was reported.
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// True when the graph cannot be trusted for loading.
    pub fn is_fatal(&self) -> bool {
        self.0 & Self::FATAL_MASK != 0
    }

    /// True when every bit of `other` is set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Raw bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for LinkStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "OK");
        }
        let names = [
            (Self::UNDEFINED_TYPE, "UNDEFINED_TYPE"),
            (Self::MISALIGNED, "MISALIGNED"),
            (Self::SIZE_MISMATCH, "SIZE_MISMATCH"),
            (Self::DUPLICATE_HASH, "DUPLICATE_HASH"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "{}", set.join(" | "))
    }
}

impl fmt::Debug for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkStatus({self})")
    }
}

/// Per-struct flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StructFlags(u8);

impl StructFlags {
    const NESTED_MASK: u8 = 0b0001;
    const SIZE_MISMATCH_MASK: u8 = 0b0010;
    const MISALIGNED_MASK: u8 = 0b0100;
    const ABSENT_MASK: u8 = 0b1000;

    /// Has a non-pointer member whose type is another struct.
    pub fn has_nested(&self) -> bool {
        self.0 & Self::NESTED_MASK != 0
    }

    /// Recorded and computed sizes disagree.
    pub fn size_mismatch(&self) -> bool {
        self.0 & Self::SIZE_MISMATCH_MASK != 0
    }

    /// At least one member violates alignment.
    pub fn misaligned(&self) -> bool {
        self.0 & Self::MISALIGNED_MASK != 0
    }

    /// No struct of the same name exists in the schema this one was compared with.
    pub fn absent(&self) -> bool {
        self.0 & Self::ABSENT_MASK != 0
    }

    pub(crate) fn set_nested(&mut self) {
        self.0 |= Self::NESTED_MASK;
    }

    pub(crate) fn set_size_mismatch(&mut self) {
        self.0 |= Self::SIZE_MISMATCH_MASK;
    }

    pub(crate) fn set_misaligned(&mut self) {
        self.0 |= Self::MISALIGNED_MASK;
    }

    pub(crate) fn set_absent(&mut self, absent: bool) {
        if absent {
            self.0 |= Self::ABSENT_MASK;
        } else {
            self.0 &= !Self::ABSENT_MASK;
        }
    }
}

/// An entry of the *Names* section.
#[derive(Debug, Clone)]
pub struct NameEntry {
    pub(crate) span: Range<usize>,
    /// Hash of the full declarator string.
    pub hash: u64,
    /// Parsed declarator.
    pub decl: Declarator,
}

/// An entry of the *Types* section.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub(crate) span: Range<usize>,
    /// Hash of the type name.
    pub hash: u64,
    /// Byte size recorded in the *Sizes* section.
    pub recorded_size: u16,
    /// Set when a struct record describes this type.
    pub struct_id: Option<StructId>,
    /// Set when the name is one of the atomic types.
    pub atomic: Option<AtomicType>,
}

/// One member of a struct, in declaration order.
#[derive(Debug, Clone)]
pub struct Member {
    /// Handle back to the owning struct and this member's position.
    pub owner: MemberRef,
    /// Index into the *Types* section.
    pub type_index: u16,
    /// Index into the *Names* section.
    pub name_index: u16,
    /// Hash of the type name.
    pub type_hash: u64,
    /// Hash of the bare identifier.
    pub name_hash: u64,
    /// Byte offset inside the owner.
    pub offset: u32,
    /// Total size: element size times array length.
    pub size: u32,
    /// Size of one element; the address width for pointers.
    pub elem_size: u32,
    /// Number of indirections.
    pub pointer_depth: u8,
    /// Product of array dimensions.
    pub array_len: u32,
    /// Structural key matching this member across schemas.
    pub key: u64,
    /// Target struct when this is a non-pointer struct member.
    pub nested: Option<StructId>,
    /// Atomic type when the member's type is atomic.
    pub atomic: Option<AtomicType>,
}

/// A member flattened down to something castable: an atomic value or an address.
///
/// Nested non-pointer struct members are expanded into the leaves of the
/// sub-struct, with offsets made absolute and keys folded with the path.
#[derive(Debug, Clone)]
pub struct Leaf {
    /// Path-folded search key.
    pub key: u64,
    /// Dotted path from the owning struct, e.g. `pos.x` or `verts[1].y`.
    pub path: String,
    /// Absolute byte offset inside the owning struct.
    pub offset: u32,
    /// Total size in bytes.
    pub size: u32,
    /// Size of one element.
    pub elem_size: u32,
    /// Number of elements.
    pub array_len: u32,
    /// Number of indirections.
    pub pointer_depth: u8,
    /// Hash of the type name.
    pub type_hash: u64,
    /// Atomic type of the values, if known.
    pub atomic: Option<AtomicType>,
    /// The member this leaf was produced from.
    pub member: MemberRef,
}

impl Leaf {
    /// True when the leaf stores addresses.
    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }

    /// Byte range inside one struct instance.
    pub fn range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }
}

/// A struct descriptor.
#[derive(Debug, Clone)]
pub struct Struct {
    /// Position in the struct table.
    pub id: StructId,
    /// Index into the *Types* section.
    pub type_index: u16,
    /// Hash of the type name.
    pub type_hash: u64,
    /// Computed byte size.
    pub size: u32,
    /// Members in declaration order.
    pub members: Vec<Member>,
    /// Flags.
    pub flags: StructFlags,
    /// Set for atomic pseudo-structs (raw payload records).
    pub atomic: Option<AtomicType>,
    pub(crate) leaves: Vec<Leaf>,
    pub(crate) leaf_index: HashMap<u64, usize>,
}

impl Struct {
    /// Flattened leaves in offset order.
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// Finds a leaf by search key.
    pub fn leaf_by_key(&self, key: u64) -> Option<&Leaf> {
        self.leaf_index.get(&key).and_then(|&i| self.leaves.get(i))
    }

    /// Finds a direct member by search key.
    pub fn member_by_key(&self, key: u64) -> Option<&Member> {
        self.members.iter().find(|m| m.key == key)
    }

    /// True for atomic pseudo-structs.
    pub fn is_atomic(&self) -> bool {
        self.atomic.is_some()
    }
}
