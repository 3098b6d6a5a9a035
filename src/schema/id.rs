//! Struct ids and member back-handles.

use std::fmt;

/// Index of a record in a schema graph's struct table.
///
/// Only meaningful for the graph that produced it; the same struct has different
/// ids in a file schema and the current schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(u32);

impl StructId {
    /// Creates a new `StructId`.
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the value as a table index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructId({})", self.0)
    }
}

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle from a member back to its owner: owner id plus position in its member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Owning struct.
    pub owner: StructId,
    /// Position in the owner's member list.
    pub index: u32,
}
