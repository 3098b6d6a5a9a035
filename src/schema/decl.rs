//! Member declarator parsing.
//!
//! A declarator carries everything about a member that is not its type:
//! `*next` (pointer), `**items` (pointer to pointers), `name[32]` (array),
//! `mat[4][4]` (array of 16), `(*callback)()` (function pointer).

use std::ops::Range;

use crate::error::{DriftError, Result};
use crate::hash::hash_str;

/// Pointer depth and array shape of a member, plus its bare identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declarator {
    /// Byte range of the bare identifier inside the declarator string.
    pub base: Range<usize>,
    /// Hash of the bare identifier.
    pub base_hash: u64,
    /// Number of indirections. Function pointers count as one.
    pub pointer_depth: u8,
    /// Product of all array dimensions; 1 for scalars.
    pub array_len: u32,
    /// Declared as `(*name)(...)`.
    pub function_pointer: bool,
}

impl Declarator {
    /// Parses a declarator string.
    pub fn parse(decl: &str) -> Result<Self> {
        let bytes = decl.as_bytes();
        let malformed = |why: &str| DriftError::Schema(format!("declarator {decl:?}: {why}"));

        let mut pos = 0;
        let function_pointer = bytes.first() == Some(&b'(');
        if function_pointer {
            pos += 1;
        }

        let mut pointer_depth = 0u8;
        while pos < bytes.len() && bytes[pos] == b'*' {
            pointer_depth = pointer_depth.saturating_add(1);
            pos += 1;
        }

        let start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
            pos += 1;
        }
        let base = start..pos;
        if base.is_empty() {
            return Err(malformed("missing identifier"));
        }

        if function_pointer {
            if pointer_depth == 0 || bytes.get(pos) != Some(&b')') {
                return Err(malformed("function pointer must read (*name)(...)"));
            }
            return Ok(Self {
                base_hash: hash_str(&decl[base.clone()]),
                base,
                pointer_depth: 1,
                array_len: 1,
                function_pointer,
            });
        }

        let mut array_len = 1u32;
        while pos < bytes.len() {
            if bytes[pos] != b'[' {
                return Err(malformed("unexpected character after identifier"));
            }
            let close = decl[pos..]
                .find(']')
                .map(|i| pos + i)
                .ok_or_else(|| malformed("unterminated array dimension"))?;
            let dim: u32 = decl[pos + 1..close]
                .trim()
                .parse()
                .map_err(|_| malformed("array dimension is not a number"))?;
            if dim == 0 {
                return Err(malformed("zero array dimension"));
            }
            array_len = array_len
                .checked_mul(dim)
                .ok_or_else(|| malformed("array too large"))?;
            pos = close + 1;
        }

        Ok(Self {
            base_hash: hash_str(&decl[base.clone()]),
            base,
            pointer_depth,
            array_len,
            function_pointer,
        })
    }

    /// True when the member stores addresses.
    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }
}
