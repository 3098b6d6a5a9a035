//! Centralized error handling for Driftfile.
//!
//! Every failure the engine can produce is a [`DriftError`]. Library code never
//! panics: problems found while parsing a stream, compiling a schema or relinking
//! objects are propagated through [`Result`], and the load state machine stops on
//! the first fatal one.
//!
//! ## Status codes
//!
//! Callers that only care about *what kind* of failure happened can collapse any
//! error into the closed [`Status`] set with [`DriftError::status`]. This is the
//! value reported by [`crate::loader::LoadStage::Failed`].
//!
//! ## Error Categories
//!
//! - **Stream I/O** ([`DriftError::Io`]): open/read/seek failures.
//! - **Structural validation** ([`DriftError::Header`], [`DriftError::Chunk`],
//!   [`DriftError::DuplicateAddress`], [`DriftError::MissingSchema`]).
//! - **Schema integrity** ([`DriftError::Schema`], [`DriftError::Link`]).
//! - **Cast safety** ([`DriftError::UnsupportedAddressWidth`],
//!   [`DriftError::ElementTooLarge`], [`DriftError::Overflow`]).
//!
//! ## Usage
//!
//! ```rust
//! use driftfile::{DriftError, Status};
//!
//! fn describe(err: &DriftError) -> &'static str {
//!     match err.status() {
//!         Status::DuplicateAddress => "two chunks claim the same address",
//!         Status::SchemaLink => "the embedded schema does not compile",
//!         _ => "other failure",
//!     }
//! }
//! # assert_eq!(describe(&DriftError::DuplicateAddress(0x10)), "two chunks claim the same address");
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::chunk::ChunkStatus;
use crate::schema::LinkStatus;

/// A specialized `Result` type for Driftfile operations.
pub type Result<T> = std::result::Result<T, DriftError>;

/// The closed set of status codes a load or save can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Status {
    /// Stream open/read/seek failure.
    Io,
    /// The file header is malformed or belongs to another application.
    InvalidHeader,
    /// A chunk length or count is out of bounds.
    InvalidLength,
    /// The stream ended inside a chunk header or payload.
    InvalidRead,
    /// A chunk code contains bytes outside `[A-Za-z0-9_ ]`.
    CodeError,
    /// Two chunks were saved with the same address.
    DuplicateAddress,
    /// No schema chunk was found before the end of the stream.
    MissingSchema,
    /// The schema blob is truncated or has a bad section tag.
    InvalidSchema,
    /// The schema graph failed to link (undefined types, size mismatch, hash collisions).
    SchemaLink,
    /// An address width other than 4 or 8 bytes, or a load address that does not fit.
    UnsupportedAddressWidth,
    /// A struct instance exceeds the configured maximum element size.
    ElementTooLarge,
    /// A member region expected to stay zero was written (internal overflow).
    OverflowCheck,
    /// The compression envelope could not be decoded.
    Compression,
    /// Logic error inside the engine.
    Internal,
}

/// The master error enum covering all failure domains in Driftfile.
///
/// The type is `Clone` so that a failed session can keep its error around for
/// later inspection; I/O errors are shared through an `Arc`.
#[derive(Debug, Clone)]
pub enum DriftError {
    /// Low-level I/O failure.
    Io(Arc<io::Error>),

    /// The 12-byte file header could not be accepted.
    Header(String),

    /// A chunk header failed validation.
    Chunk {
        /// Which validation rule failed.
        status: ChunkStatus,
        /// Stream offset of the offending header.
        offset: u64,
    },

    /// A stored address was claimed by more than one chunk.
    DuplicateAddress(u64),

    /// The stream holds no schema chunk.
    MissingSchema,

    /// The schema blob is structurally malformed (bad tag, truncation, bad index).
    Schema(String),

    /// The schema parsed but failed to link; the bitmask carries every problem found.
    Link(LinkStatus),

    /// Address width not representable (marker, option or load address overflow).
    UnsupportedAddressWidth(u64),

    /// A struct instance is larger than the configured cast limit.
    ElementTooLarge {
        /// Size of the offending element in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The strict zero check found bytes in a region no member cast should touch.
    Overflow {
        /// Struct whose instance failed the check.
        structure: String,
        /// Byte offset inside the instance.
        offset: usize,
    },

    /// Compression envelope failure.
    Compression(String),

    /// Logic error in the engine. Should not occur.
    Internal(String),
}

impl DriftError {
    /// Collapses this error into its [`Status`] code.
    pub fn status(&self) -> Status {
        match self {
            Self::Io(_) => Status::Io,
            Self::Header(_) => Status::InvalidHeader,
            Self::Chunk { status, .. } => match status {
                ChunkStatus::InvalidRead => Status::InvalidRead,
                ChunkStatus::CodeError => Status::CodeError,
                ChunkStatus::InvalidLength | ChunkStatus::Ok => Status::InvalidLength,
            },
            Self::DuplicateAddress(_) => Status::DuplicateAddress,
            Self::MissingSchema => Status::MissingSchema,
            Self::Schema(_) => Status::InvalidSchema,
            Self::Link(_) => Status::SchemaLink,
            Self::UnsupportedAddressWidth(_) => Status::UnsupportedAddressWidth,
            Self::ElementTooLarge { .. } => Status::ElementTooLarge,
            Self::Overflow { .. } => Status::OverflowCheck,
            Self::Compression(_) => Status::Compression,
            Self::Internal(_) => Status::Internal,
        }
    }
}

impl fmt::Display for DriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Header(s) => write!(f, "Header Error: {s}"),
            Self::Chunk { status, offset } => {
                write!(f, "Chunk Error: {status:?} at offset {offset}")
            }
            Self::DuplicateAddress(addr) => {
                write!(f, "Duplicate Address: 0x{addr:x} stored by more than one chunk")
            }
            Self::MissingSchema => write!(f, "Schema Error: no schema chunk in stream"),
            Self::Schema(s) => write!(f, "Schema Error: {s}"),
            Self::Link(status) => write!(f, "Schema Link Error: {status}"),
            Self::UnsupportedAddressWidth(w) => write!(f, "Unsupported Address Width: {w}"),
            Self::ElementTooLarge { size, max } => {
                write!(f, "Element Too Large: {size} bytes exceeds limit of {max}")
            }
            Self::Overflow { structure, offset } => {
                write!(f, "Overflow Check Failed: {structure} +{offset} is not zero")
            }
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for DriftError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DriftError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
