//! # Driftfile
//!
//! A self-describing binary persistence engine for graphs of native structs that
//! keeps reading old files while the structs evolve.
//!
//! ## Overview
//!
//! Every Driftfile stream embeds a binary *schema* describing each struct layout
//! as it existed in the build that wrote it. At load time that embedded schema
//! is compared against the application's current schema, and every stored
//! object is converted member by member into the current layout. Conversion
//! holds across four independent axes at once:
//!
//! *   **Address width:** streams written with 4-byte addresses load into an
//!     8-byte layout and vice versa.
//! *   **Byte order:** big and little endian streams load on either.
//! *   **Type promotion:** a member that changed between numeric types (say
//!     `int` to `double`) is cast element-wise.
//! *   **Layout drift:** members can be reordered, added or removed. They are
//!     matched by a structural *search key*, never by position; new members
//!     stay zero and removed ones are skipped.
//!
//! Stored addresses are meaningless outside the file that produced them. The
//! loader treats them as keys into a session table and rewrites every pointer
//! member to the *load address* of the object it named.
//!
//! ## Architecture
//!
//! ### File Format
//!
//! ```text
//! [File Header] [Chunk] [Chunk] ... [DNA1 Chunk] [ENDB Chunk]
//! ```
//!
//! The file header carries the application signature, the writer's address
//! width and byte order, and a version. Each chunk is a fixed header
//! (`code`, `length`, `address`, `structId`, `count`) followed by `count`
//! struct instances in the writer's layout. See [`format`] and [`chunk`].
//!
//! ### Schema Graph
//!
//! [`schema::SchemaGraph`] compiles a schema blob into struct and member
//! descriptors: sizes by fixed-point iteration, cumulative offsets with
//! alignment diagnostics, search keys, and a flattened list of castable leaves
//! per struct. Problems are aggregated into a [`schema::LinkStatus`] bitmask so
//! a single compile surfaces all of them.
//!
//! ### Loader
//!
//! [`Loader`] runs the load state machine: header, current schema, schema
//! prescan, embedded schema, chunk ingestion, then the relink pass
//! ([`relink`]) that casts members and rewrites addresses.
//!
//! ### Application
//!
//! The engine never interprets objects. An [`Application`] supplies its
//! signature and current schema blob, is notified of each relinked object, and
//! emits its live objects at save time.
//!
//! ## Usage
//!
//! ```rust
//! use driftfile::{Application, Drift, LoadOptions, ObjectWriter, SaveOptions};
//! use driftfile::format::{ChunkCode, Platform};
//! use driftfile::schema::SchemaBuilder;
//!
//! struct Points {
//!     schema: Vec<u8>,
//!     data: Vec<u8>,
//!     seen: usize,
//! }
//!
//! impl Application for Points {
//!     fn signature(&self) -> [u8; 7] {
//!         *b"POINTS1"
//!     }
//!     fn schema_blob(&self) -> &[u8] {
//!         &self.schema
//!     }
//!     fn object_linked(&mut self, _object: &driftfile::LinkedObject<'_>) {
//!         self.seen += 1;
//!     }
//!     fn write_objects(&self, w: &mut ObjectWriter<'_>) -> driftfile::Result<()> {
//!         w.write_struct(ChunkCode::new("PT")?, "Point", 0x1000, 2, &self.data)
//!     }
//! }
//!
//! let mut builder = SchemaBuilder::new();
//! builder.add_struct("Point", &[("int", "x"), ("int", "y")])?;
//! let schema = builder.build(Platform::NATIVE)?;
//!
//! let data: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_ne_bytes()).collect();
//! let mut app = Points { schema, data, seen: 0 };
//! let bytes = Drift::to_bytes(&app, &SaveOptions::default())?;
//! let loader = Drift::load_bytes(&bytes, &mut app, LoadOptions::default())?;
//! assert_eq!(loader.objects()[0].data(), &app.data[..]);
//! assert_eq!(app.seen, 1);
//! # Ok::<(), driftfile::DriftError>(())
//! ```
//!
//! ## Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` is the read-only file map in [`io`].
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** every failure is a [`DriftError`], collapsible into
//!   the closed [`Status`] set.
//! * **Logging:** the `log` facade is used throughout; no logger is installed.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod app;
pub mod atomic;
pub mod chunk;
pub mod compression;
pub mod config;
pub mod endian;
pub mod error;
pub mod format;
pub mod hash;
pub mod inspector;
pub mod loader;
pub mod relink;
pub mod schema;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod io;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, NoCompression};

pub use api::Drift;
pub use app::{Application, LinkedObject, ObjectWriter};
pub use atomic::AtomicType;
pub use config::{LoadOptions, SaveOptions};
pub use error::{DriftError, Result, Status};
pub use inspector::DriftInspector;
pub use loader::{LoadStage, Loader};
