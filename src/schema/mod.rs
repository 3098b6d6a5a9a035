//! The struct/member graph and the blob format it is compiled from.
//!
//! A schema blob describes every struct layout as it existed in the build that
//! wrote a stream. [`SchemaGraph::parse`] turns it into descriptors with computed
//! sizes, offsets and search keys; [`SchemaBuilder`] produces blobs.
//!
//! Two graphs built from independently evolved declarations are matched by
//! search key, never by position:
//!
//! ```rust
//! use driftfile::format::Platform;
//! use driftfile::schema::{SchemaBuilder, SchemaGraph};
//!
//! let mut old = SchemaBuilder::new();
//! old.add_struct("Point", &[("int", "x"), ("int", "y")])?;
//! let mut new = SchemaBuilder::new();
//! new.add_struct("Point", &[("double", "y"), ("double", "x")])?;
//!
//! let p = Platform::NATIVE;
//! let a = SchemaGraph::parse(old.build(p)?, p)?;
//! let b = SchemaGraph::parse(new.build(p)?, p)?;
//! let (pa, pb) = (a.find_struct("Point").unwrap(), b.find_struct("Point").unwrap());
//! for leaf in pb.leaves() {
//!     assert!(pa.leaf_by_key(leaf.key).is_some());
//! }
//! # Ok::<(), driftfile::DriftError>(())
//! ```

mod builder;
mod decl;
mod graph;
mod id;
mod model;

pub use builder::SchemaBuilder;
pub use decl::Declarator;
pub use graph::SchemaGraph;
pub use id::{MemberRef, StructId};
pub use model::{Leaf, LinkStatus, Member, NameEntry, Struct, StructFlags, TypeEntry};
