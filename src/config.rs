//! Load and save options.
//!
//! Both structs serialize with serde so tools can keep them in a config file.
//! Every diagnostic switch is off by default and none of them changes what a load
//! produces.

use serde::{Deserialize, Serialize};

use crate::format::Platform;

/// Default for [`LoadOptions::max_element_size`].
pub const DEFAULT_MAX_ELEMENT_SIZE: usize = 65535;

/// Options for one load session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Layout objects are produced in. Defaults to the running process.
    pub platform: Platform,
    /// Run the pairwise duplicate-hash check on the embedded schema.
    pub check_duplicate_keys: bool,
    /// After casting, verify that regions with no counterpart member are still zero.
    pub strict_zero_check: bool,
    /// Warn about every object dropped because its struct is unknown to one side.
    pub log_dropped_objects: bool,
    /// Trace-log a hex dump of every chunk payload as it is read.
    pub dump_chunks: bool,
    /// Trace-log destination buffers before and after each object is cast.
    pub dump_casts: bool,
    /// Debug-log a side-by-side comparison of both schemas.
    pub compare_schemas: bool,
    /// Largest struct instance, in bytes, the caster accepts.
    pub max_element_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            platform: Platform::NATIVE,
            check_duplicate_keys: false,
            strict_zero_check: false,
            log_dropped_objects: false,
            dump_chunks: false,
            dump_casts: false,
            compare_schemas: false,
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

impl LoadOptions {
    /// Options targeting `platform`.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }
}

/// Options for writing a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Layout the application's object bytes are in, recorded in the file header.
    pub platform: Platform,
    /// Compressor id for the whole-stream envelope; 0 writes a plain stream.
    pub compression: u8,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            platform: Platform::NATIVE,
            compression: 0,
        }
    }
}

impl SaveOptions {
    /// Options writing for `platform`.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    /// Selects a compressor.
    pub fn with_compression(mut self, id: u8) -> Self {
        self.compression = id;
        self
    }
}
