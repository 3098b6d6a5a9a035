//! Optional whole-stream compression.
//!
//! A compressed stream is wrapped in a small envelope:
//!
//! `magic "DRFZ"(4) | compressor id(1) | body`
//!
//! Id 0 is the pass-through codec and is never written as an envelope; the
//! loader sees an envelope only when a real compressor was chosen at save time.
//! Anything that does not start with the magic is a plain stream, and so is a
//! stream that opens with a well-formed file header, since an application
//! signature may itself begin with the magic.

use crate::error::{DriftError, Result};
use crate::format::{FileHeader, SIGNATURE_LEN};
use std::borrow::Cow;

/// Envelope magic.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"DRFZ";

/// Envelope size before the body.
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Interface for compression algorithms.
///
/// Each compressor is identified by the id byte stored in the envelope.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Envelope id. 0 is reserved for no compression.
    fn id(&self) -> u8;

    /// Compresses the data.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

/// Pass-through codec (id 0).
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn id(&self) -> u8 {
        0
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(feature = "lz4_flex")]
/// LZ4 block codec (id 1), available with the `lz4_flex` feature.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn id(&self) -> u8 {
        1
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let vec = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| DriftError::Compression(e.to_string()))?;
        Ok(Cow::Owned(vec))
    }
}

/// Maps envelope ids to compressors.
#[derive(Debug)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Box<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Creates a registry with the built-in codecs.
    ///
    /// *   ID 0: `NoCompression`
    /// *   ID 1: `Lz4Compressor` (if `lz4_flex` feature is enabled)
    pub fn new() -> Self {
        let mut reg = Self {
            algorithms: (0..8).map(|_| None).collect(),
        };
        reg.register(Box::new(NoCompression));
        #[cfg(feature = "lz4_flex")]
        reg.register(Box::new(Lz4Compressor));
        reg
    }

    /// Registers a compressor in the slot named by its id, replacing any previous one.
    pub fn register(&mut self, algo: Box<dyn Compressor>) {
        let id = usize::from(algo.id());
        if id >= self.algorithms.len() {
            self.algorithms.resize_with(id + 1, || None);
        }
        if let Some(slot) = self.algorithms.get_mut(id) {
            *slot = Some(algo);
        }
    }

    /// Retrieves a compressor by id.
    ///
    /// # Errors
    /// Returns `DriftError::Compression` if the id is not registered.
    pub fn get(&self, id: u8) -> Result<&dyn Compressor> {
        self.algorithms
            .get(usize::from(id))
            .and_then(|opt| opt.as_deref())
            .ok_or_else(|| {
                DriftError::Compression(format!(
                    "Algorithm ID {id} is not registered or available"
                ))
            })
    }

    /// Wraps a complete stream. Id 0 returns the stream unchanged.
    pub fn wrap(&self, id: u8, stream: &[u8]) -> Result<Vec<u8>> {
        if id == 0 {
            return Ok(stream.to_vec());
        }
        let body = self.get(id)?.compress(stream)?;
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE + body.len());
        out.extend_from_slice(&ENVELOPE_MAGIC);
        out.push(id);
        out.extend_from_slice(&body);
        log::debug!(
            "compressed stream {} -> {} bytes with codec {id}",
            stream.len(),
            out.len()
        );
        Ok(out)
    }

    /// Removes the envelope if there is one.
    ///
    /// With `signature`, only a plain header carrying that signature counts as
    /// a plain stream; without it, any well-formed header does.
    pub fn unwrap_stream<'a>(
        &self,
        data: &'a [u8],
        signature: Option<&[u8; SIGNATURE_LEN]>,
    ) -> Result<Cow<'a, [u8]>> {
        if !is_enveloped(data, signature) {
            return Ok(Cow::Borrowed(data));
        }
        let id = data[ENVELOPE_MAGIC.len()];
        let body = &data[ENVELOPE_HEADER_SIZE..];
        let plain = self.get(id)?.decompress(body)?;
        Ok(Cow::Owned(plain.into_owned()))
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `data` starts with a compression envelope rather than a plain
/// file header. See [`CompressorRegistry::unwrap_stream`] for `signature`.
pub fn is_enveloped(data: &[u8], signature: Option<&[u8; SIGNATURE_LEN]>) -> bool {
    if data.len() < ENVELOPE_HEADER_SIZE || data[..4] != ENVELOPE_MAGIC {
        return false;
    }
    match FileHeader::from_bytes(data) {
        Ok(header) => signature.is_some_and(|sig| header.signature != *sig),
        Err(_) => true,
    }
}
