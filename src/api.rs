//! High-level entry points.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::app::{Application, ObjectWriter};
use crate::chunk::ChunkHeader;
use crate::compression::CompressorRegistry;
use crate::config::{LoadOptions, SaveOptions};
use crate::error::{DriftError, Result};
use crate::format::{ChunkCode, FileHeader};
use crate::io::ChunkWriter;
use crate::loader::Loader;
use crate::schema::SchemaGraph;

/// The main entry point for saving and loading streams.
#[derive(Debug)]
pub struct Drift;

impl Drift {
    /// Saves the application's objects to a file.
    pub fn save<A, P>(path: P, app: &A, options: &SaveOptions) -> Result<()>
    where
        A: Application + ?Sized,
        P: AsRef<Path>,
    {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write(&mut writer, app, options)?;
        writer.flush()?;
        Ok(())
    }

    /// Writes a complete stream to `writer`. Returns the number of bytes written.
    pub fn write<W, A>(mut writer: W, app: &A, options: &SaveOptions) -> Result<u64>
    where
        W: Write,
        A: Application + ?Sized,
    {
        let bytes = Self::to_bytes(app, options)?;
        writer.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Builds a complete stream in memory.
    ///
    /// The stream is: file header, the application's objects, the schema chunk
    /// and the end chunk, optionally wrapped in a compression envelope.
    pub fn to_bytes<A: Application + ?Sized>(app: &A, options: &SaveOptions) -> Result<Vec<u8>> {
        let platform = options.platform;
        let blob = app.schema_blob();
        let schema = SchemaGraph::parse(blob.to_vec(), platform)?;
        schema.ensure_linked()?;

        let mut chunks = ChunkWriter::new(Vec::new(), platform);
        chunks.write_file_header(&FileHeader {
            signature: app.signature(),
            platform,
            version: app.version(),
        })?;

        {
            let mut objects = ObjectWriter::new(&mut chunks, &schema);
            app.write_objects(&mut objects)?;
        }

        let schema_len = u32::try_from(blob.len())
            .map_err(|_| DriftError::Schema("schema blob exceeds 4 GiB".into()))?;
        let dna = ChunkHeader::new(ChunkCode::SCHEMA, schema_len, 0, 0, 1);
        chunks.write_chunk(&dna, blob)?;
        chunks.write_chunk(&ChunkHeader::new(ChunkCode::END, 0, 0, 0, 1), &[])?;
        log::debug!(
            "saved {} chunks, {} bytes",
            chunks.chunks_written(),
            chunks.current_offset()
        );

        let stream = chunks.into_inner();
        CompressorRegistry::new().wrap(options.compression, &stream)
    }

    /// Loads a file into a fresh session.
    pub fn load<P, A>(path: P, app: &mut A, options: LoadOptions) -> Result<Loader>
    where
        P: AsRef<Path>,
        A: Application + ?Sized,
    {
        let mut loader = Loader::new(options);
        loader.load_file(path, app)?;
        Ok(loader)
    }

    /// Loads an in-memory stream into a fresh session.
    pub fn load_bytes<A: Application + ?Sized>(
        data: &[u8],
        app: &mut A,
        options: LoadOptions,
    ) -> Result<Loader> {
        let mut loader = Loader::new(options);
        loader.load_bytes(data, app)?;
        Ok(loader)
    }
}
