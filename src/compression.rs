use std::io::{Read, Write};
use std::sync::{Arc, LazyLock, RwLock};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::staging::StagedFile;

/// Compression method ids from the zip format.
pub mod method {
    pub const STORE: u16 = 0;
    pub const DEFLATE: u16 = 8;
    pub const BZIP2: u16 = 12;
    /// Marker method of the AES encryption convention. Recognized, never handled.
    pub const AES: u16 = 99;
}

/// Write side of a compressor: a codec stack whose final sink is a staged
/// file. `finish` flushes any remaining codec state and hands the sink back.
pub trait CompressWriter: Write {
    fn finish(self: Box<Self>) -> Result<StagedFile>;
}

/// One compression method plugin.
///
/// The archive treats every method as opaque and never special-cases one by
/// name; anything not found in the registry surfaces as
/// `Error::UnsupportedCompression`.
pub trait Compressor: Send + Sync {
    fn method(&self) -> u16;
    fn name(&self) -> &'static str;

    /// Wraps a raw payload stream in a decompressing adapter.
    fn decompress<'a>(&self, source: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>>;

    /// Wraps a staged sink in a compressing adapter.
    fn compress(&self, sink: StagedFile) -> Result<Box<dyn CompressWriter>>;
}

impl std::fmt::Debug for dyn Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("method", &self.method())
            .field("name", &self.name())
            .finish()
    }
}

/// Pass-through method 0.
struct StoreCompressor;

struct StoreWriter(StagedFile);

impl Write for StoreWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl CompressWriter for StoreWriter {
    fn finish(self: Box<Self>) -> Result<StagedFile> {
        Ok(self.0)
    }
}

impl Compressor for StoreCompressor {
    fn method(&self) -> u16 {
        method::STORE
    }

    fn name(&self) -> &'static str {
        "store"
    }

    fn decompress<'a>(&self, source: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(source)
    }

    fn compress(&self, sink: StagedFile) -> Result<Box<dyn CompressWriter>> {
        Ok(Box::new(StoreWriter(sink)))
    }
}

/// Deflate via flate2, method 8.
struct DeflateCompressor;

struct DeflateWriter(DeflateEncoder<StagedFile>);

impl Write for DeflateWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl CompressWriter for DeflateWriter {
    fn finish(self: Box<Self>) -> Result<StagedFile> {
        Ok(self.0.finish()?)
    }
}

impl Compressor for DeflateCompressor {
    fn method(&self) -> u16 {
        method::DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decompress<'a>(&self, source: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(DeflateDecoder::new(source)))
    }

    fn compress(&self, sink: StagedFile) -> Result<Box<dyn CompressWriter>> {
        Ok(Box::new(DeflateWriter(DeflateEncoder::new(
            sink,
            flate2::Compression::default(),
        ))))
    }
}

/// Table of compression method plugins, keyed by method id.
#[derive(Default)]
pub struct CompressorRegistry {
    by_method: IndexMap<u16, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    pub fn new() -> Self {
        CompressorRegistry::default()
    }

    /// A registry preloaded with the built-in methods (Store and Deflate).
    pub fn with_builtins() -> Self {
        let mut registry = CompressorRegistry::new();
        registry.register(Arc::new(StoreCompressor));
        registry.register(Arc::new(DeflateCompressor));
        registry
    }

    /// Registers a plugin. A later registration for the same method id
    /// replaces the earlier one.
    pub fn register(&mut self, compressor: Arc<dyn Compressor>) {
        self.by_method.insert(compressor.method(), compressor);
    }

    pub fn by_method(&self, method: u16) -> Option<Arc<dyn Compressor>> {
        self.by_method.get(&method).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.by_method
            .values()
            .find(|c| c.name() == name)
            .cloned()
    }
}

/// The process-wide registry. Built-ins are installed on first touch;
/// plugins registered through `register_compressor` are visible to every
/// archive in the process.
static REGISTRY: LazyLock<RwLock<CompressorRegistry>> =
    LazyLock::new(|| RwLock::new(CompressorRegistry::with_builtins()));

/// Registers a compression method plugin in the process-wide registry.
///
/// Registration is expected to happen at process start; lookups afterwards
/// are read-locked only.
pub fn register_compressor(compressor: Arc<dyn Compressor>) {
    REGISTRY
        .write()
        .expect("compressor registry lock poisoned")
        .register(compressor);
}

pub(crate) fn compressor_for(method: u16) -> Result<Arc<dyn Compressor>> {
    REGISTRY
        .read()
        .expect("compressor registry lock poisoned")
        .by_method(method)
        .ok_or(Error::UnsupportedCompression { method })
}
