use std::io::{Read, Result, Write};

/// Wraps an existing reader and calculates CRC32 and byte count while reading
/// from it.
#[derive(Debug)]
pub struct CrcReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    bytes_read: u64,
}

impl<R> CrcReader<R> {
    pub fn new(inner: R) -> Self {
        CrcReader {
            inner,
            hasher: crc32fast::Hasher::new(),
            bytes_read: 0,
        }
    }

    pub fn crc32(&self) -> u32 {
        // Cloning as a workaround -- finalize consumes, but we only have the hasher borrowed
        self.hasher.clone().finalize()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.inner.read(buf)?;
        self.hasher.update(&buf[..size]);
        self.bytes_read += size as u64;
        Ok(size)
    }
}

/// Wraps an existing writer and calculates CRC32 and byte count of the data
/// passing through it.
#[derive(Debug)]
pub struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    bytes_written: u64,
}

impl<W> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        CrcWriter {
            inner,
            hasher: crc32fast::Hasher::new(),
            bytes_written: 0,
        }
    }

    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let size = self.inner.write(buf)?;
        self.hasher.update(&buf[..size]);
        self.bytes_written += size as u64;
        Ok(size)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
