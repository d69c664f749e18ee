use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Scratch stream that stages one dirty entry's payload until the archive is
/// rebuilt.
///
/// The access pattern is strictly sequential: write everything, `rewind`,
/// then read everything back. There is deliberately no `Seek` implementation;
/// a compressed payload cannot be repositioned without re-deriving codec
/// state. Rewinding is crate-private and used only by the entry read-back and
/// rebuild paths.
///
/// The default backing is an anonymous temporary file that the OS removes
/// when the value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    len: u64,
    rewound: bool,
}

impl StagedFile {
    /// Creates a staged file backed by an anonymous temporary file.
    pub fn new() -> io::Result<Self> {
        Ok(StagedFile {
            file: tempfile::tempfile()?,
            len: 0,
            rewound: false,
        })
    }

    /// Creates a staged file at an explicit path.
    /// Unlike `new`, the backing file is kept when the value is dropped.
    pub fn at_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(StagedFile {
            file,
            len: 0,
            rewound: false,
        })
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resets the stream to offset 0 and switches it to the reading phase.
    /// Further writes fail.
    pub(crate) fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.rewound = true;
        Ok(())
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.rewound {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "staged file was already rewound for reading",
            ));
        }
        let written = self.file.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Read for StagedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.rewound {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "staged file must be rewound before reading",
            ));
        }
        self.file.read(buf)
    }
}
