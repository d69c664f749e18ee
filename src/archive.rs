use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use assert2::assert;
use tracing::{debug, info, warn};

use crate::compression::{compressor_for, method, CompressWriter};
use crate::crc_filter::{CrcReader, CrcWriter};
use crate::error::{Error, Result};
use crate::records::{read_packed, EntryRecord, Eocd};
use crate::staging::StagedFile;
use crate::structs::{DosDatetime, LocalFileHeader};
use crate::tree::{normalize_name, EntryTree, NodeKind};

/// Access mode of an open archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing archive, read only. The central directory is parsed eagerly.
    Read,
    /// Fresh archive, write only. Starts empty, no existing entries are visible.
    Write,
    /// Existing archive, read and modify. Modifications are tracked in memory
    /// and only hit the disk during the rebuild on close.
    ReadWrite,
}

/// Byte stream an archive can live on.
pub trait ArchiveStream: Read + Write + Seek {}
impl<T: Read + Write + Seek> ArchiveStream for T {}

enum Storage {
    /// Opened by the archive itself from a path; rebuild goes through a
    /// sibling file and an atomic swap.
    File { path: PathBuf, file: File },
    /// Supplied by the caller; rebuild writes in place from offset 0.
    Stream(Box<dyn ArchiveStream>),
}

impl Storage {
    fn stream(&mut self) -> &mut dyn ArchiveStream {
        match self {
            Storage::File { file, .. } => file,
            Storage::Stream(stream) => stream.as_mut(),
        }
    }
}

struct DirtyEntry {
    record: usize,
    staged: StagedFile,
}

/// Per-entry progress of a rebuild, as reported to the callback installed
/// with [`Archive::on_rebuild_progress`].
#[derive(Clone, Copy, Debug)]
pub struct RebuildProgress {
    pub entries_done: usize,
    pub entries_total: usize,
}

type ProgressCallback = Box<dyn FnMut(RebuildProgress)>;

/// What a name resolves to inside an archive.
#[derive(Debug)]
pub enum Lookup<'a> {
    File(&'a EntryRecord),
    Directory,
}

/// Streaming reader over one entry's decompressed payload.
///
/// All data flows through a CRC filter; after reading to the end,
/// [`EntryReader::crc_matches`] tells whether the payload matched the stored
/// CRC32 and size.
pub struct EntryReader<'a> {
    inner: CrcReader<Box<dyn Read + 'a>>,
    expected_crc32: u32,
    expected_size: u32,
}

impl fmt::Debug for EntryReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryReader")
            .field("expected_crc32", &self.expected_crc32)
            .field("expected_size", &self.expected_size)
            .finish_non_exhaustive()
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl EntryReader<'_> {
    pub fn expected_crc32(&self) -> u32 {
        self.expected_crc32
    }

    pub fn uncompressed_size(&self) -> u32 {
        self.expected_size
    }

    /// Whether the data read so far matches the stored CRC32 and size.
    /// Only meaningful once the reader has been drained to the end.
    pub fn crc_matches(&self) -> bool {
        self.inner.crc32() == self.expected_crc32
            && self.inner.bytes_read() == self.expected_size as u64
    }
}

/// Write side of one entry, handed out by [`Archive::writer`].
///
/// Data is compressed and staged into a scratch file as it is written; the
/// entry only becomes part of the archive once the writer is passed back to
/// [`Archive::finish`]. Dropping the writer instead abandons the entry.
pub struct EntryWriter {
    sink: CrcWriter<Box<dyn CompressWriter>>,
    record_index: usize,
}

impl fmt::Debug for EntryWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryWriter")
            .field("record_index", &self.record_index)
            .finish_non_exhaustive()
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// A zip archive with in-memory dirty tracking and rebuild-on-close.
///
/// All operations are synchronous and blocking; the archive itself is not
/// internally synchronized and concurrent use must be serialized by the
/// embedder.
pub struct Archive {
    storage: Storage,
    mode: OpenMode,
    /// Every record ever seen or created, in rebuild order. Deleted records
    /// stay in place flagged, the tree just stops referencing them.
    records: Vec<EntryRecord>,
    tree: EntryTree,
    /// Staged payloads of entries that were written but not yet rebuilt into
    /// the archive. Holds only live records.
    dirty: Vec<DirtyEntry>,
    comment: Vec<u8>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("mode", &self.mode)
            .field("records", &self.records)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Opens (or for `Write` mode creates) an archive at `path`.
    ///
    /// For `Read` and `ReadWrite` the central directory is parsed eagerly and
    /// any format error fails the whole open.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = match mode {
            OpenMode::Read => File::open(&path)?,
            OpenMode::Write => File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?,
            OpenMode::ReadWrite => File::options().read(true).write(true).open(&path)?,
        };
        debug!(path = %path.display(), ?mode, "opening archive");
        Self::with_storage(Storage::File { path, file }, mode)
    }

    /// Opens an archive over a caller-supplied stream.
    ///
    /// `ReadWrite` is rejected here: an in-place rewrite cannot truncate a
    /// generic stream, and a shrinking archive would leave a stale tail.
    /// A `Write` mode stream is rebuilt in place from offset 0 on close.
    pub fn from_stream<S: ArchiveStream + 'static>(stream: S, mode: OpenMode) -> Result<Self> {
        if mode == OpenMode::ReadWrite {
            return Err(Error::StreamReadWriteUnsupported);
        }
        Self::with_storage(Storage::Stream(Box::new(stream)), mode)
    }

    fn with_storage(storage: Storage, mode: OpenMode) -> Result<Self> {
        let mut archive = Archive {
            storage,
            mode,
            records: Vec::new(),
            tree: EntryTree::new(),
            dirty: Vec::new(),
            comment: Vec::new(),
            progress: None,
        };
        if mode != OpenMode::Write {
            archive.read_central_directory()?;
        }
        Ok(archive)
    }

    fn read_central_directory(&mut self) -> Result<()> {
        let eocd = {
            let stream = self.storage.stream();
            let eocd = Eocd::find(stream)?;
            stream.seek(SeekFrom::Start(eocd.cd_offset as u64))?;
            eocd
        };
        debug!(entries = eocd.entry_count, "parsing central directory");

        for _ in 0..eocd.entry_count {
            let record = EntryRecord::read_from(self.storage.stream())?;
            let index = self.records.len();
            if record.is_dir_entry() {
                self.tree.insert_dir(&record.name)?;
            } else {
                self.tree.insert_file(&record.name, index)?;
            }
            self.records.push(record);
        }
        self.comment = eocd.comment;
        Ok(())
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Number of live, non-directory entries.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the live, non-directory entry records.
    pub fn entries(&self) -> impl Iterator<Item = &EntryRecord> {
        self.records
            .iter()
            .filter(|r| !r.status.deleted && !r.is_dir_entry())
    }

    /// Resolves a name to a file record or a directory.
    pub fn entry(&self, name: &str) -> Option<Lookup<'_>> {
        let name = normalize_name(name).ok()?;
        match self.tree.lookup(&name)? {
            NodeKind::File(index) => Some(Lookup::File(&self.records[index])),
            NodeKind::Directory => Some(Lookup::Directory),
        }
    }

    /// The archive comment carried in the end of central directory record.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<()> {
        if comment.len() > u16::MAX as usize {
            return Err(Error::ArchiveTooLarge);
        }
        self.comment = comment;
        Ok(())
    }

    /// Installs a callback that receives per-entry progress while the rebuild
    /// on close runs. The rebuild itself stays synchronous.
    pub fn on_rebuild_progress(&mut self, callback: impl FnMut(RebuildProgress) + 'static) {
        self.progress = Some(Box::new(callback));
    }

    /// Logs every live central directory record, for diagnostics.
    pub fn dump_central_directory(&self) {
        info!(entries = self.len(), "central directory");
        for record in self.records.iter().filter(|r| !r.status.deleted) {
            info!(
                name = %record.name,
                method = record.method,
                crc32 = format_args!("{:08x}", record.crc32),
                compressed = record.compressed_size,
                uncompressed = record.uncompressed_size,
                offset = record.local_header_offset,
                dirty = record.status.dirty,
                open = record.status.open,
                "entry"
            );
        }
    }

    /// Opens one entry for reading.
    ///
    /// Dirty entries read back from their staged payload, clean ones from the
    /// archive stream. Encrypted entries are rejected, AES ones with a
    /// distinct error. Entries currently open for writing cannot be read.
    pub fn reader(&mut self, name: &str) -> Result<EntryReader<'_>> {
        if self.mode == OpenMode::Write {
            return Err(Error::WriteOnlyArchive);
        }
        let name = normalize_name(name)?;
        let index = match self.tree.lookup(&name) {
            None => return Err(Error::EntryNotFound { entry_name: name }),
            Some(NodeKind::Directory) => return Err(Error::EntryIsDirectory { entry_name: name }),
            Some(NodeKind::File(index)) => index,
        };

        let record = &self.records[index];
        if record.status.open {
            return Err(Error::EntryOpenForWrite { entry_name: name });
        }
        if record.is_aes() {
            return Err(Error::AesNotSupported { entry_name: name });
        }
        if record.is_encrypted() {
            return Err(Error::EncryptedEntry { entry_name: name });
        }

        let compressor = compressor_for(record.method)?;
        let expected_crc32 = record.crc32;
        let expected_size = record.uncompressed_size;
        let compressed_size = record.compressed_size as u64;
        let header_offset = record.local_header_offset as u64;

        let raw: Box<dyn Read + '_> = if record.status.dirty {
            let entry = self
                .dirty
                .iter_mut()
                .find(|d| d.record == index)
                .ok_or(Error::EntryNotFound {
                    entry_name: name.clone(),
                })?;
            entry.staged.rewind()?;
            Box::new(&mut entry.staged)
        } else {
            let stream = self.storage.stream();
            stream.seek(SeekFrom::Start(header_offset))?;
            let header: LocalFileHeader = read_packed(stream)?;
            if header.signature != LocalFileHeader::SIGNATURE {
                return Err(Error::BadSignature {
                    record: "local file header",
                    offset: header_offset,
                });
            }
            let skip = header.file_name_len as i64 + header.extra_field_len as i64;
            stream.seek(SeekFrom::Current(skip))?;
            Box::new(stream.take(compressed_size))
        };

        Ok(EntryReader {
            inner: CrcReader::new(compressor.decompress(raw)?),
            expected_crc32,
            expected_size,
        })
    }

    /// Opens one entry for writing.
    ///
    /// Any existing entry of that name is logically removed first; the new
    /// record is visible in the tree immediately but stays flagged open until
    /// the writer is passed to [`Archive::finish`].
    pub fn writer(&mut self, name: &str) -> Result<EntryWriter> {
        if self.mode == OpenMode::Read {
            return Err(Error::ReadOnlyArchive);
        }
        let name = normalize_name(name)?;
        if u16::try_from(name.len()).is_err() {
            return Err(Error::TooLongEntryName { entry_name: name });
        }

        match self.tree.lookup(&name) {
            Some(NodeKind::Directory) => {
                return Err(Error::EntryIsDirectory { entry_name: name });
            }
            Some(NodeKind::File(index)) => {
                if self.records[index].status.open {
                    return Err(Error::EntryOpenForWrite { entry_name: name });
                }
                self.remove_record(index, &name);
            }
            None => {}
        }

        let record = EntryRecord::new_for_write(name.clone());
        let compressor = compressor_for(record.method)?;
        let index = self.records.len();
        self.tree.insert_file(&name, index)?;
        self.records.push(record);

        let sink = compressor.compress(StagedFile::new()?)?;
        Ok(EntryWriter {
            sink: CrcWriter::new(sink),
            record_index: index,
        })
    }

    /// Finalizes an entry written through [`Archive::writer`].
    ///
    /// Copies the stats gathered while writing into the record, stamps the
    /// modification time from the wall clock and registers the staged payload
    /// for the rebuild. If the entry was deleted mid-write, the payload is
    /// discarded and this is a no-op success.
    pub fn finish(&mut self, writer: EntryWriter) -> Result<()> {
        let EntryWriter { sink, record_index } = writer;
        let crc32 = sink.crc32();
        let uncompressed = sink.bytes_written();
        let staged = sink.into_inner().finish()?;

        let record = &mut self.records[record_index];
        if record.status.deleted {
            // Deleting mid-write cancels the pending payload.
            return Ok(());
        }
        assert!(record.status.open, "finish called for an entry that is not open");

        if uncompressed > u32::MAX as u64 || staged.len() > u32::MAX as u64 {
            return Err(Error::ArchiveTooLarge);
        }
        record.crc32 = crc32;
        record.uncompressed_size = uncompressed as u32;
        record.compressed_size = staged.len() as u32;
        record.datetime = DosDatetime::now();
        if record.compressed_size == 0 && record.uncompressed_size == 0 {
            record.method = method::STORE;
        }
        record.status.open = false;
        record.status.dirty = true;

        self.dirty.push(DirtyEntry {
            record: record_index,
            staged,
        });
        Ok(())
    }

    /// Deletes one entry.
    ///
    /// Works on clean, dirty and mid-write entries; a pending staged payload
    /// is freed right away and a still-open writer is cancelled (its eventual
    /// `finish` becomes a no-op).
    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(Error::ReadOnlyArchive);
        }
        let name = normalize_name(name)?;
        match self.tree.lookup(&name) {
            None => Err(Error::EntryNotFound { entry_name: name }),
            Some(NodeKind::Directory) => Err(Error::EntryIsDirectory { entry_name: name }),
            Some(NodeKind::File(index)) => {
                self.remove_record(index, &name);
                Ok(())
            }
        }
    }

    fn remove_record(&mut self, index: usize, name: &str) {
        self.tree.remove_file(name);
        let record = &mut self.records[index];
        record.status.deleted = true;
        record.status.dirty = false;
        self.dirty.retain(|d| d.record != index);
    }

    /// Copies a file from disk into the archive.
    pub fn add_file(
        &mut self,
        disk_path: impl AsRef<Path>,
        zip_path: &str,
        replace: bool,
    ) -> Result<()> {
        let name = normalize_name(zip_path)?;
        if !replace && self.tree.lookup(&name).is_some() {
            return Err(Error::EntryExists { entry_name: name });
        }
        let mut source = File::open(disk_path)?;
        let mut writer = self.writer(&name)?;
        io::copy(&mut source, &mut writer)?;
        self.finish(writer)
    }

    /// Extracts one entry to disk, verifying its CRC on the way.
    ///
    /// Returns whether the payload matched the stored CRC32. A mismatch does
    /// not delete the output; trusting it is the caller's decision.
    pub fn extract_file(&mut self, zip_path: &str, disk_path: impl AsRef<Path>) -> Result<bool> {
        let mut out = File::create(disk_path)?;
        let mut reader = self.reader(zip_path)?;
        io::copy(&mut reader, &mut out)?;
        let crc_ok = reader.crc_matches();
        if !crc_ok {
            warn!(entry = zip_path, "CRC mismatch on extraction");
        }
        Ok(crc_ok)
    }

    /// Closes the archive, rebuilding it if the mode allows modifications.
    ///
    /// Dropping the archive without calling `close` discards all
    /// modifications.
    pub fn close(self) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Ok(());
        }
        let Archive {
            storage,
            mut records,
            mut dirty,
            comment,
            mut progress,
            ..
        } = self;

        match storage {
            Storage::Stream(mut stream) => {
                debug!("rebuilding archive in place");
                write_archive(
                    &mut records,
                    &mut dirty,
                    &comment,
                    &mut progress,
                    None,
                    stream.as_mut(),
                )
            }
            Storage::File { path, mut file } => {
                let new_path = path_with_suffix(&path, ".new");
                debug!(path = %new_path.display(), "rebuilding archive");
                let mut out = File::options()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&new_path)?;
                write_archive(
                    &mut records,
                    &mut dirty,
                    &comment,
                    &mut progress,
                    Some(&mut file),
                    &mut out,
                )?;
                out.sync_all()?;
                drop(out);
                drop(file);
                swap_into_place(&path, &new_path)
            }
        }
    }
}

/// Streams a complete archive into `out`: clean entries raw-copied from
/// `old`, dirty entries from their staged payloads, then the central
/// directory and the EOCD. Nothing is ever recompressed; clean payloads are
/// only relocated.
fn write_archive(
    records: &mut [EntryRecord],
    dirty: &mut [DirtyEntry],
    comment: &[u8],
    progress: &mut Option<ProgressCallback>,
    mut old: Option<&mut dyn ArchiveStream>,
    out: &mut dyn ArchiveStream,
) -> Result<()> {
    let entries_total = records
        .iter()
        .filter(|r| !r.status.deleted && !r.status.open)
        .count();
    if entries_total > u16::MAX as usize {
        return Err(Error::TooManyEntries);
    }
    let mut entries_done = 0;
    let mut report = |entries_done| {
        if let Some(callback) = progress.as_mut() {
            callback(RebuildProgress {
                entries_done,
                entries_total,
            });
        }
    };

    out.seek(SeekFrom::Start(0))?;
    let mut offset: u64 = 0;

    // Pass 1: relocate clean entries from the old archive.
    for record in records.iter_mut() {
        if record.status.deleted || record.status.dirty {
            continue;
        }
        if record.status.open {
            // A writer was handed out but never finished; the entry was
            // never finalized and cannot be part of the rebuilt archive.
            warn!(entry = %record.name, "dropping entry whose writer was never finished");
            record.status.deleted = true;
            continue;
        }
        let old_stream = match old.as_deref_mut() {
            Some(stream) => stream,
            None => unreachable!("clean entries cannot exist in a freshly created archive"),
        };

        old_stream.seek(SeekFrom::Start(record.local_header_offset as u64))?;
        let header: LocalFileHeader = read_packed(old_stream)?;
        if header.signature != LocalFileHeader::SIGNATURE {
            return Err(Error::BadSignature {
                record: "local file header",
                offset: record.local_header_offset as u64,
            });
        }
        let skip = header.file_name_len as i64 + header.extra_field_len as i64;
        old_stream.seek(SeekFrom::Current(skip))?;

        record.local_header_offset =
            u32::try_from(offset).map_err(|_| Error::ArchiveTooLarge)?;
        record.write_local_header(out)?;
        let mut payload = (&mut *old_stream).take(record.compressed_size as u64);
        let copied = io::copy(&mut payload, out)?;
        if copied != record.compressed_size as u64 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload of {} is truncated", record.name),
            )));
        }

        offset += record.local_header_size() + copied;
        entries_done += 1;
        report(entries_done);
    }

    // Pass 2: append the dirty staged payloads.
    for entry in dirty.iter_mut() {
        let record = &mut records[entry.record];
        assert!(record.status.dirty, "dirty list out of sync with record flags");

        record.local_header_offset =
            u32::try_from(offset).map_err(|_| Error::ArchiveTooLarge)?;
        record.write_local_header(out)?;
        entry.staged.rewind()?;
        let copied = io::copy(&mut entry.staged, out)?;
        if copied != record.compressed_size as u64 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("staged payload of {} is truncated", record.name),
            )));
        }
        record.status.dirty = false;

        offset += record.local_header_size() + copied;
        entries_done += 1;
        report(entries_done);
    }

    // Central directory and EOCD, skipping deleted records.
    let cd_offset = u32::try_from(offset).map_err(|_| Error::ArchiveTooLarge)?;
    let mut entry_count: u16 = 0;
    for record in records.iter().filter(|r| !r.status.deleted) {
        record.write_to(out)?;
        entry_count += 1;
    }
    let cd_end = out.stream_position()?;
    let cd_size =
        u32::try_from(cd_end - cd_offset as u64).map_err(|_| Error::ArchiveTooLarge)?;

    Eocd {
        entry_count,
        cd_size,
        cd_offset,
        comment: comment.to_vec(),
    }
    .write_to(out)?;
    out.flush()?;

    debug!(entries = entry_count, cd_offset, cd_size, "rebuild finished");
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Replaces `path` with `new_path`, preferring a single atomic rename-over
/// and falling back to a two-step swap through a `.old` backup.
fn swap_into_place(path: &Path, new_path: &Path) -> Result<()> {
    if fs::rename(new_path, path).is_ok() {
        return Ok(());
    }

    let old_path = path_with_suffix(path, ".old");
    fs::rename(path, &old_path)?;
    fs::rename(new_path, path)?;
    if let Err(e) = fs::remove_file(&old_path) {
        warn!(path = %old_path.display(), error = %e, "could not remove backup");
    }
    Ok(())
}
