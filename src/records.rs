use std::io::{Read, Seek, SeekFrom, Write};

use packed_struct::PackedStructSlice;

use crate::compression::method;
use crate::error::{Error, Result};
use crate::structs::{
    CentralDirectoryHeader, DosDatetime, EndOfCentralDirectory, LocalFileHeader,
    PackedStructRezipExt, VersionMadeBy, VersionMadeByOs, GP_FLAG_DATA_DESCRIPTOR,
    GP_FLAG_ENCRYPTED,
};

/// Version needed to extract the store/deflate subset this crate writes.
const VERSION_TO_EXTRACT: u16 = 20;
/// External attributes of a fresh entry: a regular rw-r--r-- unix file.
const DEFAULT_EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;

pub(crate) fn read_packed<T: PackedStructSlice>(stream: &mut (impl Read + ?Sized)) -> Result<T> {
    let size = T::packed_bytes_size(None)?;
    let mut buf = vec![0u8; size];
    stream.read_exact(&mut buf)?;
    Ok(T::unpack_from_slice(&buf)?)
}

pub(crate) fn write_packed<T: PackedStructSlice>(stream: &mut (impl Write + ?Sized), value: &T) -> Result<()> {
    stream.write_all(&value.pack_to_vec()?)?;
    Ok(())
}

/// Status of an entry inside an open archive. Never persisted to disk, only
/// drives the rebuild logic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct EntryStatus {
    /// A writer for this entry exists and has not been finished yet.
    pub open: bool,
    /// The entry's payload lives in a staged file, not in the archive.
    pub dirty: bool,
    /// The entry is gone; rebuild skips it entirely.
    pub deleted: bool,
}

/// One central directory entry in its runtime form.
///
/// Mirrors the on-disk central directory header, with the name normalized to
/// forward slashes and an extra non-persisted [`EntryStatus`].
#[derive(Debug)]
pub struct EntryRecord {
    pub(crate) name: String,
    pub(crate) method: u16,
    pub(crate) gp_flags: u16,
    pub(crate) datetime: DosDatetime,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u32,
    pub(crate) uncompressed_size: u32,
    pub(crate) external_attributes: u32,
    pub(crate) local_header_offset: u32,
    pub(crate) status: EntryStatus,
}

impl EntryRecord {
    /// A fresh record for an entry about to be written. Stats and timestamp
    /// are filled in when the writer is finished.
    pub(crate) fn new_for_write(name: String) -> Self {
        EntryRecord {
            name,
            method: method::DEFLATE,
            gp_flags: 0,
            datetime: DosDatetime::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            external_attributes: DEFAULT_EXTERNAL_ATTRIBUTES,
            local_header_offset: 0,
            status: EntryStatus {
                open: true,
                ..EntryStatus::default()
            },
        }
    }

    /// Decodes one central directory entry at the current stream position.
    ///
    /// Extra fields and the comment are seeked over, not parsed; they are
    /// only needed when opening local headers, which are re-read separately.
    pub(crate) fn read_from<S: Read + Seek + ?Sized>(stream: &mut S) -> Result<Self> {
        let offset = stream.stream_position()?;
        let header: CentralDirectoryHeader = read_packed(stream)?;
        if header.signature != CentralDirectoryHeader::SIGNATURE {
            return Err(Error::BadSignature {
                record: "central directory header",
                offset,
            });
        }

        let mut name_buf = vec![0u8; header.file_name_len as usize];
        stream.read_exact(&mut name_buf)?;
        let name = String::from_utf8_lossy(&name_buf).replace('\\', "/");

        let skip = header.extra_field_len as i64 + header.file_comment_length as i64;
        stream.seek(SeekFrom::Current(skip))?;

        // Empty-file normalization: an empty payload is always stored.
        let method = if header.compressed_size == 0 && header.uncompressed_size == 0 {
            method::STORE
        } else {
            header.compression
        };

        Ok(EntryRecord {
            name,
            method,
            gp_flags: header.flags,
            datetime: DosDatetime::from_parts(header.last_mod_date, header.last_mod_time),
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            external_attributes: header.external_attributes,
            local_header_offset: header.local_header_offset,
            status: EntryStatus::default(),
        })
    }

    /// Encodes this record as a central directory entry.
    ///
    /// Extra fields are not persisted and the data descriptor flag is
    /// cleared; this crate always knows sizes before writing headers.
    pub(crate) fn write_to(&self, stream: &mut (impl Write + ?Sized)) -> Result<()> {
        let header = CentralDirectoryHeader {
            signature: CentralDirectoryHeader::SIGNATURE,
            version_made_by: VersionMadeBy {
                os: VersionMadeByOs::Unix,
                spec_version: 20,
            },
            version_to_extract: VERSION_TO_EXTRACT,
            flags: self.gp_flags & !GP_FLAG_DATA_DESCRIPTOR,
            compression: self.method,
            last_mod_time: self.datetime.time(),
            last_mod_date: self.datetime.date(),
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name_len: self.name.len() as u16,
            extra_field_len: 0,
            file_comment_length: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: self.external_attributes,
            local_header_offset: self.local_header_offset,
        };
        write_packed(stream, &header)?;
        stream.write_all(self.name.as_bytes())?;
        Ok(())
    }

    /// Emits a fresh local header for this record.
    pub(crate) fn write_local_header(&self, stream: &mut (impl Write + ?Sized)) -> Result<()> {
        let header = LocalFileHeader {
            signature: LocalFileHeader::SIGNATURE,
            version_to_extract: VERSION_TO_EXTRACT,
            flags: self.gp_flags & !GP_FLAG_DATA_DESCRIPTOR,
            compression: self.method,
            last_mod_time: self.datetime.time(),
            last_mod_date: self.datetime.date(),
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name_len: self.name.len() as u16,
            extra_field_len: 0,
        };
        write_packed(stream, &header)?;
        stream.write_all(self.name.as_bytes())?;
        Ok(())
    }

    /// Size of the local header this record writes, including the name.
    pub(crate) fn local_header_size(&self) -> u64 {
        LocalFileHeader::packed_size() + self.name.len() as u64
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression_method(&self) -> u16 {
        self.method
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u32 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    pub fn datetime(&self) -> DosDatetime {
        self.datetime
    }

    pub fn local_header_offset(&self) -> u32 {
        self.local_header_offset
    }

    /// Whether this record is an explicit directory entry (trailing slash
    /// convention). Directory entries carry no payload and are indexed as
    /// directories, not files.
    pub fn is_dir_entry(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.gp_flags & GP_FLAG_ENCRYPTED != 0
    }

    pub fn is_aes(&self) -> bool {
        self.method == method::AES
    }
}

/// The parsed end of central directory record.
#[derive(Debug)]
pub(crate) struct Eocd {
    pub entry_count: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

/// Maximum distance from the end of the stream where the EOCD signature can
/// legally start: the fixed record plus a maximal comment.
const MAX_EOCD_SEARCH: u64 = 22 + u16::MAX as u64;

impl Eocd {
    /// Locates and decodes the EOCD record.
    ///
    /// Tries the fixed position at `len - 22` first (no comment), then scans
    /// the last `MAX_EOCD_SEARCH` bytes backward for the signature. The scan
    /// bound trades correctness over trailing garbage beyond 64 KiB for a
    /// bounded worst case. On failure the stream position is restored.
    pub fn find<S: Read + Seek + ?Sized>(stream: &mut S) -> Result<Self> {
        let original_pos = stream.stream_position()?;
        let found = Self::find_inner(stream);
        if found.is_err() {
            stream.seek(SeekFrom::Start(original_pos))?;
        }
        found
    }

    fn find_inner<S: Read + Seek + ?Sized>(stream: &mut S) -> Result<Self> {
        let record_size = EndOfCentralDirectory::packed_size();
        let file_size = stream.seek(SeekFrom::End(0))?;
        if file_size < record_size {
            return Err(Error::MissingEndOfCentralDirectory);
        }

        stream.seek(SeekFrom::End(-(record_size as i64)))?;
        let header: EndOfCentralDirectory = read_packed(stream)?;
        if header.signature == EndOfCentralDirectory::SIGNATURE
            && header.file_comment_length == 0
        {
            return Self::from_header(header, Vec::new());
        }

        // A comment is present (or the tail is not an EOCD at all); scan the
        // last 64 KiB for a signature whose comment length reaches the end of
        // the stream exactly.
        let max_search = file_size.min(MAX_EOCD_SEARCH) as usize;
        stream.seek(SeekFrom::End(-(max_search as i64)))?;
        let mut buffer = vec![0u8; max_search];
        stream.read_exact(&mut buffer)?;

        let signature = EndOfCentralDirectory::SIGNATURE.to_le_bytes();
        let record_size = record_size as usize;
        for pos in (0..buffer.len().saturating_sub(record_size - 1)).rev() {
            if buffer[pos..pos + 4] != signature {
                continue;
            }
            let header: EndOfCentralDirectory =
                read_packed(&mut &buffer[pos..pos + record_size])?;
            let comment_end = pos + record_size + header.file_comment_length as usize;
            if comment_end == buffer.len() {
                let comment = buffer[pos + record_size..].to_vec();
                return Self::from_header(header, comment);
            }
        }

        Err(Error::MissingEndOfCentralDirectory)
    }

    fn from_header(header: EndOfCentralDirectory, comment: Vec<u8>) -> Result<Self> {
        if header.this_disk_number != 0
            || header.start_of_cd_disk_number != 0
            || header.this_cd_entry_count != header.total_cd_entry_count
        {
            return Err(Error::MultiVolumeArchive);
        }
        Ok(Eocd {
            entry_count: header.total_cd_entry_count,
            cd_size: header.size_of_cd,
            cd_offset: header.cd_offset,
            comment,
        })
    }

    pub fn write_to(&self, stream: &mut (impl Write + ?Sized)) -> Result<()> {
        let header = EndOfCentralDirectory {
            signature: EndOfCentralDirectory::SIGNATURE,
            this_disk_number: 0,
            start_of_cd_disk_number: 0,
            this_cd_entry_count: self.entry_count,
            total_cd_entry_count: self.entry_count,
            size_of_cd: self.cd_size,
            cd_offset: self.cd_offset,
            file_comment_length: self.comment.len() as u16,
        };
        write_packed(stream, &header)?;
        stream.write_all(&self.comment)?;
        Ok(())
    }
}
