use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Malformed header field")]
    Packing(#[from] packed_struct::PackingError),
    #[error("End of central directory record not found (not a zip archive, or comment longer than 64 KiB)")]
    MissingEndOfCentralDirectory,
    #[error("Bad {record} signature at offset {offset}")]
    BadSignature { record: &'static str, offset: u64 },
    #[error("Multi-volume archives are not supported")]
    MultiVolumeArchive,
    #[error("Unsupported compression method {method}")]
    UnsupportedCompression { method: u16 },
    #[error("Entry {entry_name} uses AES encryption, which is not supported")]
    AesNotSupported { entry_name: String },
    #[error("Entry {entry_name} is encrypted")]
    EncryptedEntry { entry_name: String },
    #[error("Entry {entry_name} not found in the archive")]
    EntryNotFound { entry_name: String },
    #[error("Entry {entry_name} is a directory")]
    EntryIsDirectory { entry_name: String },
    #[error("Entry {entry_name} is already open for writing")]
    EntryOpenForWrite { entry_name: String },
    #[error("Entry {entry_name} already exists in the archive")]
    EntryExists { entry_name: String },
    #[error("Entry name too long (length must fit into 16bit)")]
    TooLongEntryName { entry_name: String },
    #[error("Invalid entry name {entry_name:?}")]
    InvalidEntryName { entry_name: String },
    #[error("Archive is open read-only")]
    ReadOnlyArchive,
    #[error("Archive is open write-only")]
    WriteOnlyArchive,
    #[error("ReadWrite mode requires a path-based archive, not a caller-supplied stream")]
    StreamReadWriteUnsupported,
    #[error("Archive would exceed the 32bit size limit of the format subset")]
    ArchiveTooLarge,
    #[error("Archive would exceed the 16bit entry count limit of the format subset")]
    TooManyEntries,
}
