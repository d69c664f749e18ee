mod archive;
pub mod compression;
mod crc_filter;
mod error;
mod records;
mod staging;
mod structs;
#[cfg(test)]
mod test_util;
mod tree;

pub use archive::{Archive, ArchiveStream, EntryReader, EntryWriter, Lookup, OpenMode, RebuildProgress};
pub use crc_filter::{CrcReader, CrcWriter};
pub use error::{Error, Result};
pub use records::EntryRecord;
pub use staging::StagedFile;
pub use structs::DosDatetime;

#[cfg(doctest)]
#[doc = include_str!("../README.md")]
struct ReadMe;
