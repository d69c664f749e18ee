use chrono::{Datelike, Timelike};
use packed_struct::prelude::*;

/// General purpose flag bit 0: the entry payload is encrypted.
pub const GP_FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag bit 3: sizes/CRC live in a trailing data descriptor.
/// This crate always stages payloads before writing headers, so every header
/// it emits has this bit cleared.
pub const GP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Local file header
/// Precedes every file payload.
/// Must be followed by file name and extra fields (lengths are part of this struct)
#[derive(Debug, PackedStruct)]
#[packed_struct(endian = "lsb")]
pub struct LocalFileHeader {
    pub signature: u32,
    pub version_to_extract: u16,
    pub flags: u16,
    pub compression: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_field_len: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: u32 = 0x04034b50;
}

/// Central directory header
/// One per file, placed in the central directory.
#[derive(Debug, PackedStruct)]
#[packed_struct(endian = "lsb")]
pub struct CentralDirectoryHeader {
    pub signature: u32,
    #[packed_field(size_bytes = "2")]
    pub version_made_by: VersionMadeBy,
    pub version_to_extract: u16,
    pub flags: u16,
    pub compression: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_field_len: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: u32 = 0x02014b50;
}

#[derive(Debug, PackedStruct)]
#[packed_struct(endian = "lsb")]
pub struct VersionMadeBy {
    #[packed_field(size_bytes = "1", ty = "enum")]
    pub os: VersionMadeByOs,
    pub spec_version: u8,
}

#[derive(Clone, Copy, Debug, PrimitiveEnum_u8)]
#[non_exhaustive]
pub enum VersionMadeByOs {
    Unix = 3,
}

/// End of central directory record, the fixed-size tail of every archive.
/// Followed by the archive comment (length is part of this struct).
#[derive(Debug, PackedStruct)]
#[packed_struct(endian = "lsb")]
pub struct EndOfCentralDirectory {
    pub signature: u32,
    pub this_disk_number: u16,
    pub start_of_cd_disk_number: u16,
    pub this_cd_entry_count: u16,
    pub total_cd_entry_count: u16,
    pub size_of_cd: u32,
    pub cd_offset: u32,
    pub file_comment_length: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x06054b50;
}

/// Modification timestamp in the DOS format used by the zip headers.
///
/// Representable range is 1980-1-1 to 2107-12-31 with 2 second resolution.
/// The default value is 1980-1-1T00:00:00.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DosDatetime {
    date: u16,
    time: u16,
}

impl DosDatetime {
    /// Creates a timestamp from calendar fields.
    ///
    /// Returns None if the date is out of the representable range.
    /// Note that only even seconds can be stored and the value will get rounded down.
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<Self> {
        if !(1980..=2107).contains(&year) {
            return None;
        }
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        if hour >= 24 || minute >= 60 || second >= 60 {
            return None;
        }

        let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | (day as u16);
        let time = ((hour as u16) << 11) | ((minute as u16) << 5) | ((second as u16) >> 1);
        Some(DosDatetime { date, time })
    }

    /// Creates a timestamp from a chrono datetime, with the same range rules as `new`.
    pub fn from_datetime(datetime: chrono::NaiveDateTime) -> Option<Self> {
        DosDatetime::new(
            datetime.year(),
            datetime.month(),
            datetime.day(),
            datetime.hour(),
            datetime.minute(),
            datetime.second(),
        )
    }

    /// Current local wall clock time, or the default timestamp if the clock
    /// is outside the representable range.
    pub fn now() -> Self {
        DosDatetime::from_datetime(chrono::Local::now().naive_local()).unwrap_or_default()
    }

    /// Reconstructs a timestamp from the raw header fields.
    pub fn from_parts(date: u16, time: u16) -> Self {
        DosDatetime { date, time }
    }

    pub fn year(&self) -> i32 {
        (self.date >> 9) as i32 + 1980
    }

    pub fn month(&self) -> u32 {
        ((self.date >> 5) & 0xf) as u32
    }

    pub fn day(&self) -> u32 {
        (self.date & 0x1f) as u32
    }

    pub fn hour(&self) -> u32 {
        (self.time >> 11) as u32
    }

    pub fn minute(&self) -> u32 {
        ((self.time >> 5) & 0x3f) as u32
    }

    pub fn second(&self) -> u32 {
        ((self.time & 0x1f) as u32) * 2
    }

    pub(crate) fn date(&self) -> u16 {
        self.date
    }

    pub(crate) fn time(&self) -> u16 {
        self.time
    }
}

pub trait PackedStructRezipExt {
    fn packed_size() -> u64;
}

impl<T: PackedStruct> PackedStructRezipExt for T {
    fn packed_size() -> u64 {
        Self::packed_bytes_size(None).unwrap() as u64
    }
}
