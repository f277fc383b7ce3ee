mod page_size;
mod raw;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use zerocopy::FromBytes;

use crate::page::PageNumber;

pub use self::{
    page_size::{PageSize, PageSizeError},
    raw::RawDbHeader,
};

/// Expected size of the SQLite header in bytes.
pub const SQLITE_HEADER_SIZE: usize = 100;

/// String expected to be present at the beginning of the header.
pub const HEADER_STRING: [u8; 16] = *b"SQLite format 3\0";

/// Decoded database header. Only the header string and page size are validated, every other field
/// is carried as found so that a damaged file can still be inspected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbHeader {
    pub page_size: PageSize,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    /// Bytes reserved at the end of every page.
    pub reserved_space: u8,
    pub max_payload_fraction: u8,
    pub min_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    /// Page count as reported by the header. See [`DbHeader::reported_page_count`].
    pub page_count: u32,
    pub first_freelist_page: Option<PageNumber>,
    pub total_freelist_pages: u32,
    pub schema_cookie: u32,
    pub schema_format_number: u32,
    pub default_page_cache_size: u32,
    pub largest_root_btree_page: Option<PageNumber>,
    pub text_encoding: u32,
    pub user_version: u32,
    pub incremental_vacuum_mode: bool,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DbHeader {
    /// Parse the header from the start of the file image.
    pub fn parse(buf: &[u8]) -> Result<Self, DbHeaderError> {
        let (raw, _) =
            RawDbHeader::read_from_prefix(buf).map_err(|_| DbHeaderError::Truncated {
                found: buf.len(),
            })?;

        Self::try_from(raw)
    }

    /// Size of a page, less the reserved space at the end of it.
    pub fn usable_size(&self) -> usize {
        self.page_size.get() - self.reserved_space as usize
    }

    /// The header's page count is only trustworthy if it is non-zero, and the file was last
    /// written by a version of SQLite which maintains it.
    pub fn reported_page_count(&self) -> Option<u32> {
        (self.page_count != 0 && self.version_valid_for == self.file_change_counter)
            .then_some(self.page_count)
    }

    pub fn encoding(&self) -> Option<TextEncoding> {
        TextEncoding::try_from_primitive(self.text_encoding).ok()
    }

    pub fn write_version(&self) -> Option<FileFormatVersion> {
        FileFormatVersion::try_from_primitive(self.file_format_write_version).ok()
    }

    pub fn read_version(&self) -> Option<FileFormatVersion> {
        FileFormatVersion::try_from_primitive(self.file_format_read_version).ok()
    }

    pub fn schema_format(&self) -> Option<SchemaFormat> {
        SchemaFormat::try_from_primitive(self.schema_format_number).ok()
    }

    /// Get the (major, minor, patch) version of SQLite which last wrote the database.
    pub fn sqlite_version(&self) -> (u16, u16, u16) {
        let version = self.sqlite_version_number;

        (
            (version / 1_000_000) as u16,
            (version % 1_000_000 / 1_000) as u16,
            (version % 1_000) as u16,
        )
    }
}

impl TryFrom<RawDbHeader> for DbHeader {
    type Error = DbHeaderError;

    fn try_from(raw: RawDbHeader) -> Result<Self, Self::Error> {
        if raw.header_string != HEADER_STRING {
            return Err(DbHeaderError::InvalidMagic(raw.header_string));
        }

        Ok(Self {
            page_size: PageSize::from_raw(raw.page_size.get())?,
            file_format_write_version: raw.file_format_write_version,
            file_format_read_version: raw.file_format_read_version,
            reserved_space: raw.reserved_space,
            max_payload_fraction: raw.max_payload_fraction,
            min_payload_fraction: raw.min_payload_fraction,
            leaf_payload_fraction: raw.leaf_payload_fraction,
            file_change_counter: raw.file_change_counter.get(),
            page_count: raw.page_count.get(),
            first_freelist_page: PageNumber::new(raw.first_freelist_trunk_page.get()),
            total_freelist_pages: raw.freelist_page_count.get(),
            schema_cookie: raw.schema_cookie.get(),
            schema_format_number: raw.schema_format_number.get(),
            default_page_cache_size: raw.default_page_cache_size.get(),
            largest_root_btree_page: PageNumber::new(raw.largest_root_btree_page.get()),
            text_encoding: raw.text_encoding.get(),
            user_version: raw.user_version.get(),
            incremental_vacuum_mode: raw.incremental_vacuum_mode.get() != 0,
            application_id: raw.application_id.get(),
            version_valid_for: raw.version_valid_for.get(),
            sqlite_version_number: raw.sqlite_version.get(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FileFormatVersion {
    Legacy = 1,
    Wal = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SchemaFormat {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum TextEncoding {
    Utf8 = 1,
    Utf16Le = 2,
    Utf16Be = 3,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DbHeaderError {
    #[error("invalid header string (expected {HEADER_STRING:?}, found {0:?})")]
    InvalidMagic([u8; 16]),
    #[error("invalid page size: {0}")]
    InvalidPageSize(#[from] PageSizeError),
    #[error("buffer too short for the database header ({found} of {SQLITE_HEADER_SIZE} bytes)")]
    Truncated { found: usize },
}
