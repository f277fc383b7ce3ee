//! Read-only decoder for SQLite database images. The entire image is borrowed as a byte buffer,
//! and decoded into a [`Database`] containing every page. Damage to individual pages or cells is
//! recorded alongside the decoded output rather than aborting the decode.

pub mod database;
pub mod freelist;
pub mod header;
pub mod overflow;
pub mod page;
pub mod varint;

#[cfg(test)]
mod test_util;

pub use self::{
    database::{Database, DecodeError, DecodeOptions, Warning},
    header::DbHeader,
    page::{Page, PageKind, PageNumber, PageType},
};
