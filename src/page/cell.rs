//! Cells are the entries of a b-tree page. Their layout depends on both the kind of b-tree (table
//! or index) and whether the page is a leaf or an interior node:
//!
//! | Page           | Child pointer | Payload size | Row ID | Payload |
//! |----------------|---------------|--------------|--------|---------|
//! | Table interior | yes           |              | yes    |         |
//! | Table leaf     |               | yes          | yes    | yes     |
//! | Index interior | yes           | yes          |        | yes     |
//! | Index leaf     |               | yes          |        | yes     |
//!
//! Payloads which are too large for the page spill onto a chain of overflow pages, with the
//! amount kept locally determined by [`PayloadCalculation`].

use thiserror::Error;
use zerocopy::{FromBytes, big_endian::U32};

use super::{
    PageCtx, PageNumber,
    payload::{Index, OVERFLOW_POINTER_SIZE, Payload, PayloadCalculation, Table},
    pointer::CellPointerError,
};
use crate::varint::{VarInt, VarIntError};

/// A cell which may be decoded from a b-tree page of a specific type.
pub trait Cell<'a>: Sized {
    /// Decode the cell which starts at `offset` within the page.
    fn decode(ctx: &PageCtx, page: &'a [u8], offset: usize) -> Result<Self, CellDecodeReason>;

    /// Offset of the cell within the page.
    fn offset(&self) -> usize;

    /// Number of bytes the cell occupies on the page.
    fn length(&self) -> usize;

    /// Child page pointer, for cells on interior pages.
    fn left_child(&self) -> Option<u32> {
        None
    }

    fn payload(&self) -> Option<&Payload<'a>> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInteriorCell<'a> {
    pub offset: usize,
    pub length: usize,
    pub content: &'a [u8],
    pub left_child: u32,
    pub rowid: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableLeafCell<'a> {
    pub offset: usize,
    pub length: usize,
    pub content: &'a [u8],
    pub rowid: i64,
    pub payload: Payload<'a>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexInteriorCell<'a> {
    pub offset: usize,
    pub length: usize,
    pub content: &'a [u8],
    pub left_child: u32,
    pub payload: Payload<'a>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexLeafCell<'a> {
    pub offset: usize,
    pub length: usize,
    pub content: &'a [u8],
    pub payload: Payload<'a>,
}

impl<'a> Cell<'a> for TableInteriorCell<'a> {
    fn decode(ctx: &PageCtx, page: &'a [u8], offset: usize) -> Result<Self, CellDecodeReason> {
        let mut cursor = CellCursor::new(ctx, page, offset);

        let left_child = cursor.u32()?;
        let rowid = cursor.varint()? as i64;

        Ok(Self {
            offset,
            length: cursor.consumed(),
            content: cursor.content(),
            left_child,
            rowid,
        })
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn length(&self) -> usize {
        self.length
    }

    fn left_child(&self) -> Option<u32> {
        Some(self.left_child)
    }
}

impl<'a> Cell<'a> for TableLeafCell<'a> {
    fn decode(ctx: &PageCtx, page: &'a [u8], offset: usize) -> Result<Self, CellDecodeReason> {
        let mut cursor = CellCursor::new(ctx, page, offset);

        let payload_size = cursor.varint()?;
        let rowid = cursor.varint()? as i64;
        let payload = cursor.payload::<Table>(payload_size)?;

        Ok(Self {
            offset,
            length: cursor.consumed(),
            content: cursor.content(),
            rowid,
            payload,
        })
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn length(&self) -> usize {
        self.length
    }

    fn payload(&self) -> Option<&Payload<'a>> {
        Some(&self.payload)
    }
}

impl<'a> Cell<'a> for IndexInteriorCell<'a> {
    fn decode(ctx: &PageCtx, page: &'a [u8], offset: usize) -> Result<Self, CellDecodeReason> {
        let mut cursor = CellCursor::new(ctx, page, offset);

        let left_child = cursor.u32()?;
        let payload_size = cursor.varint()?;
        let payload = cursor.payload::<Index>(payload_size)?;

        Ok(Self {
            offset,
            length: cursor.consumed(),
            content: cursor.content(),
            left_child,
            payload,
        })
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn length(&self) -> usize {
        self.length
    }

    fn left_child(&self) -> Option<u32> {
        Some(self.left_child)
    }

    fn payload(&self) -> Option<&Payload<'a>> {
        Some(&self.payload)
    }
}

impl<'a> Cell<'a> for IndexLeafCell<'a> {
    fn decode(ctx: &PageCtx, page: &'a [u8], offset: usize) -> Result<Self, CellDecodeReason> {
        let mut cursor = CellCursor::new(ctx, page, offset);

        let payload_size = cursor.varint()?;
        let payload = cursor.payload::<Index>(payload_size)?;

        Ok(Self {
            offset,
            length: cursor.consumed(),
            content: cursor.content(),
            payload,
        })
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn length(&self) -> usize {
        self.length
    }

    fn payload(&self) -> Option<&Payload<'a>> {
        Some(&self.payload)
    }
}

/// Reads the fields of a single cell, never reading past the usable region of the page.
struct CellCursor<'c, 'a> {
    ctx: &'c PageCtx,
    page: &'a [u8],
    start: usize,
    position: usize,
    end: usize,
}

impl<'c, 'a> CellCursor<'c, 'a> {
    fn new(ctx: &'c PageCtx, page: &'a [u8], offset: usize) -> Self {
        Self {
            ctx,
            page,
            start: offset,
            position: offset,
            end: page.len().min(ctx.usable_size),
        }
    }

    fn consumed(&self) -> usize {
        self.position - self.start
    }

    fn content(&self) -> &'a [u8] {
        &self.page[self.start..self.position]
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8], CellDecodeReason> {
        let bytes = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.end)
            .map(|end| &self.page[self.position..end])
            .ok_or(CellDecodeReason::Truncated {
                offset: self.position,
                needed: count as u64,
                available: self.end.saturating_sub(self.position),
            })?;

        self.position += count;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, CellDecodeReason> {
        let bytes = self.bytes(size_of::<U32>())?;
        let (value, _) = U32::read_from_prefix(bytes).map_err(|_| CellDecodeReason::Truncated {
            offset: self.position,
            needed: size_of::<U32>() as u64,
            available: bytes.len(),
        })?;

        Ok(value.get())
    }

    fn varint(&mut self) -> Result<u64, CellDecodeReason> {
        let remaining = self.page.get(self.position..self.end).unwrap_or_default();
        let (value, length) = VarInt::from_buffer(remaining)?;
        self.position += length;

        Ok(*value)
    }

    /// Read the local portion of a payload of `size` bytes, followed by the overflow page pointer
    /// if the payload spills.
    fn payload<K: PayloadCalculation>(
        &mut self,
        size: u64,
    ) -> Result<Payload<'a>, CellDecodeReason> {
        let split = K::split(self.ctx.usable_size as u64, size);

        let local_size = usize::try_from(split.local).map_err(|_| CellDecodeReason::Truncated {
            offset: self.position,
            needed: split.local,
            available: self.end.saturating_sub(self.position),
        })?;
        let local = self.bytes(local_size)?;

        let overflow_page = if split.overflows {
            if self.end.saturating_sub(self.position) < OVERFLOW_POINTER_SIZE {
                return Err(CellDecodeReason::MissingOverflowPointer);
            }

            let page = self.u32()?;
            Some(
                PageNumber::new(page)
                    .filter(|page| page.get() <= self.ctx.page_count)
                    .ok_or(CellDecodeReason::InvalidOverflowPage(page))?,
            )
        } else {
            None
        };

        Ok(Payload {
            size,
            local,
            overflow_page,
        })
    }
}

/// Reason a single cell could not be decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CellDecodeReason {
    #[error(transparent)]
    InvalidCellPointer(#[from] CellPointerError),
    #[error("truncated varint: {0}")]
    TruncatedVarint(#[from] VarIntError),
    #[error("cell needs {needed} bytes at offset {offset}, but only {available} remain")]
    Truncated {
        offset: usize,
        needed: u64,
        available: usize,
    },
    #[error("payload spills to an overflow page, but there is no room for the page pointer")]
    MissingOverflowPointer,
    #[error("overflow page pointer {0} is outside of the database")]
    InvalidOverflowPage(u32),
}

/// A cell which failed to decode, along with where it was located.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("page {page}, cell {cell_index}: {reason}")]
pub struct CellDecodeError {
    pub page: PageNumber,
    pub cell_index: usize,
    #[source]
    pub reason: CellDecodeReason,
}
