//! Pages of the database file. Every page is one of a fixed set of kinds ([`PageKind`]), which is
//! determined either by the flag at the start of the page (b-tree pages), or by how other pages
//! refer to it (freelist and overflow pages, which carry no flag of their own).
//!
//! B-tree pages are further split by two attributes: whether they belong to a table or an index,
//! and whether they are a leaf or an interior node. Each combination has its own [`Cell`] layout.

pub mod cell;
pub mod header;
pub mod payload;
pub mod pointer;

use std::num::NonZero;

use derive_more::Display;
use thiserror::Error;

use self::{
    cell::{
        Cell, CellDecodeError, IndexInteriorCell, IndexLeafCell, TableInteriorCell, TableLeafCell,
    },
    header::{BTreePageHeader, BTreePageType},
    pointer::{CellPointer, CellPointerError, parse_cell_pointers},
};
use crate::{
    freelist::{FreeLeafPage, FreeTrunkPage},
    header::{DbHeader, SQLITE_HEADER_SIZE},
    overflow::OverflowPage,
};

/// Number of a page within the database. Page numbers start from 1, a value of 0 is used on disk
/// to indicate the absence of a page.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
pub struct PageNumber(NonZero<u32>);

impl PageNumber {
    /// The page which contains the database header.
    pub const FIRST: Self = Self(NonZero::<u32>::MIN);

    pub const fn new(page: u32) -> Option<Self> {
        match NonZero::new(page) {
            Some(page) => Some(Self(page)),
            None => None,
        }
    }

    /// Page number for the given (zero based) index into the page list.
    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index + 1).ok().and_then(Self::new)
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Index of this page within the page list.
    pub const fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Offset of the b-tree page header within the page. The first page also holds the database
    /// header, so its content begins after it.
    pub const fn header_offset(self) -> usize {
        if self.0.get() == Self::FIRST.get() {
            SQLITE_HEADER_SIZE
        } else {
            0
        }
    }
}

impl From<PageNumber> for u32 {
    fn from(page: PageNumber) -> Self {
        page.get()
    }
}

/// Relevant information from the header when working with pages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCtx {
    pub page_size: usize,
    /// Page size, less the reserved space at the end of each page.
    pub usable_size: usize,
    /// Number of pages present in the database.
    pub page_count: u32,
}

impl PageCtx {
    pub fn new(header: &DbHeader, page_count: u32) -> Self {
        Self {
            page_size: header.page_size.get(),
            usable_size: header.usable_size(),
            page_count,
        }
    }

    /// Whether the page number refers to a page within the database.
    pub fn contains(&self, page: u32) -> bool {
        (1..=self.page_count).contains(&page)
    }

    /// Slice the bytes of a page out of the file image. The slice will be short (or empty) if the
    /// image is truncated.
    pub fn page_data<'a>(&self, buffer: &'a [u8], page: PageNumber) -> &'a [u8] {
        let start = page.index().saturating_mul(self.page_size);
        let end = start.saturating_add(self.page_size).min(buffer.len());

        buffer.get(start..end).unwrap_or_default()
    }
}

/// A single page of the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<'a> {
    pub number: PageNumber,
    /// Raw bytes of the page.
    pub data: &'a [u8],
    pub kind: PageKind<'a>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageKind<'a> {
    TableInterior(BTreePage<'a, TableInteriorCell<'a>>),
    TableLeaf(BTreePage<'a, TableLeafCell<'a>>),
    IndexInterior(BTreePage<'a, IndexInteriorCell<'a>>),
    IndexLeaf(BTreePage<'a, IndexLeafCell<'a>>),
    FreeTrunk(FreeTrunkPage),
    FreeLeaf(FreeLeafPage),
    Overflow(OverflowPage<'a>),
    Unknown(UnknownPage),
}

impl PageKind<'_> {
    /// How this page is claimed by the rest of the database. Pages which couldn't be identified
    /// have no claim.
    pub fn claim(&self) -> Option<PageClaim> {
        Some(match self {
            PageKind::TableInterior(page) => PageClaim::BTree(page.header.page_type),
            PageKind::TableLeaf(page) => PageClaim::BTree(page.header.page_type),
            PageKind::IndexInterior(page) => PageClaim::BTree(page.header.page_type),
            PageKind::IndexLeaf(page) => PageClaim::BTree(page.header.page_type),
            PageKind::FreeTrunk(_) => PageClaim::FreeTrunk,
            PageKind::FreeLeaf(leaf) => PageClaim::FreeLeaf { trunk: leaf.trunk },
            PageKind::Overflow(page) => PageClaim::Overflow {
                referrer: page.referrer,
            },
            PageKind::Unknown(_) => return None,
        })
    }
}

/// The kind of a page, without any of its contents.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum PageType {
    #[display("Table Interior")]
    TableInterior,
    #[display("Table Leaf")]
    TableLeaf,
    #[display("Index Interior")]
    IndexInterior,
    #[display("Index Leaf")]
    IndexLeaf,
    #[display("Free Trunk")]
    FreeTrunk,
    #[display("Free Leaf")]
    FreeLeaf,
    #[display("Overflow")]
    Overflow,
    #[display("Unknown")]
    Unknown,
}

impl<'a> Page<'a> {
    /// Classify a page by its flag, decoding it if it is a b-tree page. Pages which can't be
    /// identified this way are [`PageKind::Unknown`].
    pub fn classify(ctx: &PageCtx, number: PageNumber, data: &'a [u8]) -> Self {
        let kind = match Self::decode_btree(ctx, number, data) {
            Ok(kind) => kind,
            Err(reason) => PageKind::Unknown(UnknownPage { reason }),
        };

        Self { number, data, kind }
    }

    fn decode_btree(
        ctx: &PageCtx,
        number: PageNumber,
        data: &'a [u8],
    ) -> Result<PageKind<'a>, UnknownReason> {
        let truncated = || UnknownReason::Truncated {
            expected: ctx.page_size,
            found: data.len(),
        };

        let header_bytes = data.get(number.header_offset()..).ok_or_else(truncated)?;
        let flag = *header_bytes.first().ok_or_else(truncated)?;
        let page_type =
            BTreePageType::try_from(flag).map_err(|_| UnknownReason::UnrecognisedFlag(flag))?;
        let header = BTreePageHeader::try_read(page_type, header_bytes).ok_or_else(truncated)?;

        Ok(match page_type {
            BTreePageType::TableInterior => {
                PageKind::TableInterior(BTreePage::decode(ctx, number, data, header))
            }
            BTreePageType::TableLeaf => {
                PageKind::TableLeaf(BTreePage::decode(ctx, number, data, header))
            }
            BTreePageType::IndexInterior => {
                PageKind::IndexInterior(BTreePage::decode(ctx, number, data, header))
            }
            BTreePageType::IndexLeaf => {
                PageKind::IndexLeaf(BTreePage::decode(ctx, number, data, header))
            }
        })
    }

    pub fn page_type(&self) -> PageType {
        match self.kind {
            PageKind::TableInterior(_) => PageType::TableInterior,
            PageKind::TableLeaf(_) => PageType::TableLeaf,
            PageKind::IndexInterior(_) => PageType::IndexInterior,
            PageKind::IndexLeaf(_) => PageType::IndexLeaf,
            PageKind::FreeTrunk(_) => PageType::FreeTrunk,
            PageKind::FreeLeaf(_) => PageType::FreeLeaf,
            PageKind::Overflow(_) => PageType::Overflow,
            PageKind::Unknown(_) => PageType::Unknown,
        }
    }

    /// Header of the page, if it is a b-tree page.
    pub fn btree_header(&self) -> Option<&BTreePageHeader> {
        match &self.kind {
            PageKind::TableInterior(page) => Some(&page.header),
            PageKind::TableLeaf(page) => Some(&page.header),
            PageKind::IndexInterior(page) => Some(&page.header),
            PageKind::IndexLeaf(page) => Some(&page.header),
            _ => None,
        }
    }

    /// All cell decoding failures on this page.
    pub fn cell_errors(&self) -> Vec<&CellDecodeError> {
        match &self.kind {
            PageKind::TableInterior(page) => page.errors().collect(),
            PageKind::TableLeaf(page) => page.errors().collect(),
            PageKind::IndexInterior(page) => page.errors().collect(),
            PageKind::IndexLeaf(page) => page.errors().collect(),
            _ => Vec::new(),
        }
    }

    /// Overflow chains which begin from cells on this page, as `(cell index, payload)`.
    pub(crate) fn overflow_references(&self) -> Vec<(usize, &payload::Payload<'a>)> {
        fn collect<'p, 'a, C: Cell<'a>>(
            page: &'p BTreePage<'a, C>,
        ) -> Vec<(usize, &'p payload::Payload<'a>)> {
            page.cells
                .iter()
                .enumerate()
                .filter_map(|(i, cell)| Some((i, cell.as_ref().ok()?.payload()?)))
                .filter(|(_, payload)| !payload.is_local())
                .collect()
        }

        match &self.kind {
            PageKind::TableLeaf(page) => collect(page),
            PageKind::IndexInterior(page) => collect(page),
            PageKind::IndexLeaf(page) => collect(page),
            _ => Vec::new(),
        }
    }
}

/// A decoded b-tree page, with the cells of type `C`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreePage<'a, C> {
    pub header: BTreePageHeader,
    pub cell_pointers: Vec<Result<CellPointer<'a>, CellPointerError>>,
    /// Decoded cells, in the same order as `cell_pointers`.
    pub cells: Vec<Result<C, CellDecodeError>>,
}

impl<'a, C: Cell<'a>> BTreePage<'a, C> {
    /// Decode the pointer array and every cell of the page. Each cell is decoded independently, so
    /// a failure only affects that cell.
    pub fn decode(
        ctx: &PageCtx,
        number: PageNumber,
        data: &'a [u8],
        header: BTreePageHeader,
    ) -> Self {
        let array_offset = number.header_offset() + header.size();
        let cell_pointers =
            parse_cell_pointers(data, array_offset, header.cell_count, ctx.usable_size);

        let cells = cell_pointers
            .iter()
            .enumerate()
            .map(|(cell_index, pointer)| {
                pointer
                    .clone()
                    .map_err(Into::into)
                    .and_then(|pointer| C::decode(ctx, data, pointer.value as usize))
                    .map_err(|reason| CellDecodeError {
                        page: number,
                        cell_index,
                        reason,
                    })
            })
            .collect();

        Self {
            header,
            cell_pointers,
            cells,
        }
    }

    /// Cells which were successfully decoded.
    pub fn decoded_cells(&self) -> impl Iterator<Item = &C> {
        self.cells.iter().filter_map(|cell| cell.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &CellDecodeError> {
        self.cells.iter().filter_map(|cell| cell.as_ref().err())
    }

    /// Whether every cell on the page was decoded.
    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(Result::is_ok)
    }
}

/// A page which could not be identified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownPage {
    pub reason: UnknownReason,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UnknownReason {
    #[error("unrecognised page type flag {0:#04x}")]
    UnrecognisedFlag(u8),
    #[error("page is truncated ({found} of {expected} bytes)")]
    Truncated { expected: usize, found: usize },
    #[error("page has conflicting claims: {}", join_claims(.0))]
    ConflictingClaims(Vec<PageClaim>),
}

/// A way in which a page is referred to by the rest of the database.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum PageClaim {
    #[display("free trunk page")]
    FreeTrunk,
    #[display("free leaf page of trunk {trunk}")]
    FreeLeaf { trunk: PageNumber },
    #[display("overflow page referenced by page {referrer}")]
    Overflow { referrer: PageNumber },
    #[display("b-tree page ({_0:?})")]
    BTree(BTreePageType),
}

pub(crate) fn join_claims(claims: &[PageClaim]) -> String {
    claims
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
