//! Builders for synthetic database images.

use zerocopy::{IntoBytes, big_endian::*};

use crate::{
    header::{HEADER_STRING, RawDbHeader, SQLITE_HEADER_SIZE},
    page::{PageCtx, header::BTreePageType},
    varint::VarInt,
};

pub fn ctx(page_size: usize, reserved: usize, page_count: u32) -> PageCtx {
    PageCtx {
        page_size,
        usable_size: page_size - reserved,
        page_count,
    }
}

fn varint(value: u64) -> Vec<u8> {
    VarInt::new(value).to_bytes()
}

pub fn table_leaf_cell(rowid: u64, payload: &[u8]) -> Vec<u8> {
    let mut cell = varint(payload.len() as u64);
    cell.extend(varint(rowid));
    cell.extend_from_slice(payload);
    cell
}

/// Table leaf cell which keeps `local` bytes of the payload, followed by an overflow pointer.
pub fn table_leaf_cell_with_overflow(
    rowid: u64,
    payload: &[u8],
    local: usize,
    overflow_page: u32,
) -> Vec<u8> {
    let mut cell = varint(payload.len() as u64);
    cell.extend(varint(rowid));
    cell.extend_from_slice(&payload[..local]);
    cell.extend_from_slice(&overflow_page.to_be_bytes());
    cell
}

pub fn table_interior_cell(left_child: u32, rowid: u64) -> Vec<u8> {
    let mut cell = left_child.to_be_bytes().to_vec();
    cell.extend(varint(rowid));
    cell
}

pub fn index_leaf_cell(payload: &[u8]) -> Vec<u8> {
    let mut cell = varint(payload.len() as u64);
    cell.extend_from_slice(payload);
    cell
}

pub fn index_interior_cell(left_child: u32, payload: &[u8]) -> Vec<u8> {
    let mut cell = left_child.to_be_bytes().to_vec();
    cell.extend(index_leaf_cell(payload));
    cell
}

pub fn index_interior_cell_with_overflow(
    left_child: u32,
    payload: &[u8],
    local: usize,
    overflow_page: u32,
) -> Vec<u8> {
    let mut cell = left_child.to_be_bytes().to_vec();
    cell.extend(varint(payload.len() as u64));
    cell.extend_from_slice(&payload[..local]);
    cell.extend_from_slice(&overflow_page.to_be_bytes());
    cell
}

/// Build a b-tree page, with cells packed against the end of the page in order.
pub fn btree_page(
    page_size: usize,
    first: bool,
    page_type: BTreePageType,
    right_child: Option<u32>,
    cells: &[Vec<u8>],
) -> Vec<u8> {
    let mut page = vec![0; page_size];
    let header_offset = if first { SQLITE_HEADER_SIZE } else { 0 };

    let mut content_offset = page_size;
    let mut pointers = Vec::with_capacity(cells.len());
    for cell in cells {
        content_offset -= cell.len();
        page[content_offset..content_offset + cell.len()].copy_from_slice(cell);
        pointers.push(content_offset as u16);
    }

    let mut header = vec![page_type as u8, 0, 0];
    header.extend_from_slice(&(cells.len() as u16).to_be_bytes());
    header.extend_from_slice(&(content_offset as u16).to_be_bytes());
    header.push(0);
    if let Some(right_child) = right_child {
        header.extend_from_slice(&right_child.to_be_bytes());
    }
    for pointer in pointers {
        header.extend_from_slice(&pointer.to_be_bytes());
    }

    page[header_offset..header_offset + header.len()].copy_from_slice(&header);
    page
}

pub fn overflow_page(page_size: usize, next_page: u32, payload: &[u8]) -> Vec<u8> {
    let mut page = vec![0; page_size];
    page[..4].copy_from_slice(&next_page.to_be_bytes());
    page[4..4 + payload.len()].copy_from_slice(payload);
    page
}

pub fn free_trunk_page(page_size: usize, next_trunk: u32, leaves: &[u32]) -> Vec<u8> {
    let mut page = vec![0; page_size];
    page[..4].copy_from_slice(&next_trunk.to_be_bytes());
    page[4..8].copy_from_slice(&(leaves.len() as u32).to_be_bytes());
    for (i, leaf) in leaves.iter().enumerate() {
        page[8 + i * 4..12 + i * 4].copy_from_slice(&leaf.to_be_bytes());
    }
    page
}

/// Assembles pages into a database image, writing the header over the start of the first page.
pub struct DbBuilder {
    page_size: usize,
    reserved: u8,
    first_freelist_page: u32,
    total_freelist_pages: u32,
    pages: Vec<Vec<u8>>,
}

impl DbBuilder {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            reserved: 0,
            first_freelist_page: 0,
            total_freelist_pages: 0,
            pages: Vec::new(),
        }
    }

    pub fn reserved(mut self, reserved: u8) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn freelist(mut self, first: u32, total: u32) -> Self {
        self.first_freelist_page = first;
        self.total_freelist_pages = total;
        self
    }

    pub fn page(mut self, page: Vec<u8>) -> Self {
        assert_eq!(page.len(), self.page_size);
        self.pages.push(page);
        self
    }

    /// An empty page, which will not be recognised as anything.
    pub fn blank_page(self) -> Self {
        let page = vec![0; self.page_size];
        self.page(page)
    }

    pub fn header(&self) -> RawDbHeader {
        RawDbHeader {
            header_string: HEADER_STRING,
            // 65536 is stored as 1.
            page_size: U16::new(u16::try_from(self.page_size).unwrap_or(1)),
            file_format_write_version: 1,
            file_format_read_version: 1,
            reserved_space: self.reserved,
            max_payload_fraction: 64,
            min_payload_fraction: 32,
            leaf_payload_fraction: 32,
            file_change_counter: U32::new(1),
            page_count: U32::new(self.pages.len() as u32),
            first_freelist_trunk_page: U32::new(self.first_freelist_page),
            freelist_page_count: U32::new(self.total_freelist_pages),
            schema_cookie: U32::new(1),
            schema_format_number: U32::new(4),
            text_encoding: U32::new(1),
            version_valid_for: U32::new(1),
            sqlite_version: U32::new(3_045_000),
            ..Default::default()
        }
    }

    pub fn build(self) -> Vec<u8> {
        let header = self.header();

        let mut buffer = self.pages.concat();
        buffer[..SQLITE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        buffer
    }
}
