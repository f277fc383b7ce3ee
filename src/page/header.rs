use std::num::NonZero;

use derive_more::TryFrom;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned, big_endian::*};

/// Flag at the start of every b-tree page, indicating what the page contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFrom)]
#[try_from(repr)]
#[repr(u8)]
pub enum BTreePageType {
    IndexInterior = 0x02,
    TableInterior = 0x05,
    IndexLeaf = 0x0a,
    TableLeaf = 0x0d,
}

impl BTreePageType {
    pub fn is_interior(&self) -> bool {
        matches!(self, Self::IndexInterior | Self::TableInterior)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::IndexLeaf | Self::TableLeaf)
    }

    /// Size of the page header for this page type.
    pub fn header_size(&self) -> usize {
        if self.is_interior() {
            size_of::<RawInteriorPageHeader>()
        } else {
            size_of::<RawLeafPageHeader>()
        }
    }
}

/// Page header which is present at the start of every b-tree page. This structure represents the
/// raw binary stored on disk, and has not had any validation on any of its fields.
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RawLeafPageHeader {
    /// Flag indicating the type of the page.
    page_type: u8,
    /// Start of the first freeblock on the page.
    first_freeblock: U16,
    /// Number of cells in the page.
    cell_count: U16,
    /// Start of the cell content area.
    cell_content_offset: U16,
    /// Number of fragmented free bytes in the cell content area.
    fragmented_free_bytes: u8,
}
const_assert_eq!(size_of::<RawLeafPageHeader>(), 8);

/// Page header for interior pages, which is a superset of [`RawLeafPageHeader`].
#[derive(Clone, Debug, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RawInteriorPageHeader {
    header: RawLeafPageHeader,
    /// Right most pointer, only used for interior b-tree pages.
    right_page: U32,
}
const_assert_eq!(size_of::<RawInteriorPageHeader>(), 12);

/// Decoded b-tree page header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BTreePageHeader {
    pub page_type: BTreePageType,
    /// Offset of the first freeblock, if there are any.
    pub first_freeblock: Option<NonZero<u16>>,
    pub cell_count: u16,
    /// Start of the cell content area. A stored value of `0` is interpreted as 65536.
    pub cell_content_offset: u32,
    pub fragmented_free_bytes: u8,
    /// Right-most child pointer, only present on interior pages.
    pub right_child: Option<u32>,
}

impl BTreePageHeader {
    /// Read the header from the start of the provided bytes, for an already known page type.
    /// Produces [`None`] if there are not enough bytes.
    pub fn try_read(page_type: BTreePageType, bytes: &[u8]) -> Option<Self> {
        let (header, right_child) = if page_type.is_interior() {
            let (raw, _) = RawInteriorPageHeader::read_from_prefix(bytes).ok()?;
            (raw.header, Some(raw.right_page.get()))
        } else {
            let (raw, _) = RawLeafPageHeader::read_from_prefix(bytes).ok()?;
            (raw, None)
        };

        Some(Self {
            page_type,
            first_freeblock: NonZero::new(header.first_freeblock.get()),
            cell_count: header.cell_count.get(),
            cell_content_offset: match header.cell_content_offset.get() {
                0 => 65536,
                n => n as u32,
            },
            fragmented_free_bytes: header.fragmented_free_bytes,
            right_child,
        })
    }

    pub fn size(&self) -> usize {
        self.page_type.header_size()
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(0x02, BTreePageType::IndexInterior)]
    #[case(0x05, BTreePageType::TableInterior)]
    #[case(0x0a, BTreePageType::IndexLeaf)]
    #[case(0x0d, BTreePageType::TableLeaf)]
    fn page_type_flag(#[case] flag: u8, #[case] expected: BTreePageType) {
        assert_eq!(BTreePageType::try_from(flag).unwrap(), expected);
    }

    #[rstest]
    #[case(0x00)]
    #[case(0x01)]
    #[case(0x0e)]
    #[case(0xff)]
    fn unknown_flag(#[case] flag: u8) {
        assert!(BTreePageType::try_from(flag).is_err());
    }

    #[test]
    fn leaf_header() {
        let bytes = [0x0d, 0x00, 0x00, 0x00, 0x02, 0x0f, 0xd0, 0x03];
        let header = BTreePageHeader::try_read(BTreePageType::TableLeaf, &bytes).unwrap();

        assert_eq!(header.first_freeblock, None);
        assert_eq!(header.cell_count, 2);
        assert_eq!(header.cell_content_offset, 0x0fd0);
        assert_eq!(header.fragmented_free_bytes, 3);
        assert_eq!(header.right_child, None);
        assert_eq!(header.size(), 8);
    }

    #[test]
    fn interior_header() {
        let bytes = [
            0x05, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07,
        ];
        let header = BTreePageHeader::try_read(BTreePageType::TableInterior, &bytes).unwrap();

        assert_eq!(header.first_freeblock, NonZero::new(0x10));
        assert_eq!(header.cell_content_offset, 65536);
        assert_eq!(header.right_child, Some(7));
        assert_eq!(header.size(), 12);
    }

    #[test]
    fn short_header() {
        assert!(BTreePageHeader::try_read(BTreePageType::IndexInterior, &[0x02; 11]).is_none());
    }
}
