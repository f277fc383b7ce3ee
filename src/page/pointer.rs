use std::ops::Range;

use thiserror::Error;
use zerocopy::{FromBytes, big_endian::U16};

/// Size of a single entry in the cell pointer array.
pub const CELL_POINTER_SIZE: usize = size_of::<U16>();

/// An entry in the cell pointer array of a b-tree page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellPointer<'a> {
    /// Offset of this entry within the page.
    pub offset: usize,
    /// Length of this entry within the page.
    pub length: usize,
    /// Raw bytes of the entry.
    pub content: &'a [u8],
    /// Offset of the referenced cell within the page.
    pub value: u16,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CellPointerError {
    #[error("cell pointer {index} lies beyond the end of the page")]
    Missing { index: usize },
    #[error("cell pointer {index} references offset {value}, outside of {}..{}", .bounds.start, .bounds.end)]
    OutOfRange {
        index: usize,
        value: u16,
        bounds: Range<usize>,
    },
}

/// Read `count` cell pointers, starting at `array_offset` within the page.
///
/// The pointer array begins where the page header ends, and each pointer must reference a location
/// between there and `usable_end`. Failures are reported per entry, so a single bad pointer does
/// not affect its siblings.
pub fn parse_cell_pointers(
    page: &[u8],
    array_offset: usize,
    count: u16,
    usable_end: usize,
) -> Vec<Result<CellPointer<'_>, CellPointerError>> {
    let bounds = array_offset..usable_end;

    (0..count as usize)
        .map(|index| {
            let offset = array_offset + index * CELL_POINTER_SIZE;
            let content = page
                .get(offset..offset + CELL_POINTER_SIZE)
                .filter(|_| offset + CELL_POINTER_SIZE <= usable_end)
                .ok_or(CellPointerError::Missing { index })?;

            let value = U16::read_from_bytes(content)
                .map_err(|_| CellPointerError::Missing { index })?
                .get();

            if !bounds.contains(&(value as usize)) {
                return Err(CellPointerError::OutOfRange {
                    index,
                    value,
                    bounds: bounds.clone(),
                });
            }

            Ok(CellPointer {
                offset,
                length: CELL_POINTER_SIZE,
                content,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    fn page_with_pointers(pointers: &[u16]) -> Vec<u8> {
        let mut page = vec![0; 512];
        for (i, pointer) in pointers.iter().enumerate() {
            page[8 + i * 2..10 + i * 2].copy_from_slice(&pointer.to_be_bytes());
        }
        page
    }

    #[test]
    fn reads_pointers() {
        let page = page_with_pointers(&[500, 480]);
        let pointers = parse_cell_pointers(&page, 8, 2, 512);

        assert_eq!(
            pointers,
            vec![
                Ok(CellPointer {
                    offset: 8,
                    length: 2,
                    content: &[0x01, 0xf4],
                    value: 500,
                }),
                Ok(CellPointer {
                    offset: 10,
                    length: 2,
                    content: &[0x01, 0xe0],
                    value: 480,
                }),
            ]
        );
    }

    #[test]
    fn out_of_range_pointer_is_isolated() {
        let page = page_with_pointers(&[500, 4, 510]);
        let pointers = parse_cell_pointers(&page, 8, 3, 512);

        assert!(pointers[0].is_ok());
        assert_eq!(
            pointers[1],
            Err(CellPointerError::OutOfRange {
                index: 1,
                value: 4,
                bounds: 8..512,
            })
        );
        assert!(pointers[2].is_ok());
    }

    #[rstest]
    #[case::header_end(8)]
    #[case::within_array(12)]
    #[case::last_usable(511)]
    fn pointer_within_bounds(#[case] value: u16) {
        let page = page_with_pointers(&[500, value, 480]);
        let pointers = parse_cell_pointers(&page, 8, 3, 512);

        assert_eq!(pointers[1].as_ref().map(|pointer| pointer.value), Ok(value));
    }

    #[test]
    fn pointer_at_usable_end() {
        let page = page_with_pointers(&[512]);
        let pointers = parse_cell_pointers(&page, 8, 1, 512);

        assert!(matches!(
            pointers[0],
            Err(CellPointerError::OutOfRange { value: 512, .. })
        ));
    }

    #[test]
    fn pointer_into_reserved_space() {
        let page = page_with_pointers(&[505]);
        let pointers = parse_cell_pointers(&page, 8, 1, 500);

        assert!(matches!(
            pointers[0],
            Err(CellPointerError::OutOfRange { value: 505, .. })
        ));
    }

    #[test]
    fn array_runs_off_page() {
        let page = page_with_pointers(&[]);
        let pointers = parse_cell_pointers(&page[..12], 8, 4, 512);

        assert_eq!(pointers.len(), 4);
        assert!(matches!(pointers[2], Err(CellPointerError::Missing { index: 2 })));
        assert!(matches!(pointers[3], Err(CellPointerError::Missing { index: 3 })));
    }
}
