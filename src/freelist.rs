//! The freelist tracks pages which are currently unused. It is a linked list of trunk pages, each
//! of which holds the page numbers of a number of leaf pages. Neither kind of page carries a flag,
//! so they can only be found by following the list from the database header.

use std::collections::HashSet;

use thiserror::Error;
use zerocopy::{FromBytes, big_endian::U32};

use crate::page::{PageCtx, PageNumber};

/// Size of the trunk header (next trunk pointer and leaf count).
const TRUNK_HEADER_SIZE: usize = 8;
/// Size of each leaf page number in a trunk.
const TRUNK_ENTRY_SIZE: usize = size_of::<U32>();

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeTrunkPage {
    /// Next trunk page in the freelist.
    pub next_trunk: Option<PageNumber>,
    /// Number of leaf pages the trunk declares.
    pub count: u32,
    /// Leaf page numbers present on the trunk.
    pub leaves: Vec<FreeTrunkEntry>,
}

/// A leaf page number held on a trunk page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeTrunkEntry {
    /// Offset of the entry within the trunk page.
    pub offset: usize,
    pub length: usize,
    pub page: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeLeafPage {
    /// Trunk page which lists this leaf.
    pub trunk: PageNumber,
}

impl FreeTrunkPage {
    /// Parse a trunk page. If the declared leaf count doesn't fit within the page, the entries that
    /// are present are still returned along with a [`FreelistError::CountMismatch`].
    pub fn parse(
        number: PageNumber,
        data: &[u8],
        usable_size: usize,
    ) -> Result<(Self, Option<FreelistError>), FreelistError> {
        let data = &data[..data.len().min(usable_size)];
        let truncated = || FreelistError::Truncated {
            trunk: number,
            found: data.len(),
        };

        let (next_trunk, rest) = U32::read_from_prefix(data).map_err(|_| truncated())?;
        let (count, _) = U32::read_from_prefix(rest).map_err(|_| truncated())?;
        let count = count.get();

        let capacity = (data.len() - TRUNK_HEADER_SIZE) / TRUNK_ENTRY_SIZE;
        let present = capacity.min(count as usize);

        let leaves = data[TRUNK_HEADER_SIZE..]
            .chunks_exact(TRUNK_ENTRY_SIZE)
            .take(present)
            .enumerate()
            .map(|(i, entry)| {
                U32::read_from_bytes(entry).map(|page| FreeTrunkEntry {
                    offset: TRUNK_HEADER_SIZE + i * TRUNK_ENTRY_SIZE,
                    length: TRUNK_ENTRY_SIZE,
                    page: page.get(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| truncated())?;

        let mismatch = (present != count as usize).then_some(FreelistError::CountMismatch {
            trunk: number,
            declared: count,
            present,
        });

        Ok((
            Self {
                next_trunk: PageNumber::new(next_trunk.get()),
                count,
                leaves,
            },
            mismatch,
        ))
    }
}

/// Every page found by walking the freelist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Freelist {
    pub trunks: Vec<(PageNumber, FreeTrunkPage)>,
    pub leaves: Vec<(PageNumber, FreeLeafPage)>,
    pub errors: Vec<FreelistError>,
}

impl Freelist {
    /// Follow the freelist from `first`, visiting at most `total_pages` trunks. Everything resolved
    /// before an error is encountered is retained.
    pub fn walk(
        ctx: &PageCtx,
        buffer: &[u8],
        first: Option<PageNumber>,
        total_pages: u32,
    ) -> Self {
        let mut freelist = Self::default();

        let max_hops = total_pages.clamp(1, ctx.page_count.max(1));
        let mut visited = HashSet::new();
        let mut hops = 0;
        let mut next = first;

        while let Some(trunk) = next.take() {
            if hops >= max_hops || !visited.insert(trunk) {
                freelist
                    .errors
                    .push(FreelistError::CyclicFreelist { trunk, hops });
                break;
            }
            hops += 1;

            if !freelist.is_valid_page(ctx, trunk.get(), None) {
                break;
            }

            let (page, mismatch) =
                match FreeTrunkPage::parse(trunk, ctx.page_data(buffer, trunk), ctx.usable_size) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        freelist.errors.push(e);
                        break;
                    }
                };
            freelist.errors.extend(mismatch);

            for entry in &page.leaves {
                if freelist.is_valid_page(ctx, entry.page, Some(trunk)) {
                    if let Some(leaf) = PageNumber::new(entry.page) {
                        freelist.leaves.push((leaf, FreeLeafPage { trunk }));
                    }
                }
            }

            next = page.next_trunk;
            freelist.trunks.push((trunk, page));
        }

        let found = freelist.trunks.len() + freelist.leaves.len();
        if found != total_pages as usize {
            freelist.errors.push(FreelistError::TotalMismatch {
                expected: total_pages,
                found,
            });
        }

        freelist
    }

    /// Free pages must exist, and can never be the first page. Records an error if not.
    fn is_valid_page(&mut self, ctx: &PageCtx, page: u32, referrer: Option<PageNumber>) -> bool {
        let valid = page != PageNumber::FIRST.get() && ctx.contains(page);

        if !valid {
            self.errors
                .push(FreelistError::PageOutOfRange { page, referrer });
        }

        valid
    }

    /// Number of pages found on the freelist.
    pub fn len(&self) -> usize {
        self.trunks.len() + self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FreelistError {
    #[error("freelist revisits trunk page {trunk} after {hops} hops")]
    CyclicFreelist { trunk: PageNumber, hops: u32 },
    #[error("freelist references page {page}, which is not a valid free page{}", .referrer.map(|page| format!(" (from trunk {page})")).unwrap_or_default())]
    PageOutOfRange {
        page: u32,
        referrer: Option<PageNumber>,
    },
    #[error("trunk page {trunk} is truncated ({found} bytes)")]
    Truncated { trunk: PageNumber, found: usize },
    #[error("trunk page {trunk} declares {declared} leaves, but only {present} fit on the page")]
    CountMismatch {
        trunk: PageNumber,
        declared: u32,
        present: usize,
    },
    #[error("header declares {expected} freelist pages, but {found} were found")]
    TotalMismatch { expected: u32, found: usize },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{ctx, free_trunk_page};

    fn page(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    /// Lay out pages of 512 bytes, with the given pages placed at their page numbers.
    fn buffer(page_count: usize, pages: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut buffer = vec![0; page_count * 512];
        for (number, data) in pages {
            let start = (*number as usize - 1) * 512;
            buffer[start..start + 512].copy_from_slice(data);
        }
        buffer
    }

    #[test]
    fn parse_trunk() {
        let data = free_trunk_page(512, 9, &[3, 4]);
        let (trunk, mismatch) = FreeTrunkPage::parse(page(2), &data, 512).unwrap();

        assert_eq!(mismatch, None);
        assert_eq!(trunk.next_trunk, Some(page(9)));
        assert_eq!(trunk.count, 2);
        assert_eq!(
            trunk.leaves,
            vec![
                FreeTrunkEntry {
                    offset: 8,
                    length: 4,
                    page: 3
                },
                FreeTrunkEntry {
                    offset: 12,
                    length: 4,
                    page: 4
                },
            ]
        );
    }

    #[test]
    fn entries_are_big_endian() {
        let data = free_trunk_page(512, 0, &[0x0102_0304, 0x00ff_0000]);
        let (trunk, _) = FreeTrunkPage::parse(page(2), &data, 512).unwrap();

        let pages = trunk.leaves.iter().map(|entry| entry.page).collect::<Vec<_>>();
        assert_eq!(pages, vec![0x0102_0304, 0x00ff_0000]);
    }

    #[test]
    fn declared_count_exceeds_page() {
        let mut data = free_trunk_page(512, 0, &[3, 4]);
        data[4..8].copy_from_slice(&1000u32.to_be_bytes());

        let (trunk, mismatch) = FreeTrunkPage::parse(page(2), &data, 512).unwrap();

        assert_eq!(trunk.leaves.len(), 126);
        assert_eq!(
            mismatch,
            Some(FreelistError::CountMismatch {
                trunk: page(2),
                declared: 1000,
                present: 126
            })
        );
    }

    #[test]
    fn truncated_trunk() {
        assert_eq!(
            FreeTrunkPage::parse(page(2), &[0; 6], 512),
            Err(FreelistError::Truncated {
                trunk: page(2),
                found: 6
            })
        );
    }

    #[test]
    fn walks_trunks() {
        let ctx = ctx(512, 0, 6);
        let buffer = buffer(
            6,
            &[
                (2, free_trunk_page(512, 5, &[3, 4])),
                (5, free_trunk_page(512, 0, &[6])),
            ],
        );

        let freelist = Freelist::walk(&ctx, &buffer, Some(page(2)), 5);

        assert!(freelist.errors.is_empty());
        assert_eq!(
            freelist.trunks.iter().map(|(n, _)| n.get()).collect::<Vec<_>>(),
            vec![2, 5]
        );
        assert_eq!(
            freelist.leaves,
            vec![
                (page(3), FreeLeafPage { trunk: page(2) }),
                (page(4), FreeLeafPage { trunk: page(2) }),
                (page(6), FreeLeafPage { trunk: page(5) }),
            ]
        );
        assert_eq!(freelist.len(), 5);
    }

    #[test]
    fn self_referencing_trunk() {
        let ctx = ctx(512, 0, 3);
        let buffer = buffer(3, &[(2, free_trunk_page(512, 2, &[3]))]);

        let freelist = Freelist::walk(&ctx, &buffer, Some(page(2)), 2);

        assert_eq!(freelist.trunks.len(), 1);
        assert_eq!(freelist.leaves.len(), 1);
        assert_eq!(
            freelist.errors,
            vec![FreelistError::CyclicFreelist {
                trunk: page(2),
                hops: 1
            }]
        );
    }

    #[test]
    fn hop_cap() {
        // Two trunks pointing at each other, with a header that declares a single free page.
        let ctx = ctx(512, 0, 3);
        let buffer = buffer(
            3,
            &[
                (2, free_trunk_page(512, 3, &[])),
                (3, free_trunk_page(512, 2, &[])),
            ],
        );

        let freelist = Freelist::walk(&ctx, &buffer, Some(page(2)), 1);

        assert_eq!(freelist.trunks.len(), 1);
        assert!(matches!(
            freelist.errors[0],
            FreelistError::CyclicFreelist { hops: 1, .. }
        ));
    }

    #[test]
    fn invalid_leaf_pages() {
        let ctx = ctx(512, 0, 3);
        let buffer = buffer(3, &[(2, free_trunk_page(512, 0, &[1, 3, 40]))]);

        let freelist = Freelist::walk(&ctx, &buffer, Some(page(2)), 4);

        assert_eq!(freelist.leaves, vec![(page(3), FreeLeafPage { trunk: page(2) })]);
        assert_eq!(
            freelist.errors,
            vec![
                FreelistError::PageOutOfRange {
                    page: 1,
                    referrer: Some(page(2))
                },
                FreelistError::PageOutOfRange {
                    page: 40,
                    referrer: Some(page(2))
                },
                FreelistError::TotalMismatch {
                    expected: 4,
                    found: 2
                },
            ]
        );
    }

    #[test]
    fn empty() {
        let ctx = ctx(512, 0, 1);
        let freelist = Freelist::walk(&ctx, &[0; 512], None, 0);

        assert!(freelist.is_empty());
        assert!(freelist.errors.is_empty());
    }
}
