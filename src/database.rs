//! Decoding of a complete database image.
//!
//! Decoding happens in ordered phases over a single borrowed buffer:
//!
//! 1. The header is parsed, which is the only fatal step.
//! 2. The freelist is walked, marking free trunk and leaf pages (which carry no flag).
//! 3. Every other page is classified by its flag and decoded, optionally in parallel.
//! 4. Overflow chains referenced by decoded cells are followed, re-classifying the pages they pass
//!    through as [`PageKind::Overflow`].

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    freelist::{Freelist, FreelistError},
    header::{DbHeader, DbHeaderError},
    overflow::{OverflowChain, OverflowError, OverflowPage, OverflowPageRef},
    page::{
        Page, PageClaim, PageCtx, PageKind, PageNumber, UnknownPage, UnknownReason, join_claims,
        payload::Payload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Classify and decode pages across the rayon thread pool.
    pub parallel: bool,
    /// Re-classify every page of each overflow chain, rather than just the first.
    pub follow_overflow_chains: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            follow_overflow_chains: true,
        }
    }
}

/// A decoded database image. Pages are stored in order, so page `n` is found at index `n - 1`.
#[derive(Clone, Debug)]
pub struct Database<'a> {
    pub header: DbHeader,
    /// Problems found while decoding which didn't prevent the database from being decoded.
    pub warnings: Vec<Warning>,
    pages: Vec<Page<'a>>,
    buffer: &'a [u8],
    ctx: PageCtx,
}

impl<'a> Database<'a> {
    pub fn decode(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        Self::decode_with(buffer, &DecodeOptions::default())
    }

    pub fn decode_with(buffer: &'a [u8], options: &DecodeOptions) -> Result<Self, DecodeError> {
        let header = DbHeader::parse(buffer)?;
        let mut warnings = Vec::new();

        let ctx = PageCtx::new(&header, page_count(&header, buffer.len(), &mut warnings));
        debug!(
            page_size = ctx.page_size,
            usable_size = ctx.usable_size,
            page_count = ctx.page_count,
            "database.header"
        );

        let free_pages = walk_freelist(&header, &ctx, buffer, &mut warnings);

        let decode_page = |number: PageNumber| {
            let data = ctx.page_data(buffer, number);

            let kind = match free_pages.get(&number).map(Vec::as_slice) {
                Some([kind]) => kind.clone(),
                Some(kinds) if !kinds.is_empty() => PageKind::Unknown(UnknownPage {
                    reason: UnknownReason::ConflictingClaims(
                        kinds.iter().filter_map(PageKind::claim).collect(),
                    ),
                }),
                _ => return Page::classify(&ctx, number, data),
            };

            Page { number, data, kind }
        };

        let pages = (1..=ctx.page_count).filter_map(PageNumber::new);
        let mut pages: Vec<Page<'a>> = if options.parallel {
            pages
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(decode_page)
                .collect()
        } else {
            pages.map(decode_page).collect()
        };
        debug!(pages = pages.len(), parallel = options.parallel, "database.pages");

        if let Some(last) = pages.last() {
            if last.data.len() < ctx.page_size {
                record(
                    &mut warnings,
                    Warning::TruncatedPage {
                        page: last.number,
                        expected: ctx.page_size,
                        found: last.data.len(),
                    },
                );
            }
        }

        resolve_overflow(&ctx, buffer, &mut pages, options, &mut warnings);

        Ok(Self {
            header,
            warnings,
            pages,
            buffer,
            ctx,
        })
    }

    pub fn ctx(&self) -> &PageCtx {
        &self.ctx
    }

    /// Number of pages which were decoded.
    pub fn page_count(&self) -> u32 {
        self.ctx.page_count
    }

    pub fn page(&self, number: PageNumber) -> Option<&Page<'a>> {
        self.pages.get(number.index())
    }

    pub fn get(&self, page: u32) -> Option<&Page<'a>> {
        self.page(PageNumber::new(page)?)
    }

    pub fn pages(&self) -> &[Page<'a>] {
        &self.pages
    }

    /// Lazily follow the overflow chain of a payload found on page `page`.
    pub fn overflow_chain(&self, page: PageNumber, payload: &Payload<'_>) -> OverflowChain<'a> {
        OverflowChain::new(&self.ctx, self.buffer, payload, page)
    }

    /// Reassemble the complete payload of a cell found on page `page`.
    pub fn read_payload(
        &self,
        page: PageNumber,
        payload: &Payload<'_>,
    ) -> Result<Vec<u8>, OverflowError> {
        let mut bytes = payload.local.to_vec();

        for fragment in self.overflow_chain(page, payload) {
            bytes.extend_from_slice(fragment?.data);
        }

        Ok(bytes)
    }
}

/// Determine how many pages to decode. The page count in the header is only trusted when it was
/// written by a version which maintains it, otherwise it's derived from the size of the image.
fn page_count(header: &DbHeader, length: usize, warnings: &mut Vec<Warning>) -> u32 {
    let page_size = header.page_size.get();
    let available = length.div_ceil(page_size);

    let declared = header
        .reported_page_count()
        .map_or(available, |count| count as usize);

    let expected = declared.saturating_mul(page_size);
    if length < expected {
        record(
            warnings,
            Warning::TruncatedFile {
                page_count: declared,
                expected,
                found: length,
            },
        );
    }

    u32::try_from(declared.min(available)).unwrap_or(u32::MAX)
}

/// Walk the freelist, producing the kinds of every page it claims. A page with more than one kind
/// was claimed more than once.
fn walk_freelist<'a>(
    header: &DbHeader,
    ctx: &PageCtx,
    buffer: &[u8],
    warnings: &mut Vec<Warning>,
) -> BTreeMap<PageNumber, Vec<PageKind<'a>>> {
    let freelist = Freelist::walk(
        ctx,
        buffer,
        header.first_freelist_page,
        header.total_freelist_pages,
    );
    debug!(
        trunks = freelist.trunks.len(),
        leaves = freelist.leaves.len(),
        "database.freelist"
    );

    for error in freelist.errors {
        record(warnings, error.into());
    }

    let mut free_pages = BTreeMap::<_, Vec<_>>::new();
    for (number, trunk) in freelist.trunks {
        free_pages
            .entry(number)
            .or_default()
            .push(PageKind::FreeTrunk(trunk));
    }
    for (number, leaf) in freelist.leaves {
        free_pages
            .entry(number)
            .or_default()
            .push(PageKind::FreeLeaf(leaf));
    }

    for (page, kinds) in &free_pages {
        if kinds.len() > 1 {
            record(
                warnings,
                Warning::ConflictingClaims {
                    page: *page,
                    claims: kinds.iter().filter_map(PageKind::claim).collect(),
                },
            );
        }
    }

    free_pages
}

/// Follow every overflow chain referenced by a decoded cell, claiming the pages along the way.
fn resolve_overflow<'a>(
    ctx: &PageCtx,
    buffer: &'a [u8],
    pages: &mut [Page<'a>],
    options: &DecodeOptions,
    warnings: &mut Vec<Warning>,
) {
    let mut chains = Vec::new();
    for page in pages.iter() {
        for (cell_index, payload) in page.overflow_references() {
            chains.push((
                page.number,
                cell_index,
                OverflowChain::new(ctx, buffer, payload, page.number),
            ));
        }
    }
    debug!(chains = chains.len(), "database.overflow");

    let limit = if options.follow_overflow_chains {
        usize::MAX
    } else {
        1
    };

    for (page, cell_index, chain) in chains {
        let mut visited = HashSet::new();

        for fragment in chain.take(limit) {
            let fragment = match fragment {
                Ok(fragment) => fragment,
                Err(source) => {
                    record(
                        warnings,
                        Warning::Overflow {
                            page,
                            cell_index,
                            source,
                        },
                    );
                    break;
                }
            };

            // A chain which loops back on itself is left for the hop limit to report.
            if !visited.insert(fragment.page.number) {
                continue;
            }

            if !claim_overflow(ctx, pages, &fragment.page, warnings) {
                break;
            }
        }
    }
}

/// Mark a page as belonging to an overflow chain. Returns whether the chain should be followed
/// any further.
fn claim_overflow<'a>(
    ctx: &PageCtx,
    pages: &mut [Page<'a>],
    page_ref: &OverflowPageRef,
    warnings: &mut Vec<Warning>,
) -> bool {
    let Some(page) = pages.get_mut(page_ref.number.index()) else {
        return false;
    };
    let claim = PageClaim::Overflow {
        referrer: page_ref.referrer,
    };

    match &mut page.kind {
        PageKind::Unknown(UnknownPage {
            reason: UnknownReason::ConflictingClaims(claims),
        }) => {
            claims.push(claim);
            let claims = claims.clone();
            record(
                warnings,
                Warning::ConflictingClaims {
                    page: page.number,
                    claims,
                },
            );
            false
        }
        PageKind::Unknown(_) => {
            match OverflowPage::parse(ctx, page.number, page.data, page_ref.referrer) {
                Ok(overflow) => {
                    page.kind = PageKind::Overflow(overflow);
                    true
                }
                Err(_) => false,
            }
        }
        PageKind::Overflow(existing) => {
            let first = existing.referrer;
            record(
                warnings,
                Warning::SharedOverflowPage {
                    page: page.number,
                    first,
                    second: page_ref.referrer,
                },
            );
            false
        }
        kind => {
            let claims = kind.claim().into_iter().chain([claim]).collect::<Vec<_>>();
            page.kind = PageKind::Unknown(UnknownPage {
                reason: UnknownReason::ConflictingClaims(claims.clone()),
            });
            record(
                warnings,
                Warning::ConflictingClaims {
                    page: page.number,
                    claims,
                },
            );
            false
        }
    }
}

fn record(warnings: &mut Vec<Warning>, warning: Warning) {
    warn!(%warning, "database.warning");
    warnings.push(warning);
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Warning {
    #[error("file is truncated: {page_count} pages need {expected} bytes, but found {found}")]
    TruncatedFile {
        page_count: usize,
        expected: usize,
        found: usize,
    },
    #[error("page {page} is truncated ({found} of {expected} bytes)")]
    TruncatedPage {
        page: PageNumber,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Freelist(#[from] FreelistError),
    #[error("overflow from cell {cell_index} on page {page}: {source}")]
    Overflow {
        page: PageNumber,
        cell_index: usize,
        source: OverflowError,
    },
    #[error("page {page} has conflicting claims: {}", join_claims(.claims))]
    ConflictingClaims {
        page: PageNumber,
        claims: Vec<PageClaim>,
    },
    #[error("overflow page {page} is referenced by both page {first} and page {second}")]
    SharedOverflowPage {
        page: PageNumber,
        first: PageNumber,
        second: PageNumber,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid database header: {0}")]
    Header(#[from] DbHeaderError),
}
