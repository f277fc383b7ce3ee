//! Payloads too large to fit on a b-tree page continue on a linked list of overflow pages. Each
//! overflow page begins with the number of the next page in the chain (`0` at the end of the
//! chain), followed by more of the payload.

use std::iter::FusedIterator;

use thiserror::Error;
use zerocopy::{FromBytes, big_endian::U32};

use crate::page::{PageCtx, PageNumber, payload::Payload};

/// Size of the next page pointer at the start of each overflow page.
const NEXT_POINTER_SIZE: usize = size_of::<U32>();

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverflowPage<'a> {
    /// Next page in the chain, or [`None`] at the end of the chain.
    pub next_page: Option<PageNumber>,
    /// Payload bytes held on this page. The final page in a chain may only use a prefix of these.
    pub payload: &'a [u8],
    /// Page which referred to this page, either the b-tree page holding the cell or the previous
    /// overflow page.
    pub referrer: PageNumber,
}

impl<'a> OverflowPage<'a> {
    pub fn parse(
        ctx: &PageCtx,
        number: PageNumber,
        data: &'a [u8],
        referrer: PageNumber,
    ) -> Result<Self, OverflowError> {
        let data = &data[..data.len().min(ctx.usable_size)];
        let (next_page, payload) =
            U32::read_from_prefix(data).map_err(|_| OverflowError::Truncated {
                page: number,
                found: data.len(),
            })?;

        Ok(Self {
            next_page: PageNumber::new(next_page.get()),
            payload,
            referrer,
        })
    }
}

/// A piece of a payload, found on an overflow page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverflowFragment<'a> {
    pub page: OverflowPageRef,
    pub data: &'a [u8],
}

/// Location of a fragment within the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverflowPageRef {
    pub number: PageNumber,
    pub referrer: PageNumber,
    pub next_page: Option<PageNumber>,
}

/// Lazily follows an overflow chain, yielding the payload held on each page.
///
/// The chain is followed for at most `page_count` hops, and stops once the expected number of
/// payload bytes has been produced. Any error ends the iteration.
#[derive(Clone, Debug)]
pub struct OverflowChain<'a> {
    ctx: PageCtx,
    buffer: &'a [u8],
    start: Option<PageNumber>,
    next: Option<(PageNumber, PageNumber)>,
    remaining: u64,
    read: u64,
    hops: u32,
    finished: bool,
}

impl<'a> OverflowChain<'a> {
    /// Chain for the overflow portion of a payload. `referrer` is the page holding the cell.
    pub fn new(
        ctx: &PageCtx,
        buffer: &'a [u8],
        payload: &Payload<'_>,
        referrer: PageNumber,
    ) -> Self {
        Self::from_page(
            ctx,
            buffer,
            payload.overflow_page,
            payload.overflow_size(),
            referrer,
        )
    }

    /// Chain beginning at `start`, which is expected to hold `size` bytes of payload in total.
    pub fn from_page(
        ctx: &PageCtx,
        buffer: &'a [u8],
        start: Option<PageNumber>,
        size: u64,
        referrer: PageNumber,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            buffer,
            start,
            next: start.map(|page| (page, referrer)),
            remaining: size,
            read: 0,
            hops: 0,
            finished: false,
        }
    }

    fn step(&mut self) -> Option<Result<OverflowFragment<'a>, OverflowError>> {
        let start = self.start?;

        let (number, referrer) = match (self.next, self.remaining) {
            (None, 0) => return None,
            (None, remaining) => {
                return Some(Err(OverflowError::PayloadLengthMismatch {
                    start,
                    expected: self.read + remaining,
                    found: self.read,
                }));
            }
            (Some((number, _)), 0) => {
                return Some(Err(OverflowError::ChainTooLong { start, page: number }));
            }
            (Some(next), _) => next,
        };

        self.hops += 1;
        if self.hops > self.ctx.page_count {
            return Some(Err(OverflowError::CyclicOverflowChain {
                start,
                hops: self.hops,
            }));
        }

        if !self.ctx.contains(number.get()) || number == PageNumber::FIRST {
            return Some(Err(OverflowError::PageOutOfRange {
                page: number,
                referrer,
            }));
        }

        let page = match OverflowPage::parse(
            &self.ctx,
            number,
            self.ctx.page_data(self.buffer, number),
            referrer,
        ) {
            Ok(page) => page,
            Err(e) => return Some(Err(e)),
        };

        // The final page of the chain only holds what remains of the payload.
        let take = page
            .payload
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        if take == 0 {
            return Some(Err(OverflowError::Truncated {
                page: number,
                found: page.payload.len() + NEXT_POINTER_SIZE,
            }));
        }

        self.remaining -= take as u64;
        self.read += take as u64;
        self.next = page.next_page.map(|next| (next, number));

        Some(Ok(OverflowFragment {
            page: OverflowPageRef {
                number,
                referrer,
                next_page: page.next_page,
            },
            data: &page.payload[..take],
        }))
    }
}

impl<'a> Iterator for OverflowChain<'a> {
    type Item = Result<OverflowFragment<'a>, OverflowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let item = self.step();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }

        item
    }
}

impl FusedIterator for OverflowChain<'_> {}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OverflowError {
    #[error("overflow chain from page {start} exceeded {hops} hops")]
    CyclicOverflowChain { start: PageNumber, hops: u32 },
    #[error("overflow page {page} (referenced by page {referrer}) is outside of the database")]
    PageOutOfRange {
        page: PageNumber,
        referrer: PageNumber,
    },
    #[error("overflow page {page} is truncated ({found} bytes)")]
    Truncated { page: PageNumber, found: usize },
    #[error(
        "overflow chain from page {start} ended after {found} of {expected} expected payload bytes"
    )]
    PayloadLengthMismatch {
        start: PageNumber,
        expected: u64,
        found: u64,
    },
    #[error("overflow chain from page {start} continues to page {page} beyond the payload")]
    ChainTooLong { start: PageNumber, page: PageNumber },
}
