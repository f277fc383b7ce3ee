use crate::page::PageNumber;

/// Size of the overflow page pointer which follows the local payload, when the payload spills.
pub const OVERFLOW_POINTER_SIZE: usize = 4;

/// Payload of a cell. Only the local portion is held; the remainder (if any) lives in the
/// overflow chain starting at [`Payload::overflow_page`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload<'a> {
    /// Total size of the payload, including any overflow.
    pub size: u64,
    /// Portion of the payload stored on the b-tree page.
    pub local: &'a [u8],
    /// First page of the overflow chain.
    pub overflow_page: Option<PageNumber>,
}

impl Payload<'_> {
    /// Number of payload bytes expected to be found in the overflow chain.
    pub fn overflow_size(&self) -> u64 {
        self.size - self.local.len() as u64
    }

    pub fn is_local(&self) -> bool {
        self.overflow_page.is_none()
    }
}

/// How a payload of some size is split between the page and the overflow chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadSplit {
    /// Bytes stored on the b-tree page.
    pub local: u64,
    /// Whether the payload spills onto overflow pages.
    pub overflows: bool,
}

/// Marker for table b-tree payloads.
#[derive(Clone, Copy, Debug)]
pub enum Table {}

/// Marker for index b-tree payloads.
#[derive(Clone, Copy, Debug)]
pub enum Index {}

/// The amount of payload which may be stored on a page differs between table and index b-trees.
pub trait PayloadCalculation {
    /// X: The maximum amount of payload that can be stored directly on the b-tree page without
    /// spilling onto an overflow page.
    fn max_local(usable_size: u64) -> u64;

    /// M: The minimum amount of payload that must be stored on the b-tree page before spilling is
    /// allowed.
    fn min_local(usable_size: u64) -> u64 {
        ((usable_size - 12) * 32 / 255) - 23
    }

    /// Determine how much of a payload of `payload_size` bytes is stored locally.
    fn split(usable_size: u64, payload_size: u64) -> PayloadSplit {
        let max_local = Self::max_local(usable_size);

        if payload_size <= max_local {
            return PayloadSplit {
                local: payload_size,
                overflows: false,
            };
        }

        let min_local = Self::min_local(usable_size);
        let k = min_local + (payload_size - min_local) % (usable_size - 4);

        PayloadSplit {
            local: if k <= max_local { k } else { min_local },
            overflows: true,
        }
    }
}

impl PayloadCalculation for Table {
    fn max_local(usable_size: u64) -> u64 {
        usable_size - 35
    }
}

impl PayloadCalculation for Index {
    fn max_local(usable_size: u64) -> u64 {
        ((usable_size - 12) * 64 / 255) - 23
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    const USABLE: u64 = 4096;

    #[test]
    fn table_thresholds() {
        assert_eq!(Table::max_local(USABLE), 4061);
        assert_eq!(Table::min_local(USABLE), 489);
    }

    #[test]
    fn index_thresholds() {
        assert_eq!(Index::max_local(USABLE), 1002);
        assert_eq!(Index::min_local(USABLE), 489);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::small(100)]
    #[case::at_max(4061)]
    fn table_local(#[case] size: u64) {
        assert_eq!(
            Table::split(USABLE, size),
            PayloadSplit {
                local: size,
                overflows: false
            }
        );
    }

    #[test]
    fn table_one_past_max_uses_min_local() {
        assert_eq!(
            Table::split(USABLE, 4062),
            PayloadSplit {
                local: 489,
                overflows: true
            }
        );
    }

    #[test]
    fn table_remainder_fits_locally() {
        // 489 + (5000 - 489) % 4092 = 908, which fits under the maximum.
        assert_eq!(
            Table::split(USABLE, 5000),
            PayloadSplit {
                local: 908,
                overflows: true
            }
        );
    }

    #[test]
    fn index_split() {
        assert!(!Index::split(USABLE, 1002).overflows);

        // The remainder (1003) would exceed the maximum, so only the minimum is kept.
        let split = Index::split(USABLE, 1003);
        assert!(split.overflows);
        assert_eq!(split.local, 489);

        let split = Index::split(USABLE, 4681);
        assert_eq!(split.local, 589);
    }

    #[test]
    fn reserved_space_shrinks_usable() {
        assert_eq!(Table::max_local(4096 - 32), 4029);
    }
}
