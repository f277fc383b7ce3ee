use std::ops::RangeInclusive;

use derive_more::Deref;
use thiserror::Error;

/// Page sizes which are stored directly in the header.
const ENCODABLE: RangeInclusive<u32> = 512..=32768;
/// The largest page size doesn't fit in the 2 byte header field, so it is stored as `1`.
const LARGEST: u32 = 65536;

/// Size of a database page in bytes.
#[derive(Clone, Copy, Debug, Deref, PartialEq, Eq)]
pub struct PageSize(u32);

impl PageSize {
    pub fn get(&self) -> usize {
        self.0 as usize
    }

    /// Decode the page size as stored in the header.
    pub fn from_raw(raw: u16) -> Result<Self, PageSizeError> {
        let size = match raw {
            1 => LARGEST,
            raw => raw as u32,
        };

        if !size.is_power_of_two() {
            Err(PageSizeError::NotPowerOfTwo(raw))
        } else if size != LARGEST && !ENCODABLE.contains(&size) {
            Err(PageSizeError::NotInRange(raw))
        } else {
            Ok(Self(size))
        }
    }

    /// The value stored in the header for this page size.
    pub fn raw(&self) -> u16 {
        u16::try_from(self.0).unwrap_or(1)
    }
}

impl TryFrom<u16> for PageSize {
    type Error = PageSizeError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PageSizeError {
    #[error("page size {0} is outside of 512..=32768 (or 1 for 65536)")]
    NotInRange(u16),
    #[error("page size {0} is not a power of two")]
    NotPowerOfTwo(u16),
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::smallest(512, 512)]
    #[case::common(4096, 4096)]
    #[case::encodable(32768, 32768)]
    #[case::largest(1, 65536)]
    fn valid(#[case] raw: u16, #[case] size: usize) {
        let page_size = PageSize::from_raw(raw).unwrap();

        assert_eq!(page_size.get(), size);
        assert_eq!(page_size.raw(), raw);
    }

    #[rstest]
    #[case::zero(0, PageSizeError::NotPowerOfTwo(0))]
    #[case::too_small(256, PageSizeError::NotInRange(256))]
    #[case::odd(65535, PageSizeError::NotPowerOfTwo(65535))]
    #[case::uneven(1234, PageSizeError::NotPowerOfTwo(1234))]
    fn invalid(#[case] raw: u16, #[case] expected: PageSizeError) {
        assert_eq!(PageSize::try_from(raw), Err(expected));
    }
}
