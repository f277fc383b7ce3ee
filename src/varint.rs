use derive_more::Deref;
use thiserror::Error;

/// Maximum number of bytes a varint may occupy.
pub const MAX_VARINT_LEN: usize = 9;

/// Largest value which can be encoded without the 9 byte form (8 groups of 7 bits).
const MAX_EIGHT_BYTE_VALUE: u64 = (1 << 56) - 1;

/// Variable length big-endian integer, as used within cell headers.
///
/// The first 8 bytes each contribute their low 7 bits, with the high bit indicating that another
/// byte follows. If a 9th byte is reached, all 8 of its bits contribute to the value.
#[derive(Clone, Copy, Debug, Deref, PartialEq, Eq)]
pub struct VarInt(u64);

impl VarInt {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Decode a varint from the start of the buffer, producing the value and the number of bytes
    /// consumed.
    pub fn from_buffer(buf: &[u8]) -> Result<(Self, usize), VarIntError> {
        let mut value: u64 = 0;

        for (i, b) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
            if i == MAX_VARINT_LEN - 1 {
                value = (value << 8) | *b as u64;
                return Ok((Self(value), MAX_VARINT_LEN));
            }

            value = (value << 7) | (b & 0b0111_1111) as u64;

            if b >> 7 == 0 {
                return Ok((Self(value), i + 1));
            }
        }

        Err(VarIntError::Truncated {
            available: buf.len(),
        })
    }

    /// Decode a varint located at `offset` within the buffer.
    pub fn read_at(buf: &[u8], offset: usize) -> Result<(Self, usize), VarIntError> {
        Self::from_buffer(buf.get(offset..).unwrap_or_default())
    }

    /// Number of bytes required to encode this value.
    pub fn encoded_len(&self) -> usize {
        if self.0 > MAX_EIGHT_BYTE_VALUE {
            return MAX_VARINT_LEN;
        }

        let bits = u64::BITS - self.0.leading_zeros();
        (bits as usize).div_ceil(7).max(1)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        if self.0 > MAX_EIGHT_BYTE_VALUE {
            // The first 8 bytes carry the upper 56 bits, and the final byte is used in full.
            let high = self.0 >> 8;
            let mut bytes = (0..8)
                .rev()
                .map(|group| ((high >> (group * 7)) as u8 & 0b0111_1111) | 0b1000_0000)
                .collect::<Vec<_>>();
            bytes.push(self.0 as u8);

            return bytes;
        }

        if self.0 == 0 {
            return vec![0x00];
        }

        let mut bytes = Vec::with_capacity(MAX_VARINT_LEN - 1);

        let mut n = self.0;
        while n > 0 {
            bytes.push((n as u8 & 0b0111_1111) | 0b1000_0000);
            n >>= 7;
        }

        bytes.reverse();

        *bytes.last_mut().expect("0 already handled") &= 0b0111_1111;

        bytes
    }
}

impl From<VarInt> for u64 {
    fn from(value: VarInt) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VarIntError {
    #[error("varint runs past the end of the buffer ({available} bytes available)")]
    Truncated { available: usize },
}
