use super::CodecError;
use crate::classifier::trim_trailing_zeros;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order of an amount field inside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// Integer width a chain's contracts expect for amount arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum AmountWidth {
    U64,
    U128,
    U256,
}

impl AmountWidth {
    pub fn bits(&self) -> u16 {
        match self {
            AmountWidth::U64 => 64,
            AmountWidth::U128 => 128,
            AmountWidth::U256 => 256,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    pub fn max(&self) -> U256 {
        match self {
            AmountWidth::U64 => U256::from(u64::MAX),
            AmountWidth::U128 => U256::from(u128::MAX),
            AmountWidth::U256 => U256::MAX,
        }
    }

    /// Convert an internal amount to this width, refusing to truncate.
    pub fn narrow(&self, value: U256) -> Result<NativeAmount, CodecError> {
        if value > self.max() {
            return Err(CodecError::AmountOverflow {
                value: value.to_string(),
                bits: self.bits(),
            });
        }
        Ok(NativeAmount { width: *self, value })
    }
}

impl TryFrom<u16> for AmountWidth {
    type Error = String;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        match bits {
            64 => Ok(AmountWidth::U64),
            128 => Ok(AmountWidth::U128),
            256 => Ok(AmountWidth::U256),
            other => Err(format!("unsupported amount width: {} bits", other)),
        }
    }
}

impl From<AmountWidth> for u16 {
    fn from(width: AmountWidth) -> u16 {
        width.bits()
    }
}

impl fmt::Display for AmountWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.bits())
    }
}

/// An amount already checked to fit its destination width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeAmount {
    width: AmountWidth,
    value: U256,
}

impl NativeAmount {
    pub fn width(&self) -> AmountWidth {
        self.width
    }

    pub fn value(&self) -> U256 {
        self.value
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Normalize a raw amount field into a 256-bit integer.
///
/// Little-endian fields have their most significant zero bytes trimmed, are
/// reversed into big-endian order and left-padded back to 32 bytes.
pub fn read_amount(raw: &[u8], order: ByteOrder) -> Result<U256, CodecError> {
    let be: Vec<u8> = match order {
        ByteOrder::BigEndian => strip_leading_zeros(raw).to_vec(),
        ByteOrder::LittleEndian => {
            let significant = trim_trailing_zeros(raw);
            significant.iter().rev().copied().collect()
        }
    };

    if be.len() > 32 {
        return Err(CodecError::AmountOverflow {
            value: format!("0x{}", hex::encode(&be)),
            bits: 256,
        });
    }

    let mut word = [0u8; 32];
    let start = 32 - be.len();
    word[start..].copy_from_slice(&be);
    Ok(U256::from_be_bytes(word))
}

/// Serialize an amount into a field of `width` bytes, failing if it does not fit.
pub fn write_amount(value: U256, width: usize, order: ByteOrder) -> Result<Vec<u8>, CodecError> {
    let word: [u8; 32] = value.to_be_bytes();
    let significant = strip_leading_zeros(&word);

    if significant.len() > width {
        return Err(CodecError::AmountOverflow {
            value: value.to_string(),
            bits: (width * 8) as u16,
        });
    }

    let mut field = vec![0u8; width];
    field[width - significant.len()..].copy_from_slice(significant);
    if order == ByteOrder::LittleEndian {
        field.reverse();
    }
    Ok(field)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_normalization() {
        // 1_000_000 = 0x0f4240, stored little-endian in a u64 field.
        let raw = [0x40, 0x42, 0x0f, 0, 0, 0, 0, 0];
        assert_eq!(
            read_amount(&raw, ByteOrder::LittleEndian).unwrap(),
            U256::from(1_000_000u64)
        );
        assert_eq!(read_amount(&[0u8; 8], ByteOrder::LittleEndian).unwrap(), U256::ZERO);
        assert_eq!(
            read_amount(&[0xff; 8], ByteOrder::LittleEndian).unwrap(),
            U256::from(u64::MAX)
        );
    }

    #[test]
    fn test_big_endian_word() {
        let mut word = [0u8; 32];
        word[29..].copy_from_slice(&[0x0f, 0x42, 0x40]);
        assert_eq!(
            read_amount(&word, ByteOrder::BigEndian).unwrap(),
            U256::from(1_000_000u64)
        );
        assert_eq!(read_amount(&[0xff; 32], ByteOrder::BigEndian).unwrap(), U256::MAX);
    }

    #[test]
    fn test_write_amount_rejects_overflow() {
        let too_big = U256::from(u64::MAX) + U256::from(1u8);
        let err = write_amount(too_big, 8, ByteOrder::LittleEndian).unwrap_err();
        assert!(matches!(err, CodecError::AmountOverflow { bits: 64, .. }));

        let max = write_amount(U256::from(u64::MAX), 8, ByteOrder::LittleEndian).unwrap();
        assert_eq!(max, vec![0xff; 8]);

        let le = write_amount(U256::from(1_000_000u64), 8, ByteOrder::LittleEndian).unwrap();
        assert_eq!(le, vec![0x40, 0x42, 0x0f, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_narrow_boundaries() {
        for width in [AmountWidth::U64, AmountWidth::U128, AmountWidth::U256] {
            let max = width.narrow(width.max()).unwrap();
            assert_eq!(max.value(), width.max());
            assert_eq!(max.width(), width);
        }

        let two_pow_64 = U256::from(u64::MAX) + U256::from(1u8);
        assert!(matches!(
            AmountWidth::U64.narrow(two_pow_64),
            Err(CodecError::AmountOverflow { bits: 64, .. })
        ));
        assert!(AmountWidth::U128.narrow(two_pow_64).is_ok());

        let two_pow_128 = U256::from(u128::MAX) + U256::from(1u8);
        assert!(AmountWidth::U128.narrow(two_pow_128).is_err());
    }

    #[test]
    fn test_width_from_bits() {
        assert_eq!(AmountWidth::try_from(128).unwrap(), AmountWidth::U128);
        assert!(AmountWidth::try_from(32).is_err());
        assert_eq!(u16::from(AmountWidth::U256), 256);
    }
}
