use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of leading tag bytes that must be present for a payload to be
/// attributed to a method. Four bytes are enough to tell every known tag apart.
pub const MIN_TAG_PREFIX: usize = 4;

/// Cross-chain method identifiers emitted by the Orbital contracts.
///
/// The on-wire tag is the ASCII name, zero-padded to whatever width the emitting
/// chain uses (the raw length on Sui, a `bytes32` word on EVM chains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodId {
    OnBorrow,
    OnRepay,
    OnAmplify,
}

impl MethodId {
    pub const ALL: [MethodId; 3] = [MethodId::OnBorrow, MethodId::OnRepay, MethodId::OnAmplify];

    /// Significant (unpadded) tag bytes.
    pub fn tag(&self) -> &'static [u8] {
        match self {
            MethodId::OnBorrow => b"ON_BORROW_METHOD",
            MethodId::OnRepay => b"ON_REPAY_METHOD",
            MethodId::OnAmplify => b"ON_AMPLIFY_METHOD",
        }
    }

    /// Tag zero-padded to a 32-byte word, as destination contracts expect it.
    pub fn to_bytes32(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        let tag = self.tag();
        word[..tag.len()].copy_from_slice(tag);
        word
    }

    /// True if `encoded` carries this tag, ignoring trailing zero padding.
    pub fn matches_padded(&self, encoded: &[u8]) -> bool {
        trim_trailing_zeros(encoded) == self.tag()
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodId::OnBorrow => "ON_BORROW",
            MethodId::OnRepay => "ON_REPAY",
            MethodId::OnAmplify => "ON_AMPLIFY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Known(MethodId),
    Unknown,
}

impl Classification {
    pub fn method(&self) -> Option<MethodId> {
        match self {
            Classification::Known(method) => Some(*method),
            Classification::Unknown => None,
        }
    }
}

/// Match the leading bytes of a raw payload against the known method tags.
///
/// Only the significant bytes of each tag are compared, over as many bytes as
/// the payload provides, so the same tag classifies identically whatever width
/// the source chain padded it to. Ambiguous or non-matching prefixes are
/// `Unknown`.
pub fn classify(raw: &[u8]) -> Classification {
    let mut found = None;

    for method in MethodId::ALL {
        let tag = method.tag();
        let n = tag.len().min(raw.len());
        if n < MIN_TAG_PREFIX || raw[..n] != tag[..n] {
            continue;
        }
        if found.is_some() {
            return Classification::Unknown;
        }
        found = Some(method);
    }

    match found {
        Some(method) => Classification::Known(method),
        None => Classification::Unknown,
    }
}

pub(crate) fn trim_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(method: MethodId, width: usize) -> Vec<u8> {
        let tag = method.tag();
        let mut out = vec![0u8; width];
        let n = tag.len().min(width);
        out[..n].copy_from_slice(&tag[..n]);
        out
    }

    #[test]
    fn test_classify_across_padding_widths() {
        for method in MethodId::ALL {
            for width in [4, method.tag().len(), 20, 32] {
                assert_eq!(
                    classify(&padded(method, width)),
                    Classification::Known(method),
                    "{} padded to {} bytes",
                    method,
                    width
                );
            }
        }
    }

    #[test]
    fn test_classify_with_trailing_fields() {
        let mut payload = MethodId::OnRepay.tag().to_vec();
        payload.extend_from_slice(&[0xab; 98]);
        assert_eq!(classify(&payload), Classification::Known(MethodId::OnRepay));

        let mut word = MethodId::OnBorrow.to_bytes32().to_vec();
        word.extend_from_slice(&[0x11; 256]);
        assert_eq!(classify(&word), Classification::Known(MethodId::OnBorrow));
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(b"ON_SWAP_METHOD"), Classification::Unknown);
        assert_eq!(classify(&[0u8; 32]), Classification::Unknown);
        assert_eq!(classify(b""), Classification::Unknown);
        // Too short to attribute to any tag.
        assert_eq!(classify(b"ON_"), Classification::Unknown);
    }

    #[test]
    fn test_matches_padded() {
        assert!(MethodId::OnRepay.matches_padded(&padded(MethodId::OnRepay, 32)));
        assert!(MethodId::OnRepay.matches_padded(MethodId::OnRepay.tag()));
        assert!(!MethodId::OnRepay.matches_padded(&padded(MethodId::OnBorrow, 32)));
    }
}
