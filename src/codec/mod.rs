//! Payload codec for Orbital cross-chain messages.
//!
//! `decode` and `encode` are pure: they turn a raw VAA payload into a typed
//! [`DecodedIntent`] and back, using the fixed layouts in [`layout`]. Building
//! destination-chain call arguments, including the amount width conversion,
//! lives in [`call`].

pub mod amount;
pub mod call;
pub mod layout;

use crate::classifier::MethodId;
use crate::types::ChainFamily;
use alloy_primitives::U256;
use amount::{read_amount, write_amount};
use layout::{Reader, Writer};

pub use amount::{AmountWidth, ByteOrder, NativeAmount};
pub use call::{build_call, AmplifyCall, BorrowCall, CallContext, DestinationCall, RepayCall};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed {method} payload ({layout}): need {expected} bytes, got {actual}")]
    MalformedPayload {
        method: MethodId,
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Amount {value} does not fit in {bits} bits")]
    AmountOverflow { value: String, bits: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowIntent {
    pub loan_id: [u8; 32],
    pub sender: [u8; 32],
    pub receiver: [u8; 32],
    pub to_chain: u16,
    pub from_contract: [u8; 32],
    pub to_contract: [u8; 32],
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepayIntent {
    pub loan_id: [u8; 32],
    pub from_chain: u16,
    pub from_contract: [u8; 32],
    pub to_contract: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmplifyIntent {
    pub receiver: [u8; 20],
    pub status: bool,
}

/// Chain-agnostic description of the destination action a payload asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedIntent {
    Borrow(BorrowIntent),
    Repay(RepayIntent),
    Amplify(AmplifyIntent),
}

impl DecodedIntent {
    pub fn method(&self) -> MethodId {
        match self {
            DecodedIntent::Borrow(_) => MethodId::OnBorrow,
            DecodedIntent::Repay(_) => MethodId::OnRepay,
            DecodedIntent::Amplify(_) => MethodId::OnAmplify,
        }
    }
}

/// Decode a payload emitted by a chain of `family` as `method`.
pub fn decode(family: ChainFamily, method: MethodId, raw: &[u8]) -> Result<DecodedIntent, CodecError> {
    match method {
        MethodId::OnBorrow => decode_borrow(family, raw).map(DecodedIntent::Borrow),
        MethodId::OnRepay => decode_repay(family, raw).map(DecodedIntent::Repay),
        MethodId::OnAmplify => decode_amplify(family, raw).map(DecodedIntent::Amplify),
    }
}

/// Encode an intent into the payload layout a chain of `family` emits.
pub fn encode(family: ChainFamily, intent: &DecodedIntent) -> Result<Vec<u8>, CodecError> {
    match intent {
        DecodedIntent::Borrow(borrow) => encode_borrow(family, borrow),
        DecodedIntent::Repay(repay) => Ok(encode_repay(family, repay)),
        DecodedIntent::Amplify(amplify) => Ok(encode_amplify(family, amplify)),
    }
}

fn decode_borrow(family: ChainFamily, raw: &[u8]) -> Result<BorrowIntent, CodecError> {
    let layout = layout::borrow_layout(family);
    let reader = Reader::new(raw, MethodId::OnBorrow, layout.name, layout.min_len())?;
    reader.check_tag(layout.tag)?;

    Ok(BorrowIntent {
        loan_id: reader.bytes32(layout.loan_id)?,
        sender: reader.bytes32(layout.sender)?,
        receiver: reader.bytes32(layout.receiver)?,
        to_chain: reader.u16_be(layout.to_chain, "to_chain")?,
        from_contract: reader.bytes32(layout.from_contract)?,
        to_contract: reader.bytes32(layout.to_contract)?,
        amount: read_amount(reader.bytes(layout.amount)?, layout.amount_order)?,
    })
}

fn decode_repay(family: ChainFamily, raw: &[u8]) -> Result<RepayIntent, CodecError> {
    let layout = layout::repay_layout(family);
    let reader = Reader::new(raw, MethodId::OnRepay, layout.name, layout.min_len())?;
    reader.check_tag(layout.tag)?;

    Ok(RepayIntent {
        loan_id: reader.bytes32(layout.loan_id)?,
        from_chain: reader.u16_be(layout.from_chain, "from_chain")?,
        from_contract: reader.bytes32(layout.from_contract)?,
        to_contract: reader.bytes32(layout.to_contract)?,
    })
}

fn decode_amplify(family: ChainFamily, raw: &[u8]) -> Result<AmplifyIntent, CodecError> {
    let layout = layout::amplify_layout(family);
    let reader = Reader::new(raw, MethodId::OnAmplify, layout.name, layout.min_len())?;
    reader.check_tag(layout.tag)?;

    Ok(AmplifyIntent {
        receiver: reader.bytes20(layout.receiver)?,
        status: reader.bytes(layout.status)?.iter().any(|b| *b != 0),
    })
}

fn encode_borrow(family: ChainFamily, intent: &BorrowIntent) -> Result<Vec<u8>, CodecError> {
    let layout = layout::borrow_layout(family);
    let amount = write_amount(intent.amount, layout.amount.width, layout.amount_order)?;

    let mut writer = Writer::new(layout.min_len());
    writer.put_tag(layout.tag, MethodId::OnBorrow);
    writer.put(layout.loan_id, &intent.loan_id);
    writer.put(layout.sender, &intent.sender);
    writer.put(layout.receiver, &intent.receiver);
    writer.put_u16(layout.to_chain, intent.to_chain);
    writer.put(layout.from_contract, &intent.from_contract);
    writer.put(layout.to_contract, &intent.to_contract);
    writer.put(layout.amount, &amount);
    Ok(writer.finish())
}

fn encode_repay(family: ChainFamily, intent: &RepayIntent) -> Vec<u8> {
    let layout = layout::repay_layout(family);
    let mut writer = Writer::new(layout.min_len());
    writer.put_tag(layout.tag, MethodId::OnRepay);
    writer.put(layout.loan_id, &intent.loan_id);
    writer.put_u16(layout.from_chain, intent.from_chain);
    writer.put(layout.from_contract, &intent.from_contract);
    writer.put(layout.to_contract, &intent.to_contract);
    writer.finish()
}

fn encode_amplify(family: ChainFamily, intent: &AmplifyIntent) -> Vec<u8> {
    let layout = layout::amplify_layout(family);
    let mut writer = Writer::new(layout.min_len());
    writer.put_tag(layout.tag, MethodId::OnAmplify);
    writer.put(layout.receiver, &intent.receiver);
    writer.put(layout.status, &[intent.status as u8]);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrow(amount: U256) -> DecodedIntent {
        DecodedIntent::Borrow(BorrowIntent {
            loan_id: [0x01; 32],
            sender: [0x02; 32],
            receiver: [0xaa; 32],
            to_chain: 6,
            from_contract: [0x03; 32],
            to_contract: [0x04; 32],
            amount,
        })
    }

    fn repay() -> DecodedIntent {
        DecodedIntent::Repay(RepayIntent {
            loan_id: [0x07; 32],
            from_chain: 21,
            from_contract: [0x08; 32],
            to_contract: [0x09; 32],
        })
    }

    #[test]
    fn test_round_trip_at_width_boundaries() {
        let cases = [
            (ChainFamily::Sui, U256::ZERO),
            (ChainFamily::Sui, U256::from(u64::MAX)),
            (ChainFamily::Evm, U256::ZERO),
            (ChainFamily::Evm, U256::MAX),
        ];
        for (family, amount) in cases {
            let intent = borrow(amount);
            let raw = encode(family, &intent).unwrap();
            assert_eq!(decode(family, MethodId::OnBorrow, &raw).unwrap(), intent);
        }

        for family in [ChainFamily::Sui, ChainFamily::Evm] {
            let raw = encode(family, &repay()).unwrap();
            assert_eq!(decode(family, MethodId::OnRepay, &raw).unwrap(), repay());

            for status in [true, false] {
                let intent = DecodedIntent::Amplify(AmplifyIntent { receiver: [0x5c; 20], status });
                let raw = encode(family, &intent).unwrap();
                assert_eq!(raw.len(), 41);
                assert_eq!(decode(family, MethodId::OnAmplify, &raw).unwrap(), intent);
            }
        }
    }

    #[test]
    fn test_sui_amount_wider_than_u64_overflows() {
        let err = encode(ChainFamily::Sui, &borrow(U256::from(u64::MAX) + U256::from(1u8)))
            .unwrap_err();
        assert!(matches!(err, CodecError::AmountOverflow { bits: 64, .. }));
    }

    #[test]
    fn test_sui_borrow_field_offsets() {
        let raw = encode(ChainFamily::Sui, &borrow(U256::from(1_000_000u64))).unwrap();
        assert_eq!(raw.len(), 354);
        assert_eq!(&raw[..16], b"ON_BORROW_METHOD");
        assert_eq!(&raw[112..114], &[0x00, 0x06]);
        assert_eq!(&raw[346..354], &[0x40, 0x42, 0x0f, 0, 0, 0, 0, 0]);
        // Reserved coin metadata is left zeroed.
        assert!(raw[178..346].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_evm_repay_matches_abi_words() {
        let raw = encode(ChainFamily::Evm, &repay()).unwrap();
        assert_eq!(raw.len(), 160);
        assert_eq!(&raw[..15], b"ON_REPAY_METHOD");
        assert!(raw[15..32].iter().all(|b| *b == 0));
        assert_eq!(raw[64 + 31], 21);
    }

    #[test]
    fn test_short_payloads_are_malformed() {
        for (method, family) in [
            (MethodId::OnBorrow, ChainFamily::Sui),
            (MethodId::OnBorrow, ChainFamily::Evm),
            (MethodId::OnRepay, ChainFamily::Sui),
            (MethodId::OnRepay, ChainFamily::Evm),
            (MethodId::OnAmplify, ChainFamily::Evm),
        ] {
            let mut raw = method.tag().to_vec();
            raw.truncate(10);
            assert!(matches!(
                decode(family, method, &raw),
                Err(CodecError::MalformedPayload { actual: 10, .. })
            ));
            assert!(matches!(
                decode(family, method, &[]),
                Err(CodecError::MalformedPayload { actual: 0, .. })
            ));
        }
    }

    #[test]
    fn test_one_byte_short_is_malformed() {
        let raw = encode(ChainFamily::Sui, &borrow(U256::from(5u8))).unwrap();
        assert!(matches!(
            decode(ChainFamily::Sui, MethodId::OnBorrow, &raw[..raw.len() - 1]),
            Err(CodecError::MalformedPayload { expected: 354, actual: 353, .. })
        ));
    }

    #[test]
    fn test_wrong_tag_is_rejected() {
        let raw = encode(ChainFamily::Evm, &repay()).unwrap();
        assert!(matches!(
            decode(ChainFamily::Evm, MethodId::OnAmplify, &raw),
            Err(CodecError::InvalidField { field: "method", .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let intent = borrow(U256::from(42u8));
        let mut raw = encode(ChainFamily::Evm, &intent).unwrap();
        raw.extend_from_slice(&[0xee; 7]);
        assert_eq!(decode(ChainFamily::Evm, MethodId::OnBorrow, &raw).unwrap(), intent);
    }
}
