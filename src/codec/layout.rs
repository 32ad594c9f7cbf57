//! Fixed byte layouts of the cross-chain payloads.
//!
//! Payloads are not self-describing: every field sits at a fixed offset. Sui
//! emitters pack fields back to back (tags at their raw ASCII length, amounts
//! as little-endian `u64`), EVM emitters ABI-encode every field into its own
//! 32-byte word. Each layout is versioned so a contract upgrade can add a new
//! descriptor next to the old one.

use super::amount::ByteOrder;
use super::CodecError;
use crate::classifier::MethodId;
use crate::types::ChainFamily;

/// A fixed byte range inside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub width: usize,
}

impl Span {
    pub const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    /// ABI word `index` (32 bytes each).
    pub const fn word(index: usize) -> Self {
        Self { offset: index * 32, width: 32 }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowLayout {
    pub name: &'static str,
    pub version: u8,
    pub tag: Span,
    pub loan_id: Span,
    pub sender: Span,
    pub receiver: Span,
    pub to_chain: Span,
    pub from_contract: Span,
    pub to_contract: Span,
    pub amount: Span,
    pub amount_order: ByteOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepayLayout {
    pub name: &'static str,
    pub version: u8,
    pub tag: Span,
    pub loan_id: Span,
    pub from_chain: Span,
    pub from_contract: Span,
    pub to_contract: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmplifyLayout {
    pub name: &'static str,
    pub version: u8,
    pub tag: Span,
    pub receiver: Span,
    pub status: Span,
}

impl BorrowLayout {
    pub fn min_len(&self) -> usize {
        [
            self.tag,
            self.loan_id,
            self.sender,
            self.receiver,
            self.to_chain,
            self.from_contract,
            self.to_contract,
            self.amount,
        ]
        .iter()
        .map(Span::end)
        .max()
        .unwrap_or(0)
    }
}

impl RepayLayout {
    pub fn min_len(&self) -> usize {
        [self.tag, self.loan_id, self.from_chain, self.from_contract, self.to_contract]
            .iter()
            .map(Span::end)
            .max()
            .unwrap_or(0)
    }
}

impl AmplifyLayout {
    pub fn min_len(&self) -> usize {
        [self.tag, self.receiver, self.status]
            .iter()
            .map(Span::end)
            .max()
            .unwrap_or(0)
    }
}

// Sui packs the borrow record; bytes 178..346 carry the coin metadata the
// relayer does not use.
pub const SUI_BORROW_V1: BorrowLayout = BorrowLayout {
    name: "sui-borrow-v1",
    version: 1,
    tag: Span::new(0, 16),
    loan_id: Span::new(16, 32),
    sender: Span::new(48, 32),
    receiver: Span::new(80, 32),
    to_chain: Span::new(112, 2),
    from_contract: Span::new(114, 32),
    to_contract: Span::new(146, 32),
    amount: Span::new(346, 8),
    amount_order: ByteOrder::LittleEndian,
};

pub const SUI_REPAY_V1: RepayLayout = RepayLayout {
    name: "sui-repay-v1",
    version: 1,
    tag: Span::new(0, 15),
    loan_id: Span::new(15, 32),
    from_chain: Span::new(47, 2),
    from_contract: Span::new(49, 32),
    to_contract: Span::new(81, 32),
};

// abi.encode(bytes32 method, bytes32 loanId, bytes32 sender, bytes32 receiver,
//            uint16 toChainId, bytes32 fromContract, bytes32 toContract,
//            bytes32 tokenOut, uint256 value)
pub const EVM_BORROW_V1: BorrowLayout = BorrowLayout {
    name: "evm-borrow-v1",
    version: 1,
    tag: Span::word(0),
    loan_id: Span::word(1),
    sender: Span::word(2),
    receiver: Span::word(3),
    to_chain: Span::word(4),
    from_contract: Span::word(5),
    to_contract: Span::word(6),
    amount: Span::word(8),
    amount_order: ByteOrder::BigEndian,
};

// abi.encode(bytes32 method, bytes32 loanId, uint16 fromChainId,
//            bytes32 fromContract, bytes32 toContract)
pub const EVM_REPAY_V1: RepayLayout = RepayLayout {
    name: "evm-repay-v1",
    version: 1,
    tag: Span::word(0),
    loan_id: Span::word(1),
    from_chain: Span::word(2),
    from_contract: Span::word(3),
    to_contract: Span::word(4),
};

pub const AMPLIFY_V1: AmplifyLayout = AmplifyLayout {
    name: "amplify-v1",
    version: 1,
    tag: Span::new(0, 20),
    receiver: Span::new(20, 20),
    status: Span::new(40, 1),
};

pub fn borrow_layout(family: ChainFamily) -> &'static BorrowLayout {
    match family {
        ChainFamily::Sui => &SUI_BORROW_V1,
        ChainFamily::Evm => &EVM_BORROW_V1,
    }
}

pub fn repay_layout(family: ChainFamily) -> &'static RepayLayout {
    match family {
        ChainFamily::Sui => &SUI_REPAY_V1,
        ChainFamily::Evm => &EVM_REPAY_V1,
    }
}

pub fn amplify_layout(_family: ChainFamily) -> &'static AmplifyLayout {
    &AMPLIFY_V1
}

/// Bounds-checked field access over a payload for one layout.
pub struct Reader<'a> {
    raw: &'a [u8],
    method: MethodId,
    layout: &'static str,
}

impl<'a> Reader<'a> {
    /// Fails with `MalformedPayload` when `raw` is shorter than `min_len`.
    pub fn new(
        raw: &'a [u8],
        method: MethodId,
        layout: &'static str,
        min_len: usize,
    ) -> Result<Self, CodecError> {
        if raw.len() < min_len {
            return Err(CodecError::MalformedPayload {
                method,
                layout,
                expected: min_len,
                actual: raw.len(),
            });
        }
        Ok(Self { raw, method, layout })
    }

    pub fn bytes(&self, span: Span) -> Result<&'a [u8], CodecError> {
        self.raw
            .get(span.offset..span.end())
            .ok_or(CodecError::MalformedPayload {
                method: self.method,
                layout: self.layout,
                expected: span.end(),
                actual: self.raw.len(),
            })
    }

    pub fn bytes32(&self, span: Span) -> Result<[u8; 32], CodecError> {
        self.fixed::<32>(span)
    }

    pub fn bytes20(&self, span: Span) -> Result<[u8; 20], CodecError> {
        self.fixed::<20>(span)
    }

    fn fixed<const N: usize>(&self, span: Span) -> Result<[u8; N], CodecError> {
        let bytes = self.bytes(span)?;
        <[u8; N]>::try_from(bytes).map_err(|_| CodecError::InvalidField {
            field: "fixed",
            reason: format!("expected {} bytes, layout span is {}", N, bytes.len()),
        })
    }

    /// Big-endian `u16`, either packed (2 bytes) or in a wider ABI word whose
    /// high bytes must be zero.
    pub fn u16_be(&self, span: Span, field: &'static str) -> Result<u16, CodecError> {
        let bytes = self.bytes(span)?;
        if bytes.len() < 2 {
            return Err(CodecError::InvalidField {
                field,
                reason: format!("span of {} bytes cannot hold a u16", bytes.len()),
            });
        }
        let (high, low) = bytes.split_at(bytes.len() - 2);
        if high.iter().any(|b| *b != 0) {
            return Err(CodecError::InvalidField {
                field,
                reason: format!("value 0x{} exceeds u16", hex::encode(bytes)),
            });
        }
        Ok(u16::from_be_bytes([low[0], low[1]]))
    }

    pub fn check_tag(&self, span: Span) -> Result<(), CodecError> {
        let tag = self.bytes(span)?;
        let significant = self.method.tag();
        let n = significant.len().min(tag.len());
        let padding_clean = tag[n..].iter().all(|b| *b == 0);
        if tag[..n] != significant[..n] || !padding_clean {
            return Err(CodecError::InvalidField {
                field: "method",
                reason: format!("tag 0x{} is not {}", hex::encode(tag), self.method),
            });
        }
        Ok(())
    }
}

/// Zero-initialised payload buffer for one layout.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(min_len: usize) -> Self {
        Self { buf: vec![0u8; min_len] }
    }

    pub fn put(&mut self, span: Span, bytes: &[u8]) {
        let n = bytes.len().min(span.width);
        // Right-align narrower values inside the span (ABI word convention).
        let start = span.end() - n;
        self.buf[start..span.end()].copy_from_slice(&bytes[bytes.len() - n..]);
    }

    /// Left-aligned, zero-padded tag.
    pub fn put_tag(&mut self, span: Span, method: MethodId) {
        let tag = method.tag();
        let n = tag.len().min(span.width);
        self.buf[span.offset..span.offset + n].copy_from_slice(&tag[..n]);
    }

    pub fn put_u16(&mut self, span: Span, value: u16) {
        self.put(span, &value.to_be_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
