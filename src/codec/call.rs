//! Destination-chain call arguments.
//!
//! A [`DecodedIntent`] says what the source contract asked for; a
//! [`DestinationCall`] is that request bound to one destination: message
//! nonce and origin attached, token identifiers resolved for the destination
//! chain, and the amount converted to the destination's native width.

use super::{AmountWidth, CodecError, DecodedIntent, NativeAmount};
use crate::classifier::MethodId;
use crate::tokens::{RouteTokens, TokenRef};
use serde::Serialize;

/// Message-level context needed to turn an intent into a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub nonce: u32,
    pub from_chain: u16,
    pub tokens: RouteTokens,
    pub width: AmountWidth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowCall {
    pub nonce: u32,
    pub method: MethodId,
    #[serde(with = "hex_bytes")]
    pub loan_id: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub receiver: [u8; 32],
    pub from_chain: u16,
    #[serde(with = "hex_bytes")]
    pub from_contract: [u8; 32],
    pub token_in: TokenRef,
    pub token_out: TokenRef,
    pub token_type: u8,
    #[serde(serialize_with = "amount_string")]
    pub value: NativeAmount,
}

/// Repay carries no amount: the destination releases what the loan recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepayCall {
    pub nonce: u32,
    pub method: MethodId,
    #[serde(with = "hex_bytes")]
    pub loan_id: [u8; 32],
    pub token_in: TokenRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmplifyCall {
    pub nonce: u32,
    pub method: MethodId,
    #[serde(with = "hex_bytes")]
    pub receiver: [u8; 20],
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DestinationCall {
    Borrow(BorrowCall),
    Repay(RepayCall),
    Amplify(AmplifyCall),
}

impl DestinationCall {
    pub fn method(&self) -> MethodId {
        match self {
            DestinationCall::Borrow(call) => call.method,
            DestinationCall::Repay(call) => call.method,
            DestinationCall::Amplify(call) => call.method,
        }
    }

    pub fn nonce(&self) -> u32 {
        match self {
            DestinationCall::Borrow(call) => call.nonce,
            DestinationCall::Repay(call) => call.nonce,
            DestinationCall::Amplify(call) => call.nonce,
        }
    }

    /// JSON rendering used when a failed call is logged for manual replay.
    pub fn to_replay_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable call: {}>", e))
    }
}

/// Bind an intent to its destination, converting the amount to `ctx.width`.
pub fn build_call(intent: &DecodedIntent, ctx: &CallContext) -> Result<DestinationCall, CodecError> {
    let call = match intent {
        DecodedIntent::Borrow(borrow) => DestinationCall::Borrow(BorrowCall {
            nonce: ctx.nonce,
            method: MethodId::OnBorrow,
            loan_id: borrow.loan_id,
            receiver: borrow.receiver,
            from_chain: ctx.from_chain,
            from_contract: borrow.from_contract,
            token_in: ctx.tokens.token_in.clone(),
            token_out: ctx.tokens.token_out.clone(),
            token_type: ctx.tokens.token_type,
            value: ctx.width.narrow(borrow.amount)?,
        }),
        DecodedIntent::Repay(repay) => DestinationCall::Repay(RepayCall {
            nonce: ctx.nonce,
            method: MethodId::OnRepay,
            loan_id: repay.loan_id,
            token_in: ctx.tokens.token_in.clone(),
        }),
        DecodedIntent::Amplify(amplify) => DestinationCall::Amplify(AmplifyCall {
            nonce: ctx.nonce,
            method: MethodId::OnAmplify,
            receiver: amplify.receiver,
            status: amplify.status,
        }),
    };
    Ok(call)
}

fn amount_string<S: serde::Serializer>(value: &NativeAmount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

mod hex_bytes {
    pub fn serialize<S: serde::Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::types::hex_0x(bytes))
    }
}
