//! Loan bookkeeping keyed by source transaction hash.
//!
//! The ledger is best effort: the dispatcher writes to it after a destination
//! call has been submitted, and a failed write never undoes that submission.
//! Documents follow the front end's `Loan` shape (camelCase, `null` for
//! fields the relayer cannot observe).

pub mod file;
pub mod memory;

use crate::types::{LedgerBackend, LedgerConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use file::FileLedger;
pub use memory::MemoryLedger;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

/// Lifecycle of a loan, numbered as the front end numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LoanState {
    None,
    Active,
    Settled,
    Defaulted,
}

impl From<LoanState> for u8 {
    fn from(state: LoanState) -> u8 {
        match state {
            LoanState::None => 0,
            LoanState::Active => 1,
            LoanState::Settled => 2,
            LoanState::Defaulted => 3,
        }
    }
}

impl TryFrom<u8> for LoanState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LoanState::None),
            1 => Ok(LoanState::Active),
            2 => Ok(LoanState::Settled),
            3 => Ok(LoanState::Defaulted),
            other => Err(format!("unknown loan state {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRecord {
    pub loan_id: Option<String>,
    pub amount_in: Option<String>,
    pub amount_out: Option<String>,
    pub token_type: u8,
    pub from_chain_id: u16,
    pub to_chain_id: u16,
    pub collateral: String,
    pub principal: String,
    pub interchange: bool,
    pub interest_rate: Option<f64>,
    pub start_secs: Option<u64>,
    pub sender: Option<String>,
    pub from_hash: Option<String>,
    /// Destination transaction that opened the loan.
    #[serde(default)]
    pub to_hash: Option<String>,
    /// Destination transaction that settled it.
    #[serde(default)]
    pub settle_hash: Option<String>,
    pub state: LoanState,
}

#[async_trait]
pub trait OutcomeLedger: Send + Sync {
    /// Store `record` under `source_tx_hash`, replacing any previous document.
    async fn put(&self, source_tx_hash: &str, record: &LoanRecord) -> Result<(), LedgerError>;

    async fn get(&self, source_tx_hash: &str) -> Result<Option<LoanRecord>, LedgerError>;

    /// Find a loan by its id, returning the key it is stored under.
    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Option<(String, LoanRecord)>, LedgerError>;
}

pub fn create_ledger(config: &LedgerConfig) -> Arc<dyn OutcomeLedger> {
    match config.backend {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::File => Arc::new(FileLedger::new(&config.path)),
    }
}

/// Loan ids are compared ignoring case and `0x` prefix.
pub(crate) fn same_loan_id(a: &str, b: &str) -> bool {
    let strip = |s: &str| s.trim_start_matches("0x").to_ascii_lowercase();
    strip(a) == strip(b)
}

#[cfg(test)]
pub(crate) fn sample_record(loan_id: &str) -> LoanRecord {
    LoanRecord {
        loan_id: Some(loan_id.to_string()),
        amount_in: None,
        amount_out: Some("1000000".to_string()),
        token_type: 1,
        from_chain_id: 21,
        to_chain_id: 6,
        collateral: "BTC".to_string(),
        principal: "USDT".to_string(),
        interchange: true,
        interest_rate: None,
        start_secs: Some(1_700_000_000),
        sender: Some(format!("0x{}", "02".repeat(32))),
        from_hash: Some("0xsource".to_string()),
        to_hash: Some("0xdest".to_string()),
        settle_hash: None,
        state: LoanState::Active,
    }
}
