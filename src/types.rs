use crate::codec::AmountWidth;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Core relayer types shared by the listener, dispatcher and adapters

/// Family of a chain, which fixes its payload layout and transaction format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Sui,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Evm => f.write_str("evm"),
            ChainFamily::Sui => f.write_str("sui"),
        }
    }
}

/// A guardian-attested cross-chain message as delivered to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedMessage {
    pub source_chain: u16,
    pub destination_chain: u16,
    pub sequence: u64,
    pub nonce: u32,
    pub emitter_address: [u8; 32],
    pub timestamp: u32,
    pub payload: Vec<u8>,
    pub source_tx_hash: String,
}

impl AttestedMessage {
    /// `chain/emitter/sequence`, the Wormhole message id.
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.source_chain,
            hex::encode(self.emitter_address),
            self.sequence
        )
    }
}

/// Relayer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub wormhole: WormholeConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub tokens: HashMap<String, TokenConfig>,
    pub processing: ProcessingConfig,
    pub monitoring: MonitoringConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WormholeConfig {
    pub api_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Where delivered sequences are saved across restarts.
    #[serde(default)]
    pub sequence_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u16,
    pub family: ChainFamily,
    pub rpc_url: String,
    /// Emitter whose messages are relayed from this chain.
    pub emitter: String,
    /// Destination entry point: contract address on EVM, package id on Sui.
    pub contract: String,
    #[serde(default)]
    pub starting_sequence: u64,
    /// Name of the chain this chain's messages are delivered to.
    pub relay_to: Option<String>,
    pub amount_width: AmountWidth,
    pub private_key: Secret,
    pub collateral_token: String,
    pub loan_token: String,
    pub confirmation_timeout_secs: u64,
    pub sui: Option<SuiObjects>,
}

/// Object ids the Sui lending module is called with.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiObjects {
    pub module: String,
    pub state: String,
    pub owner_cap: String,
    pub clock: String,
    pub gas_budget: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub token_type: u8,
    /// Native identifier keyed by chain name.
    pub addresses: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    pub max_concurrent_dispatches: usize,
    pub submission_timeout_secs: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub health_check_port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub path: String,
}

/// Signing key material. Never printed.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Metrics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayerMetrics {
    pub messages_received: u64,
    pub calls_submitted: u64,
    pub loans_recorded: u64,
    pub rejected_unknown_method: u64,
    pub rejected_malformed: u64,
    pub rejected_amount_overflow: u64,
    pub adapter_failures: u64,
    pub ledger_write_failures: u64,
    pub average_processing_time_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

/// API Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

pub fn hex_0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a `0x` hex string of up to 32 bytes, left-padding it to a word.
pub fn parse_bytes32(raw: &str) -> Result<[u8; 32], String> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|e| format!("invalid hex {}: {}", raw, e))?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(format!("expected 1 to 32 bytes, got {} in {}", bytes.len(), raw));
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id() {
        let msg = AttestedMessage {
            source_chain: 21,
            destination_chain: 6,
            sequence: 42,
            nonce: 0,
            emitter_address: [0xb8; 32],
            timestamp: 0,
            payload: vec![],
            source_tx_hash: "tx".to_string(),
        };
        assert_eq!(msg.id(), format!("21/{}/42", "b8".repeat(32)));
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("0xdeadbeef");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "0xdeadbeef");
        assert!(Secret::new("  ").is_empty());
    }

    #[test]
    fn test_parse_bytes32_left_pads() {
        let word = parse_bytes32("0xDdA5368dA176762d1964B868101e6592fba25b15").unwrap();
        assert!(word[..12].iter().all(|b| *b == 0));
        assert_eq!(word[12], 0xdd);

        assert_eq!(parse_bytes32("0x6").unwrap()[31], 6);
        assert!(parse_bytes32("0xzz").is_err());
        assert!(parse_bytes32(&format!("0x{}", "11".repeat(33))).is_err());
    }

    #[test]
    fn test_api_response() {
        let ok = ApiResponse::success(5u8);
        assert!(ok.success && ok.error.is_none());
        let err: ApiResponse<()> = ApiResponse::error("nope".to_string());
        assert!(!err.success && err.data.is_none());
    }
}
