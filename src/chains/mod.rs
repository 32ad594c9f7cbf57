pub mod evm;
pub mod sui;

use crate::codec::{AmountWidth, DestinationCall};
use crate::types::{ChainFamily, RelayError, RelayerConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A transaction accepted and confirmed by a destination chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub tx_id: String,
    /// Loan object created by a borrow, when the chain reports one.
    pub created_loan_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Gas estimation failed: {0}")]
    Estimation(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction {tx_id} rejected: {reason}")]
    Rejected { tx_id: String, reason: String },

    #[error("Timed out after {0}s waiting for confirmation")]
    Timeout(u64),

    #[error("Call not supported on this chain: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Rpc(err.to_string())
    }
}

/// Submits decoded calls to one destination chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> u16;
    fn family(&self) -> ChainFamily;
    fn amount_width(&self) -> AmountWidth;
    async fn submit(&self, call: &DestinationCall) -> Result<Submission, AdapterError>;
    async fn check_health(&self) -> bool;
}

/// Adapters keyed by Wormhole chain id.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<u16, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per configured chain.
    pub fn from_config(config: &RelayerConfig) -> Result<Self, RelayError> {
        let mut registry = Self::new();
        for (name, chain) in &config.chains {
            let adapter: Arc<dyn ChainAdapter> = match chain.family {
                ChainFamily::Evm => Arc::new(evm::EvmAdapter::new(chain)?),
                ChainFamily::Sui => Arc::new(sui::SuiAdapter::new(chain)?),
            };
            info!(
                chain = %name,
                chain_id = chain.chain_id,
                family = %chain.family,
                width = %chain.amount_width,
                "Registered chain adapter"
            );
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_id(), adapter);
    }

    pub fn get(&self, chain_id: u16) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&chain_id).cloned()
    }

    pub async fn check_health(&self) -> HashMap<u16, bool> {
        let mut health = HashMap::new();
        for (chain_id, adapter) in &self.adapters {
            health.insert(*chain_id, adapter.check_health().await);
        }
        health
    }
}
