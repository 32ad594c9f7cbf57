use super::{same_loan_id, LedgerError, LoanRecord, OutcomeLedger};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process ledger. Lost on restart.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<RwLock<HashMap<String, LoanRecord>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl OutcomeLedger for MemoryLedger {
    async fn put(&self, source_tx_hash: &str, record: &LoanRecord) -> Result<(), LedgerError> {
        self.records
            .write()
            .await
            .insert(source_tx_hash.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, source_tx_hash: &str) -> Result<Option<LoanRecord>, LedgerError> {
        Ok(self.records.read().await.get(source_tx_hash).cloned())
    }

    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Option<(String, LoanRecord)>, LedgerError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|(_, record)| {
                record
                    .loan_id
                    .as_deref()
                    .is_some_and(|id| same_loan_id(id, loan_id))
            })
            .map(|(key, record)| (key.clone(), record.clone())))
    }
}
