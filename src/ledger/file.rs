use super::{same_loan_id, LedgerError, LoanRecord, OutcomeLedger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

/// On-disk document: the loan plus the key it is stored under.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    source_tx_hash: String,
    #[serde(flatten)]
    record: LoanRecord,
}

/// One JSON document per source transaction under a directory.
///
/// Writes go to a uniquely named temp file that is then renamed over the
/// document, so readers never observe a partial write.
pub struct FileLedger {
    base_path: PathBuf,
    write_seq: AtomicU64,
}

impl FileLedger {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_seq: AtomicU64::new(0),
        }
    }

    fn document_path(&self, key: &str) -> Result<PathBuf, LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::InvalidKey("empty key".to_string()));
        }
        let file_name: String = key
            .chars()
            .map(|c| if c == '/' { '_' } else { c })
            .collect();
        if !file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(LedgerError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", file_name)))
    }

    async fn read_document(path: &Path) -> Result<Option<Document>, LedgerError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl OutcomeLedger for FileLedger {
    async fn put(&self, source_tx_hash: &str, record: &LoanRecord) -> Result<(), LedgerError> {
        let path = self.document_path(source_tx_hash)?;
        fs::create_dir_all(&self.base_path).await?;

        let document = Document {
            source_tx_hash: source_tx_hash.to_string(),
            record: record.clone(),
        };
        let data = serde_json::to_vec_pretty(&document)?;

        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.tmp", seq));
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = source_tx_hash, path = %path.display(), "Loan document written");
        Ok(())
    }

    async fn get(&self, source_tx_hash: &str) -> Result<Option<LoanRecord>, LedgerError> {
        let path = self.document_path(source_tx_hash)?;
        Ok(Self::read_document(&path).await?.map(|doc| doc.record))
    }

    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Option<(String, LoanRecord)>, LedgerError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let document = match Self::read_document(&path).await {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable loan document: {}", e);
                    continue;
                }
            };
            let matches = document
                .record
                .loan_id
                .as_deref()
                .is_some_and(|id| same_loan_id(id, loan_id));
            if matches {
                return Ok(Some((document.source_tx_hash, document.record)));
            }
        }
        Ok(None)
    }
}
