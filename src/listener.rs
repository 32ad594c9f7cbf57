//! Inbound subscription to guardian-signed messages.
//!
//! Each configured chain with a `relay_to` target is watched: its emitter is
//! polled sequence by sequence, every signed VAA is parsed and checked against
//! the emitter filter, and the resulting [`AttestedMessage`] is handed to the
//! dispatcher over a bounded channel. The next sequence of every emitter is
//! saved after hand-off, so a restart resumes where the last run stopped.

use crate::types::{parse_bytes32, AttestedMessage, RelayError, RelayerConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::{sync::Arc, time::Duration};
use tokio::{fs, sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use wormhole_sdk::Vaa;

/// Upper bound on sequences fetched per emitter per tick.
const MAX_FETCH_PER_TICK: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected API response: {0}")]
    Api(String),

    #[error("Invalid VAA: {0}")]
    InvalidVaa(String),

    #[error("Sequence file error: {0}")]
    Sequences(String),
}

impl From<reqwest::Error> for ListenerError {
    fn from(err: reqwest::Error) -> Self {
        ListenerError::Network(err.to_string())
    }
}

/// Raw signed VAA plus the source transaction that emitted it, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedVaa {
    pub bytes: Vec<u8>,
    pub tx_hash: Option<String>,
}

/// Where signed VAAs come from.
#[async_trait]
pub trait VaaSource: Send + Sync {
    /// `Ok(None)` means the sequence has not been signed yet.
    async fn fetch(
        &self,
        chain_id: u16,
        emitter: &[u8; 32],
        sequence: u64,
    ) -> Result<Option<SignedVaa>, ListenerError>;
}

#[derive(Debug, Deserialize)]
struct VaaResponse {
    data: VaaData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaaData {
    vaa: String,
    #[serde(default)]
    tx_hash: Option<String>,
}

/// Wormholescan REST client.
pub struct WormholeScanClient {
    client: reqwest::Client,
    api_url: String,
}

impl WormholeScanClient {
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn vaa_url(&self, chain_id: u16, emitter: &[u8; 32], sequence: u64) -> String {
        format!(
            "{}/api/v1/vaas/{}/{}/{}",
            self.api_url,
            chain_id,
            hex::encode(emitter),
            sequence
        )
    }
}

#[async_trait]
impl VaaSource for WormholeScanClient {
    async fn fetch(
        &self,
        chain_id: u16,
        emitter: &[u8; 32],
        sequence: u64,
    ) -> Result<Option<SignedVaa>, ListenerError> {
        let url = self.vaa_url(chain_id, emitter, sequence);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ListenerError::Api(format!("{} returned {}", url, response.status())));
        }

        let body: VaaResponse = response.json().await?;
        let bytes = STANDARD
            .decode(body.data.vaa.as_bytes())
            .map_err(|e| ListenerError::Api(format!("VAA is not base64: {}", e)))?;

        Ok(Some(SignedVaa {
            bytes,
            tx_hash: body.data.tx_hash.filter(|hash| !hash.is_empty()),
        }))
    }
}

/// Body fields of a parsed VAA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVaa {
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub nonce: u32,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Parse a signed VAA. Signatures are not verified here; the destination
/// contracts verify them on submission.
pub fn parse_vaa(bytes: &[u8]) -> Result<ParsedVaa, ListenerError> {
    let vaa = serde_wormhole::from_slice::<Vaa<&serde_wormhole::RawMessage>>(bytes)
        .map_err(|e| ListenerError::InvalidVaa(e.to_string()))?;

    if vaa.version != 1 {
        return Err(ListenerError::InvalidVaa(format!("unsupported version {}", vaa.version)));
    }

    Ok(ParsedVaa {
        emitter_chain: u16::from(vaa.emitter_chain),
        emitter_address: vaa.emitter_address.0,
        sequence: vaa.sequence,
        nonce: vaa.nonce,
        timestamp: vaa.timestamp,
        payload: vaa.payload.to_vec(),
    })
}

/// Key of an emitter in the sequence file: `chain/emitter`.
fn emitter_key(chain_id: u16, emitter: &[u8; 32]) -> String {
    format!("{}/{}", chain_id, hex::encode(emitter))
}

/// Next unread sequence per emitter, kept in one JSON document.
pub struct SequenceStore {
    path: PathBuf,
}

impl SequenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing file means nothing was delivered yet.
    pub async fn load(&self) -> Result<BTreeMap<String, u64>, ListenerError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ListenerError::Sequences(format!("{} is not a sequence map: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ListenerError::Sequences(format!("read {}: {}", self.path.display(), e))),
        }
    }

    /// Replace the document through a temp file and rename.
    pub async fn save(&self, sequences: &BTreeMap<String, u64>) -> Result<(), ListenerError> {
        let io_err = |e: std::io::Error| ListenerError::Sequences(format!("write {}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let data = serde_json::to_vec_pretty(sequences)
            .map_err(|e| ListenerError::Sequences(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, data).await.map_err(io_err)?;
        fs::rename(&temp_path, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

/// One watched emitter and where its messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterWatch {
    pub chain_name: String,
    pub source_chain: u16,
    pub emitter: [u8; 32],
    pub destination_chain: u16,
    pub next_sequence: u64,
}

pub struct Listener {
    source: Arc<dyn VaaSource>,
    watches: Vec<EmitterWatch>,
    poll_interval: Duration,
    store: Option<SequenceStore>,
    /// Next sequence per emitter whose predecessors were all handed off.
    delivered: BTreeMap<String, u64>,
}

impl Listener {
    pub fn new(source: Arc<dyn VaaSource>, watches: Vec<EmitterWatch>, poll_interval: Duration) -> Self {
        let delivered = watches
            .iter()
            .map(|watch| (emitter_key(watch.source_chain, &watch.emitter), watch.next_sequence))
            .collect();

        Self {
            source,
            watches,
            poll_interval,
            store: None,
            delivered,
        }
    }

    /// Save delivered sequences to `store` as messages are handed off.
    pub fn with_sequence_store(mut self, store: SequenceStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Watch every chain that has a `relay_to` route. With a sequence file
    /// configured, each emitter resumes from the later of its saved sequence
    /// and `starting_sequence`.
    pub async fn from_config(config: &RelayerConfig, source: Arc<dyn VaaSource>) -> Result<Self, RelayError> {
        let store = config.wormhole.sequence_file.as_ref().map(SequenceStore::new);
        let saved = match &store {
            Some(store) => store
                .load()
                .await
                .map_err(|e| RelayError::ConfigError(e.to_string()))?,
            None => BTreeMap::new(),
        };

        let mut watches = Vec::new();

        for (name, chain) in &config.chains {
            let Some(target) = &chain.relay_to else {
                continue;
            };
            let destination = config.chains.get(target).ok_or_else(|| {
                RelayError::ConfigError(format!("Chain {} relays to unknown chain {}", name, target))
            })?;
            let emitter = parse_bytes32(&chain.emitter)
                .map_err(|e| RelayError::ConfigError(format!("Chain {} emitter: {}", name, e)))?;

            let resumed = saved.get(&emitter_key(chain.chain_id, &emitter)).copied();
            let next_sequence = resumed.map_or(chain.starting_sequence, |seq| seq.max(chain.starting_sequence));
            if let Some(seq) = resumed {
                info!(chain = %name, saved = seq, next_sequence, "Resuming emitter");
            }

            watches.push(EmitterWatch {
                chain_name: name.clone(),
                source_chain: chain.chain_id,
                emitter,
                destination_chain: destination.chain_id,
                next_sequence,
            });
        }

        watches.sort_by_key(|watch| watch.source_chain);
        let listener = Self::new(
            source,
            watches,
            Duration::from_millis(config.wormhole.poll_interval_ms),
        );
        Ok(match store {
            Some(store) => listener.with_sequence_store(store),
            None => listener,
        })
    }

    pub fn watches(&self) -> &[EmitterWatch] {
        &self.watches
    }

    /// Fetch every newly signed message across all watched emitters.
    pub async fn poll_once(&mut self) -> Vec<AttestedMessage> {
        let mut messages = Vec::new();

        for watch in &mut self.watches {
            for _ in 0..MAX_FETCH_PER_TICK {
                let sequence = watch.next_sequence;
                let signed = match self.source.fetch(watch.source_chain, &watch.emitter, sequence).await {
                    Ok(Some(signed)) => signed,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(chain = %watch.chain_name, sequence, "VAA fetch failed, retrying next tick: {}", e);
                        break;
                    }
                };
                watch.next_sequence += 1;

                match Self::to_message(watch, sequence, &signed) {
                    Ok(message) => {
                        debug!(message_id = %message.id(), source_tx = %message.source_tx_hash, "VAA received");
                        messages.push(message);
                    }
                    Err(e) => error!(chain = %watch.chain_name, sequence, "Skipping VAA: {}", e),
                }
            }
        }

        messages
    }

    fn to_message(watch: &EmitterWatch, sequence: u64, signed: &SignedVaa) -> Result<AttestedMessage, ListenerError> {
        let vaa = parse_vaa(&signed.bytes)?;

        if vaa.emitter_chain != watch.source_chain || vaa.emitter_address != watch.emitter {
            return Err(ListenerError::InvalidVaa(format!(
                "emitter {}/{} is not watched",
                vaa.emitter_chain,
                hex::encode(vaa.emitter_address)
            )));
        }
        if vaa.sequence != sequence {
            return Err(ListenerError::InvalidVaa(format!(
                "requested sequence {}, got {}",
                sequence, vaa.sequence
            )));
        }

        let mut message = AttestedMessage {
            source_chain: vaa.emitter_chain,
            destination_chain: watch.destination_chain,
            sequence: vaa.sequence,
            nonce: vaa.nonce,
            emitter_address: vaa.emitter_address,
            timestamp: vaa.timestamp,
            payload: vaa.payload,
            source_tx_hash: String::new(),
        };
        message.source_tx_hash = signed.tx_hash.clone().unwrap_or_else(|| message.id());
        Ok(message)
    }

    /// One poll, handing every new message to `sender`. Returns `false`
    /// once the receiving side is gone.
    pub async fn forward_once(&mut self, sender: &mpsc::Sender<AttestedMessage>) -> bool {
        for message in self.poll_once().await {
            let key = emitter_key(message.source_chain, &message.emitter_address);
            let next = message.sequence + 1;
            if sender.send(message).await.is_err() {
                return false;
            }
            self.delivered.insert(key, next);
            self.save_sequences().await;
        }

        // Sequences skipped as invalid are consumed too.
        let mut advanced = false;
        for watch in &self.watches {
            let key = emitter_key(watch.source_chain, &watch.emitter);
            if self.delivered.get(&key) != Some(&watch.next_sequence) {
                self.delivered.insert(key, watch.next_sequence);
                advanced = true;
            }
        }
        if advanced {
            self.save_sequences().await;
        }
        true
    }

    async fn save_sequences(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.delivered).await {
            error!("Failed to save delivered sequences: {}", e);
        }
    }

    /// Poll until the receiving side of `sender` is dropped.
    pub async fn run(mut self, sender: mpsc::Sender<AttestedMessage>) {
        info!(
            emitters = self.watches.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Listener started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !self.forward_once(&sender).await {
                info!("Dispatch channel closed, listener stopping");
                return;
            }
        }
    }
}
