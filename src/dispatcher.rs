use crate::{
    chains::{AdapterError, AdapterRegistry, ChainAdapter, Submission},
    classifier::{classify, Classification},
    codec::{self, build_call, CallContext, CodecError, DecodedIntent, DestinationCall},
    ledger::{LoanRecord, LoanState, OutcomeLedger},
    tokens::{RouteTokens, TokenTable},
    types::{hex_0x, AttestedMessage, ChainFamily, ProcessingConfig, RelayError, RelayerConfig, RelayerMetrics},
};
use chrono::Utc;
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

const MAX_TRACKED_TIMES: usize = 1000;

/// Steps of the per-message state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    Classified,
    Decoded,
    Submitted,
    Recorded,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchStage::Received => "received",
            DispatchStage::Classified => "classified",
            DispatchStage::Decoded => "decoded",
            DispatchStage::Submitted => "submitted",
            DispatchStage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown method tag {tag}")]
    UnknownMethod { tag: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(CodecError),

    #[error("Amount overflow: {0}")]
    AmountOverflow(CodecError),

    #[error("Adapter failure: {0}")]
    AdapterFailure(String),
}

impl DispatchError {
    /// Dropped messages need no operator action; adapter failures do.
    pub fn is_drop(&self) -> bool {
        !matches!(self, DispatchError::AdapterFailure(_))
    }
}

impl From<CodecError> for DispatchError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::AmountOverflow { .. } => DispatchError::AmountOverflow(err),
            other => DispatchError::MalformedPayload(other),
        }
    }
}

impl From<AdapterError> for DispatchError {
    fn from(err: AdapterError) -> Self {
        DispatchError::AdapterFailure(err.to_string())
    }
}

/// Terminal state of one message.
#[derive(Debug)]
pub enum DispatchOutcome {
    Recorded {
        tx_id: String,
        ledger_written: bool,
    },
    Rejected {
        /// Step at which the message was rejected.
        stage: DispatchStage,
        reason: DispatchError,
    },
}

impl DispatchOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, DispatchOutcome::Recorded { .. })
    }
}

/// How calls are issued on one chain.
#[derive(Debug, Clone)]
pub struct ChainRoute {
    pub family: ChainFamily,
    pub tokens: RouteTokens,
    pub collateral: String,
    pub principal: String,
}

impl ChainRoute {
    /// One route per configured chain, keyed by chain id.
    pub fn from_config(config: &RelayerConfig) -> Result<HashMap<u16, ChainRoute>, RelayError> {
        let table = TokenTable::from_config(&config.tokens, &config.chains)?;
        let mut routes = HashMap::new();
        for chain in config.chains.values() {
            let tokens = table.route_tokens(chain.chain_id, &chain.collateral_token, &chain.loan_token)?;
            routes.insert(
                chain.chain_id,
                ChainRoute {
                    family: chain.family,
                    tokens,
                    collateral: chain.collateral_token.to_ascii_uppercase(),
                    principal: chain.loan_token.to_ascii_uppercase(),
                },
            );
        }
        Ok(routes)
    }
}

type StageResult<T> = Result<T, (DispatchStage, DispatchError)>;

/// Routes attested messages through classify, decode, submit and record.
///
/// Each (emitter, sequence) must be delivered at most once: nothing here
/// deduplicates, and replay protection belongs to the destination contracts.
pub struct Dispatcher {
    registry: AdapterRegistry,
    ledger: Arc<dyn OutcomeLedger>,
    routes: HashMap<u16, ChainRoute>,
    submission_timeout: Duration,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    metrics: Arc<RwLock<RelayerMetrics>>,
    processing_times: Arc<RwLock<Vec<Duration>>>,
    start_time: Instant,
}

impl Dispatcher {
    pub fn new(
        registry: AdapterRegistry,
        ledger: Arc<dyn OutcomeLedger>,
        routes: HashMap<u16, ChainRoute>,
        processing: &ProcessingConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            routes,
            submission_timeout: Duration::from_secs(processing.submission_timeout_secs),
            max_concurrent: processing.max_concurrent_dispatches,
            semaphore: Arc::new(Semaphore::new(processing.max_concurrent_dispatches)),
            metrics: Arc::new(RwLock::new(RelayerMetrics::default())),
            processing_times: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
        }
    }

    pub fn from_config(
        config: &RelayerConfig,
        registry: AdapterRegistry,
        ledger: Arc<dyn OutcomeLedger>,
    ) -> Result<Self, RelayError> {
        let routes = ChainRoute::from_config(config)?;
        Ok(Self::new(registry, ledger, routes, &config.processing))
    }

    /// Consume the inbound channel until it closes, then wait for in-flight
    /// dispatches. Messages run concurrently up to the configured bound.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<AttestedMessage>) {
        info!(max_concurrent = self.max_concurrent, "Dispatch loop started");

        while let Some(message) = receiver.recv().await {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Dispatch semaphore closed: {}", e);
                    break;
                }
            };

            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                dispatcher.dispatch(&message).await;
                drop(permit);
            });
        }

        let _ = self.semaphore.acquire_many(self.max_concurrent as u32).await;
        info!("Dispatch loop stopped");
    }

    /// Run one message to a terminal outcome. Never panics on bad input.
    pub async fn dispatch(&self, message: &AttestedMessage) -> DispatchOutcome {
        let started = Instant::now();
        let message_id = message.id();
        self.metrics.write().await.messages_received += 1;

        debug!(
            message_id = %message_id,
            source_tx = %message.source_tx_hash,
            destination = message.destination_chain,
            payload_len = message.payload.len(),
            "Message received"
        );

        let outcome = match self.process(message).await {
            Ok((tx_id, ledger_written)) => DispatchOutcome::Recorded { tx_id, ledger_written },
            Err((stage, reason)) => DispatchOutcome::Rejected { stage, reason },
        };

        self.record_processing_time(started.elapsed()).await;
        self.update_metrics_for_outcome(&outcome).await;

        match &outcome {
            DispatchOutcome::Recorded { tx_id, ledger_written } => info!(
                message_id = %message_id,
                tx_id = %tx_id,
                ledger_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Message relayed"
            ),
            DispatchOutcome::Rejected { stage, reason } if reason.is_drop() => warn!(
                message_id = %message_id,
                %stage,
                "Message dropped: {}", reason
            ),
            DispatchOutcome::Rejected { stage, reason } => error!(
                message_id = %message_id,
                %stage,
                "Message failed: {}", reason
            ),
        }

        outcome
    }

    async fn process(&self, message: &AttestedMessage) -> StageResult<(String, bool)> {
        let method = match classify(&message.payload) {
            Classification::Known(method) => method,
            Classification::Unknown => {
                let tag_len = message.payload.len().min(32);
                return Err((
                    DispatchStage::Classified,
                    DispatchError::UnknownMethod {
                        tag: hex_0x(&message.payload[..tag_len]),
                    },
                ));
            }
        };

        let source = self.routes.get(&message.source_chain).ok_or_else(|| {
            (
                DispatchStage::Decoded,
                DispatchError::AdapterFailure(format!("source chain {} is not routed", message.source_chain)),
            )
        })?;

        let intent = codec::decode(source.family, method, &message.payload).map_err(|e| {
            warn!(
                message_id = %message.id(),
                %method,
                raw = %hex::encode(&message.payload),
                "Undecodable payload"
            );
            (DispatchStage::Decoded, DispatchError::from(e))
        })?;

        let (destination, adapter) = self.destination(message.destination_chain)?;

        let ctx = CallContext {
            nonce: message.nonce,
            from_chain: message.source_chain,
            tokens: destination.tokens.clone(),
            width: adapter.amount_width(),
        };
        let call = build_call(&intent, &ctx).map_err(|e| (DispatchStage::Decoded, DispatchError::from(e)))?;

        let submission = self.submit(message, adapter.as_ref(), &call).await?;

        let ledger_written = self.record(message, &intent, &call, destination, &submission).await;
        Ok((submission.tx_id, ledger_written))
    }

    fn destination(
        &self,
        chain_id: u16,
    ) -> StageResult<(&ChainRoute, Arc<dyn ChainAdapter>)> {
        let unrouted = |what: &str| {
            (
                DispatchStage::Decoded,
                DispatchError::AdapterFailure(format!("no {} for destination chain {}", what, chain_id)),
            )
        };
        let route = self.routes.get(&chain_id).ok_or_else(|| unrouted("route"))?;
        let adapter = self.registry.get(chain_id).ok_or_else(|| unrouted("adapter"))?;
        if adapter.family() != route.family {
            return Err((
                DispatchStage::Decoded,
                DispatchError::AdapterFailure(format!(
                    "adapter for chain {} submits {} calls, route expects {}",
                    chain_id,
                    adapter.family(),
                    route.family
                )),
            ));
        }
        Ok((route, adapter))
    }

    async fn submit(
        &self,
        message: &AttestedMessage,
        adapter: &dyn ChainAdapter,
        call: &DestinationCall,
    ) -> StageResult<Submission> {
        let result = match tokio::time::timeout(self.submission_timeout, adapter.submit(call)).await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(_) => Err(DispatchError::AdapterFailure(format!(
                "submission timed out after {}s",
                self.submission_timeout.as_secs()
            ))),
        };

        result.map_err(|e| {
            // Logged in full so an operator can replay the call by hand.
            error!(
                message_id = %message.id(),
                source_tx = %message.source_tx_hash,
                destination = message.destination_chain,
                call = %call.to_replay_json(),
                "Destination submission failed: {}", e
            );
            (DispatchStage::Submitted, e)
        })
    }

    /// Best-effort bookkeeping. Returns whether the ledger was written.
    async fn record(
        &self,
        message: &AttestedMessage,
        intent: &DecodedIntent,
        call: &DestinationCall,
        destination: &ChainRoute,
        submission: &Submission,
    ) -> bool {
        let result = match (intent, call) {
            (DecodedIntent::Borrow(borrow), DestinationCall::Borrow(borrow_call)) => {
                let record = LoanRecord {
                    loan_id: Some(
                        submission
                            .created_loan_id
                            .clone()
                            .unwrap_or_else(|| hex_0x(&borrow.loan_id)),
                    ),
                    amount_in: None,
                    amount_out: Some(borrow_call.value.to_string()),
                    token_type: destination.tokens.token_type,
                    from_chain_id: message.source_chain,
                    to_chain_id: message.destination_chain,
                    collateral: destination.collateral.clone(),
                    principal: destination.principal.clone(),
                    interchange: true,
                    interest_rate: None,
                    start_secs: Some(u64::from(message.timestamp)),
                    sender: Some(hex_0x(&borrow.sender)),
                    from_hash: Some(message.source_tx_hash.clone()),
                    to_hash: Some(submission.tx_id.clone()),
                    settle_hash: None,
                    state: LoanState::Active,
                };
                self.ledger
                    .put(&message.source_tx_hash, &record)
                    .await
                    .map(|_| true)
            }
            (DecodedIntent::Repay(repay), _) => {
                let loan_id = hex_0x(&repay.loan_id);
                match self.ledger.find_by_loan_id(&loan_id).await {
                    Ok(Some((key, mut record))) => {
                        record.state = LoanState::Settled;
                        record.settle_hash = Some(submission.tx_id.clone());
                        self.ledger.put(&key, &record).await.map(|_| true)
                    }
                    Ok(None) => {
                        warn!(loan_id = %loan_id, "Repaid loan has no ledger entry");
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Ok(false),
        };

        match result {
            Ok(written) => written,
            Err(e) => {
                self.metrics.write().await.ledger_write_failures += 1;
                error!(
                    message_id = %message.id(),
                    source_tx = %message.source_tx_hash,
                    tx_id = %submission.tx_id,
                    "LedgerWriteFailure: {}", e
                );
                false
            }
        }
    }

    async fn record_processing_time(&self, elapsed: Duration) {
        let mut times = self.processing_times.write().await;
        times.push(elapsed);
        if times.len() > MAX_TRACKED_TIMES {
            times.remove(0);
        }
    }

    async fn update_metrics_for_outcome(&self, outcome: &DispatchOutcome) {
        let mut metrics = self.metrics.write().await;
        match outcome {
            DispatchOutcome::Recorded { ledger_written, .. } => {
                metrics.calls_submitted += 1;
                if *ledger_written {
                    metrics.loans_recorded += 1;
                }
                metrics.last_processed_at = Some(Utc::now());
            }
            DispatchOutcome::Rejected { reason, .. } => match reason {
                DispatchError::UnknownMethod { .. } => metrics.rejected_unknown_method += 1,
                DispatchError::MalformedPayload(_) => metrics.rejected_malformed += 1,
                DispatchError::AmountOverflow(_) => metrics.rejected_amount_overflow += 1,
                DispatchError::AdapterFailure(_) => metrics.adapter_failures += 1,
            },
        }
    }

    /// Get current metrics
    pub async fn get_metrics(&self) -> RelayerMetrics {
        let average = {
            let times = self.processing_times.read().await;
            if times.is_empty() {
                0.0
            } else {
                let total: Duration = times.iter().sum();
                total.as_millis() as f64 / times.len() as f64
            }
        };

        let mut metrics = self.metrics.read().await.clone();
        metrics.average_processing_time_ms = average;
        metrics.uptime_seconds = self.start_time.elapsed().as_secs();
        metrics
    }

    pub async fn check_health(&self) -> HashMap<u16, bool> {
        self.registry.check_health().await
    }

    pub fn ledger(&self) -> Arc<dyn OutcomeLedger> {
        Arc::clone(&self.ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AmountWidth, BorrowIntent, RepayIntent};
    use crate::config::test_support::sample_config;
    use crate::ledger::MemoryLedger;
    use alloy_primitives::U256;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingAdapter {
        chain_id: u16,
        width: AmountWidth,
        fail: bool,
        calls: Mutex<Vec<DestinationCall>>,
    }

    impl RecordingAdapter {
        fn new(chain_id: u16, width: AmountWidth) -> Self {
            Self {
                chain_id,
                width,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChainAdapter for RecordingAdapter {
        fn chain_id(&self) -> u16 {
            self.chain_id
        }

        fn family(&self) -> ChainFamily {
            ChainFamily::Evm
        }

        fn amount_width(&self) -> AmountWidth {
            self.width
        }

        async fn submit(&self, call: &DestinationCall) -> Result<Submission, AdapterError> {
            self.calls.lock().unwrap().push(call.clone());
            if self.fail {
                return Err(AdapterError::Rpc("connection refused".to_string()));
            }
            Ok(Submission {
                tx_id: format!("0xdest{}", call.nonce()),
                created_loan_id: None,
            })
        }

        async fn check_health(&self) -> bool {
            true
        }
    }

    fn dispatcher_with(adapter: Arc<RecordingAdapter>) -> (Dispatcher, MemoryLedger) {
        let config = sample_config();
        let mut registry = AdapterRegistry::new();
        registry.register(adapter);
        let ledger = MemoryLedger::new();
        let dispatcher = Dispatcher::from_config(&config, registry, Arc::new(ledger.clone())).unwrap();
        (dispatcher, ledger)
    }

    fn sui_message(payload: Vec<u8>, sequence: u64) -> AttestedMessage {
        AttestedMessage {
            source_chain: 21,
            destination_chain: 6,
            sequence,
            nonce: sequence as u32,
            emitter_address: [0xb8; 32],
            timestamp: 1_700_000_000,
            payload,
            source_tx_hash: format!("0xsource{}", sequence),
        }
    }

    fn borrow_payload(amount: u64) -> Vec<u8> {
        codec::encode(
            ChainFamily::Sui,
            &DecodedIntent::Borrow(BorrowIntent {
                loan_id: [0x01; 32],
                sender: [0x02; 32],
                receiver: [0xaa; 32],
                to_chain: 6,
                from_contract: [0x03; 32],
                to_contract: [0x04; 32],
                amount: U256::from(amount),
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_borrow_is_submitted_and_recorded() {
        let adapter = Arc::new(RecordingAdapter::new(6, AmountWidth::U256));
        let (dispatcher, ledger) = dispatcher_with(Arc::clone(&adapter));

        let outcome = dispatcher.dispatch(&sui_message(borrow_payload(1_000_000), 1)).await;
        assert!(outcome.is_recorded());

        let calls = adapter.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            DestinationCall::Borrow(call) => {
                assert_eq!(call.loan_id, [0x01; 32]);
                assert_eq!(call.receiver, [0xaa; 32]);
                assert_eq!(call.from_chain, 21);
                assert_eq!(call.value.value(), U256::from(1_000_000u64));
            }
            other => panic!("unexpected call {:?}", other),
        }

        let record = ledger.get("0xsource1").await.unwrap().unwrap();
        assert_eq!(record.state, LoanState::Active);
        assert_eq!(record.loan_id, Some(hex_0x(&[0x01; 32])));
        assert_eq!(record.to_hash.as_deref(), Some("0xdest1"));
        assert_eq!(record.principal, "USDT");

        let metrics = dispatcher.get_metrics().await;
        assert_eq!(metrics.messages_received, 1);
        assert_eq!(metrics.calls_submitted, 1);
        assert_eq!(metrics.loans_recorded, 1);
    }

    #[tokio::test]
    async fn test_repay_settles_existing_loan() {
        let adapter = Arc::new(RecordingAdapter::new(6, AmountWidth::U256));
        let (dispatcher, ledger) = dispatcher_with(Arc::clone(&adapter));
        dispatcher.dispatch(&sui_message(borrow_payload(5), 1)).await;

        let repay = codec::encode(
            ChainFamily::Sui,
            &DecodedIntent::Repay(RepayIntent {
                loan_id: [0x01; 32],
                from_chain: 21,
                from_contract: [0x03; 32],
                to_contract: [0x04; 32],
            }),
        )
        .unwrap();
        let outcome = dispatcher.dispatch(&sui_message(repay, 2)).await;
        assert!(matches!(outcome, DispatchOutcome::Recorded { ledger_written: true, .. }));

        let record = ledger.get("0xsource1").await.unwrap().unwrap();
        assert_eq!(record.state, LoanState::Settled);
        assert_eq!(record.settle_hash.as_deref(), Some("0xdest2"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_dropped() {
        let adapter = Arc::new(RecordingAdapter::new(6, AmountWidth::U256));
        let (dispatcher, _ledger) = dispatcher_with(Arc::clone(&adapter));

        let outcome = dispatcher.dispatch(&sui_message(b"ON_DEFAULT_METHOD".to_vec(), 1)).await;
        match outcome {
            DispatchOutcome::Rejected { stage, reason } => {
                assert_eq!(stage, DispatchStage::Classified);
                assert!(matches!(reason, DispatchError::UnknownMethod { .. }));
                assert!(reason.is_drop());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(adapter.calls.lock().unwrap().is_empty());
        assert_eq!(dispatcher.get_metrics().await.rejected_unknown_method, 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_is_not_a_drop() {
        let adapter = Arc::new(RecordingAdapter {
            fail: true,
            ..RecordingAdapter::new(6, AmountWidth::U256)
        });
        let (dispatcher, ledger) = dispatcher_with(Arc::clone(&adapter));

        let outcome = dispatcher.dispatch(&sui_message(borrow_payload(7), 1)).await;
        match outcome {
            DispatchOutcome::Rejected { stage, reason } => {
                assert_eq!(stage, DispatchStage::Submitted);
                assert!(matches!(reason, DispatchError::AdapterFailure(_)));
                assert!(!reason.is_drop());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(adapter.calls.lock().unwrap().len(), 1);
        assert!(ledger.is_empty().await);
        assert_eq!(dispatcher.get_metrics().await.adapter_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_adapter_is_rejected() {
        let adapter = Arc::new(RecordingAdapter::new(6, AmountWidth::U256));
        let (dispatcher, _ledger) = dispatcher_with(adapter);

        let mut message = sui_message(borrow_payload(1), 1);
        message.destination_chain = 21;
        let outcome = dispatcher.dispatch(&message).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected {
                stage: DispatchStage::Decoded,
                reason: DispatchError::AdapterFailure(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_adapter_of_another_family_is_rejected() {
        // Chain 21 routes Sui calls; this adapter submits EVM calls.
        let adapter = Arc::new(RecordingAdapter::new(21, AmountWidth::U64));
        let (dispatcher, _ledger) = dispatcher_with(Arc::clone(&adapter));

        let mut message = sui_message(borrow_payload(1), 1);
        message.destination_chain = 21;
        match dispatcher.dispatch(&message).await {
            DispatchOutcome::Rejected { stage, reason } => {
                assert_eq!(stage, DispatchStage::Decoded);
                assert!(reason.to_string().contains("route expects sui"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(adapter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_processes_until_channel_closes() {
        let adapter = Arc::new(RecordingAdapter::new(6, AmountWidth::U256));
        let (dispatcher, _ledger) = dispatcher_with(Arc::clone(&adapter));
        let dispatcher = Arc::new(dispatcher);

        let (sender, receiver) = mpsc::channel(8);
        sender.send(sui_message(vec![0u8; 10], 1)).await.unwrap();
        for sequence in 2..=4 {
            sender.send(sui_message(borrow_payload(sequence), sequence)).await.unwrap();
        }
        drop(sender);

        Arc::clone(&dispatcher).run(receiver).await;

        assert_eq!(adapter.calls.lock().unwrap().len(), 3);
        let metrics = dispatcher.get_metrics().await;
        assert_eq!(metrics.messages_received, 4);
        assert_eq!(metrics.calls_submitted, 3);
    }
}
