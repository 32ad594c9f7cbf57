use super::{AdapterError, ChainAdapter, Submission};
use crate::codec::{AmountWidth, DestinationCall};
use crate::types::{hex_0x, ChainConfig, ChainFamily, RelayError, SuiObjects};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use blake2::{digest::consts::U32, Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type Blake2b256 = Blake2b<U32>;

/// Intent prefix of a transaction-data signature (scope, version, app id).
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];
const ED25519_FLAG: u8 = 0x00;

/// A Move entry-function call on the Orbital package.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCall {
    pub function: &'static str,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Value>,
}

/// Map a destination call to its Orbital entry function and JSON arguments.
pub fn move_call(call: &DestinationCall, objects: &SuiObjects) -> MoveCall {
    match call {
        DestinationCall::Borrow(borrow) => MoveCall {
            function: "receive_on_borrow",
            type_arguments: vec![borrow.token_out.to_string()],
            arguments: vec![
                json!(objects.owner_cap),
                json!(objects.state),
                json!(borrow.nonce),
                json!(borrow.loan_id.to_vec()),
                json!(borrow.from_chain),
                json!(hex_0x(&borrow.receiver)),
                json!(borrow.value.to_string()),
                json!(objects.clock),
            ],
        },
        DestinationCall::Repay(repay) => MoveCall {
            function: "receive_on_repay",
            type_arguments: vec![repay.token_in.to_string()],
            arguments: vec![
                json!(objects.owner_cap),
                json!(objects.state),
                json!(repay.nonce),
                json!(hex_0x(&repay.loan_id)),
            ],
        },
        DestinationCall::Amplify(amplify) => {
            let mut receiver = [0u8; 32];
            receiver[12..].copy_from_slice(&amplify.receiver);
            MoveCall {
                function: "receive_on_amplify",
                type_arguments: vec![],
                arguments: vec![
                    json!(objects.owner_cap),
                    json!(objects.state),
                    json!(amplify.nonce),
                    json!(hex_0x(&receiver)),
                    json!(amplify.status),
                ],
            }
        }
    }
}

/// Parse an Ed25519 secret as 0x-hex (32 bytes) or base64 (32 bytes, or 33
/// with the scheme flag in front).
pub fn parse_signing_key(raw: &str) -> Result<SigningKey, String> {
    let raw = raw.trim();
    let bytes = match raw.strip_prefix("0x") {
        Some(digits) => hex::decode(digits).map_err(|_| "key is not valid hex".to_string())?,
        None => BASE64
            .decode(raw)
            .map_err(|_| "key is neither 0x-hex nor base64".to_string())?,
    };

    let secret: [u8; 32] = match bytes.as_slice() {
        [ED25519_FLAG, rest @ ..] if rest.len() == 32 => rest.try_into().map_err(|_| "bad key length")?,
        bytes if bytes.len() == 32 => bytes.try_into().map_err(|_| "bad key length")?,
        other => return Err(format!("expected a 32-byte Ed25519 key, got {} bytes", other.len())),
    };
    Ok(SigningKey::from_bytes(&secret))
}

/// Sui address of an Ed25519 key: Blake2b-256(flag || public key).
pub fn sui_address(key: &SigningKey) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update([ED25519_FLAG]);
    hasher.update(key.verifying_key().as_bytes());
    hex_0x(&hasher.finalize())
}

/// Serialized signature over transaction bytes: flag || signature || public key, base64.
pub fn sign_transaction(key: &SigningKey, tx_bytes: &[u8]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    let digest = hasher.finalize();

    let signature = key.sign(&digest);
    let mut serialized = Vec::with_capacity(1 + 64 + 32);
    serialized.push(ED25519_FLAG);
    serialized.extend_from_slice(&signature.to_bytes());
    serialized.extend_from_slice(key.verifying_key().as_bytes());
    BASE64.encode(serialized)
}

/// First object created with shared ownership, which is how the lending
/// module publishes a new loan.
pub fn created_shared_object(effects: &Value) -> Option<String> {
    effects["created"]
        .as_array()?
        .iter()
        .find(|created| created["owner"].get("Shared").is_some())
        .and_then(|created| created["reference"]["objectId"].as_str())
        .map(str::to_string)
}

/// Sui chain implementation
///
/// The node selects the gas coin from the sender's owned coins, so two
/// transactions built at once can claim the same coin. Submissions hold
/// `submit_lock` from build to execution.
pub struct SuiAdapter {
    chain_id: u16,
    width: AmountWidth,
    rpc_url: String,
    package: String,
    objects: SuiObjects,
    signing_key: SigningKey,
    sender: String,
    client: reqwest::Client,
    confirmation_timeout: Duration,
    submit_lock: Mutex<()>,
}

impl SuiAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, RelayError> {
        let objects = config.sui.clone().ok_or_else(|| {
            RelayError::ConfigError(format!("Sui chain {} has no object ids configured", config.chain_id))
        })?;

        let signing_key = parse_signing_key(config.private_key.expose())
            .map_err(|e| RelayError::ConfigError(format!("Invalid Sui private key: {}", e)))?;
        let sender = sui_address(&signing_key);

        let confirmation_timeout = Duration::from_secs(config.confirmation_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(confirmation_timeout)
            .build()
            .map_err(|e| RelayError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        info!(chain_id = config.chain_id, %sender, package = %config.contract, "Sui adapter ready");

        Ok(Self {
            chain_id: config.chain_id,
            width: config.amount_width,
            rpc_url: config.rpc_url.clone(),
            package: config.contract.clone(),
            objects,
            signing_key,
            sender,
            client,
            confirmation_timeout,
            submit_lock: Mutex::new(()),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(self.confirmation_timeout.as_secs())
                } else {
                    AdapterError::Rpc(format!("{} request failed: {}", method, e))
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await?;

        if let Some(err) = body.get("error") {
            return Err(AdapterError::Rpc(format!(
                "{} returned error: {}",
                method,
                err["message"].as_str().unwrap_or("unknown error")
            )));
        }

        if !status.is_success() {
            return Err(AdapterError::Rpc(format!("{} returned HTTP {}", method, status)));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| AdapterError::Rpc(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl ChainAdapter for SuiAdapter {
    fn chain_id(&self) -> u16 {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Sui
    }

    fn amount_width(&self) -> AmountWidth {
        self.width
    }

    async fn submit(&self, call: &DestinationCall) -> Result<Submission, AdapterError> {
        let _gas = self.submit_lock.lock().await;
        let move_call = move_call(call, &self.objects);
        debug!(
            chain_id = self.chain_id,
            function = move_call.function,
            nonce = call.nonce(),
            "Building Sui transaction"
        );

        let built = self
            .rpc(
                "unsafe_moveCall",
                json!([
                    self.sender,
                    self.package,
                    self.objects.module,
                    move_call.function,
                    move_call.type_arguments,
                    move_call.arguments,
                    Value::Null,
                    self.objects.gas_budget.to_string(),
                ]),
            )
            .await?;

        let tx_bytes_b64 = built["txBytes"]
            .as_str()
            .ok_or_else(|| AdapterError::Rpc("unsafe_moveCall returned no txBytes".to_string()))?;
        let tx_bytes = BASE64
            .decode(tx_bytes_b64)
            .map_err(|e| AdapterError::Signing(format!("txBytes is not base64: {}", e)))?;
        let signature = sign_transaction(&self.signing_key, &tx_bytes);

        let executed = self
            .rpc(
                "sui_executeTransactionBlock",
                json!([
                    tx_bytes_b64,
                    [signature],
                    { "showEffects": true },
                    "WaitForLocalExecution",
                ]),
            )
            .await?;

        let tx_id = executed["digest"]
            .as_str()
            .filter(|digest| !digest.is_empty())
            .ok_or_else(|| AdapterError::Rpc("sui_executeTransactionBlock returned no digest".to_string()))?
            .to_string();
        let effects = &executed["effects"];
        let status = effects["status"]["status"].as_str().unwrap_or("unknown");

        if status != "success" {
            let reason = effects["status"]["error"]
                .as_str()
                .unwrap_or(status)
                .to_string();
            error!(chain_id = self.chain_id, tx_digest = %tx_id, %reason, "Sui transaction failed");
            return Err(AdapterError::Rejected { tx_id, reason });
        }

        let created_loan_id = match call {
            DestinationCall::Borrow(_) => {
                let created = created_shared_object(effects);
                if created.is_none() {
                    warn!(tx_digest = %tx_id, "Borrow created no shared loan object");
                }
                created
            }
            _ => None,
        };

        info!(chain_id = self.chain_id, tx_digest = %tx_id, "Sui transaction executed");

        Ok(Submission {
            tx_id,
            created_loan_id,
        })
    }

    async fn check_health(&self) -> bool {
        match self.rpc("sui_getLatestCheckpointSequenceNumber", json!([])).await {
            Ok(checkpoint) => {
                debug!(chain_id = self.chain_id, %checkpoint, "Sui health check passed");
                true
            }
            Err(e) => {
                error!(chain_id = self.chain_id, "Sui health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MethodId;
    use crate::codec::{BorrowCall, RepayCall};
    use crate::config::test_support::{sample_config, SUI_TEST_KEY};
    use crate::tokens::TokenRef;
    use alloy_primitives::U256;
    use axum::{extract::State, routing::post, Json, Router};
    use ed25519_dalek::{Signature, Verifier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn objects() -> SuiObjects {
        sample_config().chains["sui"].sui.clone().unwrap()
    }

    #[test]
    fn test_borrow_move_call_arguments() {
        let call = DestinationCall::Borrow(BorrowCall {
            nonce: 4,
            method: MethodId::OnBorrow,
            loan_id: [0x01; 32],
            receiver: [0xaa; 32],
            from_chain: 6,
            from_contract: [0x03; 32],
            token_in: TokenRef::Move("0xf3c0::btc::BTC".to_string()),
            token_out: TokenRef::Move("0xf3c0::usdt::USDT".to_string()),
            token_type: 1,
            value: AmountWidth::U64.narrow(U256::from(1_000_000u64)).unwrap(),
        });

        let mc = move_call(&call, &objects());
        assert_eq!(mc.function, "receive_on_borrow");
        assert_eq!(mc.type_arguments, vec!["0xf3c0::usdt::USDT".to_string()]);
        assert_eq!(mc.arguments.len(), 8);
        assert_eq!(mc.arguments[2], json!(4));
        assert_eq!(mc.arguments[3].as_array().unwrap().len(), 32);
        assert_eq!(mc.arguments[4], json!(6));
        assert_eq!(mc.arguments[5], json!(format!("0x{}", "aa".repeat(32))));
        assert_eq!(mc.arguments[6], json!("1000000"));
        assert_eq!(mc.arguments[7], json!("0x6"));
    }

    #[test]
    fn test_repay_move_call_has_no_amount() {
        let call = DestinationCall::Repay(RepayCall {
            nonce: 2,
            method: MethodId::OnRepay,
            loan_id: [0x07; 32],
            token_in: TokenRef::Move("0xf3c0::btc::BTC".to_string()),
        });
        let mc = move_call(&call, &objects());
        assert_eq!(mc.function, "receive_on_repay");
        assert_eq!(mc.type_arguments, vec!["0xf3c0::btc::BTC".to_string()]);
        assert_eq!(
            mc.arguments,
            vec![
                json!(objects().owner_cap),
                json!(objects().state),
                json!(2),
                json!(format!("0x{}", "07".repeat(32))),
            ]
        );
    }

    #[test]
    fn test_signature_layout_and_verification() {
        let key = parse_signing_key(SUI_TEST_KEY).unwrap();
        let tx_bytes = b"transaction-data";
        let serialized = BASE64.decode(sign_transaction(&key, tx_bytes)).unwrap();

        assert_eq!(serialized.len(), 97);
        assert_eq!(serialized[0], ED25519_FLAG);
        assert_eq!(&serialized[65..], key.verifying_key().as_bytes());

        let mut hasher = Blake2b256::new();
        hasher.update(TRANSACTION_INTENT);
        hasher.update(tx_bytes);
        let digest = hasher.finalize();
        let signature = Signature::from_slice(&serialized[1..65]).unwrap();
        assert!(key.verifying_key().verify(&digest, &signature).is_ok());
    }

    #[test]
    fn test_key_formats() {
        let hex_key = parse_signing_key(SUI_TEST_KEY).unwrap();
        let secret = hex::decode(&SUI_TEST_KEY[2..]).unwrap();

        let plain = BASE64.encode(&secret);
        assert_eq!(parse_signing_key(&plain).unwrap().to_bytes(), hex_key.to_bytes());

        let mut flagged = vec![ED25519_FLAG];
        flagged.extend_from_slice(&secret);
        assert_eq!(
            parse_signing_key(&BASE64.encode(flagged)).unwrap().to_bytes(),
            hex_key.to_bytes()
        );

        assert!(parse_signing_key("0x1234").is_err());
        assert!(parse_signing_key("not a key").is_err());
        assert_eq!(sui_address(&hex_key).len(), 66);
    }

    #[test]
    fn test_created_shared_object() {
        let effects = json!({
            "status": { "status": "success" },
            "created": [
                {
                    "owner": { "AddressOwner": "0x1" },
                    "reference": { "objectId": "0xowned" }
                },
                {
                    "owner": { "Shared": { "initial_shared_version": 5 } },
                    "reference": { "objectId": "0xloan" }
                }
            ]
        });
        assert_eq!(created_shared_object(&effects), Some("0xloan".to_string()));
        assert_eq!(created_shared_object(&json!({ "created": [] })), None);
        assert_eq!(created_shared_object(&json!({})), None);
    }

    #[test]
    fn test_adapter_construction() {
        let config = sample_config();
        let adapter = SuiAdapter::new(&config.chains["sui"]).unwrap();
        assert_eq!(adapter.chain_id(), 21);
        assert_eq!(adapter.amount_width(), AmountWidth::U64);
        assert_eq!(adapter.sender, sui_address(&parse_signing_key(SUI_TEST_KEY).unwrap()));
    }

    /// JSON-RPC stand-in for a fullnode. Counts transactions between build
    /// and execution.
    #[derive(Default)]
    struct StubNode {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        omit_digest: bool,
    }

    async fn stub_rpc(State(node): State<Arc<StubNode>>, Json(request): Json<Value>) -> Json<Value> {
        let result = match request["method"].as_str() {
            Some("unsafe_moveCall") => {
                let now = node.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                node.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                json!({ "txBytes": BASE64.encode(b"tx-data") })
            }
            Some("sui_executeTransactionBlock") => {
                node.in_flight.fetch_sub(1, Ordering::SeqCst);
                let mut executed = json!({ "effects": { "status": { "status": "success" } } });
                if !node.omit_digest {
                    executed["digest"] = json!("7Hq2dYcGq8wVbPz1");
                }
                executed
            }
            _ => Value::Null,
        };
        Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    async fn adapter_against(node: Arc<StubNode>) -> SuiAdapter {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(stub_rpc)).with_state(node);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let mut chain = sample_config().chains["sui"].clone();
        chain.rpc_url = format!("http://{}", addr);
        SuiAdapter::new(&chain).unwrap()
    }

    fn repay_call(nonce: u32) -> DestinationCall {
        DestinationCall::Repay(RepayCall {
            nonce,
            method: MethodId::OnRepay,
            loan_id: [0x07; 32],
            token_in: TokenRef::Move("0xf3c0::btc::BTC".to_string()),
        })
    }

    #[tokio::test]
    async fn test_concurrent_submissions_do_not_overlap() {
        let node = Arc::new(StubNode::default());
        let adapter = adapter_against(node.clone()).await;

        let (call1, call2) = (repay_call(1), repay_call(2));
        let (first, second) = tokio::join!(adapter.submit(&call1), adapter.submit(&call2));
        assert_eq!(first.unwrap().tx_id, "7Hq2dYcGq8wVbPz1");
        assert!(second.is_ok());
        assert_eq!(node.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execution_without_digest_is_an_error() {
        let node = Arc::new(StubNode {
            omit_digest: true,
            ..Default::default()
        });
        let adapter = adapter_against(node).await;

        match adapter.submit(&repay_call(1)).await {
            Err(AdapterError::Rpc(reason)) => assert!(reason.contains("no digest")),
            other => panic!("expected an RPC error, got {:?}", other),
        }
    }
}
