use super::{AdapterError, ChainAdapter, Submission};
use crate::codec::{AmountWidth, DestinationCall};
use crate::types::{ChainConfig, ChainFamily, RelayError};
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, FixedBytes};
use alloy_provider::{DynProvider, PendingTransactionError, Provider, ProviderBuilder, WatchTxError};
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

sol! {
    interface IOrbital {
        function receiveOnBorrow(
            uint32 nonce,
            bytes32 method,
            bytes32 loanId,
            bytes32 receiver,
            uint16 fromChainId,
            bytes32 fromContractId,
            bytes32 tokenOut,
            uint8 tokenType,
            uint256 value
        ) external;

        function receiveOnRepay(uint32 nonce, bytes32 method, bytes32 loanId) external;

        function receiveOnAmplify(uint32 nonce, bytes32 method, address receiver, bool status) external;
    }
}

/// ABI-encode a destination call against the Orbital EVM contract.
pub fn encode_call(call: &DestinationCall) -> Result<Vec<u8>, AdapterError> {
    let data = match call {
        DestinationCall::Borrow(borrow) => {
            let token_out = borrow.token_out.to_bytes32().ok_or_else(|| {
                AdapterError::Unsupported(format!("{} is not an EVM token", borrow.token_out))
            })?;
            IOrbital::receiveOnBorrowCall {
                nonce: borrow.nonce,
                method: FixedBytes(borrow.method.to_bytes32()),
                loanId: FixedBytes(borrow.loan_id),
                receiver: FixedBytes(borrow.receiver),
                fromChainId: borrow.from_chain,
                fromContractId: FixedBytes(borrow.from_contract),
                tokenOut: FixedBytes(token_out),
                tokenType: borrow.token_type,
                value: borrow.value.value(),
            }
            .abi_encode()
        }
        DestinationCall::Repay(repay) => IOrbital::receiveOnRepayCall {
            nonce: repay.nonce,
            method: FixedBytes(repay.method.to_bytes32()),
            loanId: FixedBytes(repay.loan_id),
        }
        .abi_encode(),
        DestinationCall::Amplify(amplify) => IOrbital::receiveOnAmplifyCall {
            nonce: amplify.nonce,
            method: FixedBytes(amplify.method.to_bytes32()),
            receiver: Address::from(amplify.receiver),
            status: amplify.status,
        }
        .abi_encode(),
    };
    Ok(data)
}

/// EVM chain implementation
pub struct EvmAdapter {
    chain_id: u16,
    width: AmountWidth,
    contract: Address,
    sender: Address,
    provider: DynProvider,
    confirmation_timeout: Duration,
}

impl EvmAdapter {
    pub fn new(config: &ChainConfig) -> Result<Self, RelayError> {
        let signer: PrivateKeySigner = config
            .private_key
            .expose()
            .parse()
            .map_err(|_| RelayError::ConfigError(format!("Invalid EVM private key for chain {}", config.chain_id)))?;
        let sender = signer.address();

        let contract: Address = config
            .contract
            .parse()
            .map_err(|e| RelayError::ConfigError(format!("Invalid contract address: {}", e)))?;

        let url: reqwest::Url = config
            .rpc_url
            .parse()
            .map_err(|e| RelayError::ConfigError(format!("Invalid RPC URL: {}", e)))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!(chain_id = config.chain_id, %sender, %contract, "EVM adapter ready");

        Ok(Self {
            chain_id: config.chain_id,
            width: config.amount_width,
            contract,
            sender,
            provider,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
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
        let input = encode_call(call)?;
        let request = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(self.contract)
            .with_input(input);

        // No fallback gas limit.
        let gas_limit = self
            .provider
            .estimate_gas(request.clone())
            .await
            .map_err(|e| AdapterError::Estimation(e.to_string()))?;

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| AdapterError::Rpc(format!("Failed to get gas price: {}", e)))?;

        debug!(
            chain_id = self.chain_id,
            method = %call.method(),
            nonce = call.nonce(),
            gas_limit,
            gas_price = %gas_price,
            "Sending EVM transaction"
        );

        let pending = self
            .provider
            .send_transaction(request.with_gas_limit(gas_limit).with_gas_price(gas_price))
            .await
            .map_err(|e| {
                error!(chain_id = self.chain_id, "Transaction submission failed: {}", e);
                AdapterError::Rpc(format!("Failed to send transaction: {}", e))
            })?;

        let tx_hash = *pending.tx_hash();
        let tx_id = tx_hash.to_string();
        info!(chain_id = self.chain_id, tx_hash = %tx_id, "Transaction sent, waiting for receipt");

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    AdapterError::Timeout(self.confirmation_timeout.as_secs())
                }
                other => AdapterError::Rpc(format!("Failed to confirm {}: {}", tx_id, other)),
            })?;

        if !receipt.status() {
            return Err(AdapterError::Rejected {
                tx_id,
                reason: "transaction reverted".to_string(),
            });
        }

        info!(
            chain_id = self.chain_id,
            tx_hash = %tx_id,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        Ok(Submission {
            tx_id,
            created_loan_id: None,
        })
    }

    async fn check_health(&self) -> bool {
        match self.provider.get_block_number().await {
            Ok(block) => {
                debug!(chain_id = self.chain_id, block, "EVM health check passed");
                true
            }
            Err(e) => {
                error!(chain_id = self.chain_id, "EVM health check failed: {}", e);
                false
            }
        }
    }
}
