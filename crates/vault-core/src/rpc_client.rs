//! JSON-RPC implementations of the chain and wallet seams

use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Eip1559TransactionRequest, Filter,
        Log, Signature, TransactionRequest, H256, U256,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, WalletSigner};
use crate::error::{is_user_rejection_message, VaultError};
use crate::types::{BlockRef, TxReceipt, TxRequest};

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: String,
    pub chain_id: u64,
    /// Receipt polling interval
    pub poll_interval: Duration,
    pub confirmations: usize,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            url: "https://mainnet.base.org".to_string(),
            chain_id: crate::types::BASE_CHAIN_ID,
            poll_interval: Duration::from_millis(500),
            confirmations: 1,
        }
    }
}

/// [`ChainClient`] over an HTTP provider
#[derive(Debug, Clone)]
pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
    confirmations: usize,
}

impl EthersChainClient {
    pub fn new(config: &RpcClientConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.url.as_str())?.interval(config.poll_interval);
        info!(url = %config.url, chain_id = config.chain_id, "RPC client initialized");
        Ok(Self { provider: Arc::new(provider), confirmations: config.confirmations.max(1) })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }
}

fn rpc_error(err: impl std::fmt::Display) -> VaultError {
    VaultError::Rpc(err.to_string())
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes, VaultError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await.map_err(rpc_error)
    }

    async fn native_balance(&self, account: Address) -> Result<U256, VaultError> {
        self.provider.get_balance(account, None).await.map_err(rpc_error)
    }

    async fn block_ref(&self) -> Result<BlockRef, VaultError> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| VaultError::Rpc("latest block unavailable".to_string()))?;
        Ok(BlockRef {
            number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
            timestamp: block.timestamp.low_u64(),
        })
    }

    async fn estimate_gas(&self, from: Address, tx: &TxRequest) -> Result<U256, VaultError> {
        let request: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(tx.to)
            .data(tx.data.clone())
            .value(tx.value)
            .into();
        let gas = self
            .provider
            .estimate_gas(&request, None)
            .await
            .map_err(|e| VaultError::GasEstimation(e.to_string()))?;
        debug!(gas = %gas, to = ?tx.to, "Gas estimated");
        Ok(gas)
    }

    async fn wait_for_transaction_receipt(&self, hash: H256) -> Result<TxReceipt, VaultError> {
        let receipt = PendingTransaction::new(hash, self.provider.as_ref())
            .confirmations(self.confirmations)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| VaultError::Rpc(format!("transaction {:?} dropped from mempool", hash)))?;

        Ok(TxReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            gas_used: receipt.gas_used,
        })
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, VaultError> {
        self.provider.get_logs(filter).await.map_err(rpc_error)
    }
}

/// [`WalletSigner`] backed by a local private key
pub struct LocalWalletSigner {
    wallet: LocalWallet,
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
}

impl LocalWalletSigner {
    pub fn new(provider: Arc<Provider<Http>>, private_key: &str, chain_id: u64) -> Result<Self> {
        let wallet = private_key.trim_start_matches("0x").parse::<LocalWallet>()?.with_chain_id(chain_id);
        info!(address = ?wallet.address(), chain_id, "Wallet signer loaded");
        let client = SignerMiddleware::new(provider.as_ref().clone(), wallet.clone());
        Ok(Self { wallet, client })
    }
}

fn wallet_error(err: impl std::fmt::Display) -> VaultError {
    let message = err.to_string();
    if is_user_rejection_message(&message) {
        VaultError::UserRejected(message)
    } else {
        VaultError::Rpc(message)
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_digest(&self, digest: H256) -> Result<Signature, VaultError> {
        self.wallet.sign_hash(digest).map_err(wallet_error)
    }

    async fn send_transaction(&self, tx: &TxRequest, gas: Option<U256>) -> Result<H256, VaultError> {
        let mut request = Eip1559TransactionRequest::new()
            .from(self.wallet.address())
            .to(tx.to)
            .data(tx.data.clone())
            .value(tx.value);
        if let Some(gas) = gas {
            request = request.gas(gas);
        }

        let pending = self.client.send_transaction(request, None).await.map_err(|e| {
            warn!(error = %e, to = ?tx.to, "Transaction submission failed");
            wallet_error(e)
        })?;
        let hash = pending.tx_hash();
        debug!(tx_hash = ?hash, to = ?tx.to, value = %tx.value, "Transaction accepted by node");
        Ok(hash)
    }
}
