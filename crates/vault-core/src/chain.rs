//! Wallet and chain client seams
//!
//! The orchestrator only talks to the chain through [`ChainClient`] and to the
//! user's wallet through [`WalletSigner`]. Typed contract reads are provided
//! methods layered over the raw `read_contract` call, so an implementation only
//! has to supply the primitives.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, Signature, H256, U256};
use std::sync::Arc;

use crate::abi;
use crate::error::VaultError;
use crate::types::{BlockRef, TxReceipt, TxRequest};

/// Read access plus gas estimation and receipt polling
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_call` against `to` with raw calldata
    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes, VaultError>;

    async fn native_balance(&self, account: Address) -> Result<U256, VaultError>;

    async fn block_ref(&self) -> Result<BlockRef, VaultError>;

    async fn estimate_gas(&self, from: Address, tx: &TxRequest) -> Result<U256, VaultError>;

    async fn wait_for_transaction_receipt(&self, hash: H256) -> Result<TxReceipt, VaultError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, VaultError>;

    async fn vault_asset(&self, vault: Address) -> Result<Address, VaultError> {
        abi::decode_address(&self.read_contract(vault, abi::asset()).await?)
    }

    async fn withdraw_queue_length(&self, vault: Address) -> Result<usize, VaultError> {
        let len = abi::decode_uint(&self.read_contract(vault, abi::withdraw_queue_length()).await?)?;
        Ok(len.min(U256::from(usize::MAX)).as_usize())
    }

    async fn withdraw_queue(&self, vault: Address, index: usize) -> Result<H256, VaultError> {
        abi::decode_bytes32(&self.read_contract(vault, abi::withdraw_queue(index)).await?)
    }

    async fn market_params(
        &self,
        morpho: Address,
        market_id: H256,
    ) -> Result<(Address, Address, Address, Address, U256), VaultError> {
        abi::decode_market_params(&self.read_contract(morpho, abi::id_to_market_params(market_id)).await?)
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, VaultError> {
        abi::decode_uint(&self.read_contract(token, abi::balance_of(owner)).await?)
    }

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, VaultError> {
        abi::decode_uint(&self.read_contract(token, abi::allowance(owner, spender)).await?)
    }

    async fn erc20_decimals(&self, token: Address) -> Result<u8, VaultError> {
        let value = abi::decode_uint(&self.read_contract(token, abi::decimals()).await?)?;
        if value > U256::from(u8::MAX) {
            return Err(VaultError::Abi(format!("decimals {} out of range for {:?}", value, token)));
        }
        Ok(value.as_u32() as u8)
    }

    /// EIP-2612 nonce; `None` when the token has no permit support
    async fn permit_nonce(&self, token: Address, owner: Address) -> Option<U256> {
        let data = self.read_contract(token, abi::nonces(owner)).await.ok()?;
        abi::decode_uint(&data).ok()
    }

    /// EIP-712 domain separator; `None` when the token has no permit support
    async fn domain_separator(&self, token: Address) -> Option<H256> {
        let data = self.read_contract(token, abi::domain_separator()).await.ok()?;
        abi::decode_bytes32(&data).ok()
    }

    async fn vault_totals(&self, vault: Address) -> Result<(U256, U256), VaultError> {
        let assets = abi::decode_uint(&self.read_contract(vault, abi::total_assets()).await?)?;
        let supply = abi::decode_uint(&self.read_contract(vault, abi::total_supply()).await?)?;
        Ok((assets, supply))
    }

    async fn convert_to_shares(&self, vault: Address, assets: U256) -> Result<U256, VaultError> {
        abi::decode_uint(&self.read_contract(vault, abi::convert_to_shares(assets)).await?)
    }
}

/// The connected wallet's signing and submission capability
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a 32-byte EIP-712 digest; a declined prompt is `VaultError::UserRejected`
    async fn sign_digest(&self, digest: H256) -> Result<Signature, VaultError>;

    /// Submit a transaction; `gas` of `None` leaves estimation to the wallet
    async fn send_transaction(&self, tx: &TxRequest, gas: Option<U256>) -> Result<H256, VaultError>;
}

/// What the UI knows about the wallet at the moment an action is issued
#[derive(Clone, Default)]
pub struct WalletSession {
    pub account: Option<Address>,
    pub signer: Option<Arc<dyn WalletSigner>>,
}

impl WalletSession {
    pub fn connected(signer: Arc<dyn WalletSigner>) -> Self {
        Self { account: Some(signer.address()), signer: Some(signer) }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("account", &self.account)
            .field("signer", &self.signer.as_ref().map(|s| s.address()))
            .finish()
    }
}
