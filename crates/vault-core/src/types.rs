//! Shared value types and Base chain constants

use ethers::types::{Address, Bytes, H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base mainnet chain id
pub const BASE_CHAIN_ID: u64 = 8453;

/// Wrapped ether on Base
pub const BASE_WETH_ADDRESS: Address = H160([
    0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x06,
]);

/// Bundler3 general adapter on Base
pub const GENERAL_ADAPTER_ADDRESS: Address = H160([
    0xb9, 0x8c, 0x94, 0x8c, 0xfa, 0x24, 0x07, 0x2e, 0x58, 0x93, 0x5b, 0xc0, 0x04, 0xa8, 0xa7, 0xb3,
    0x76, 0xae, 0x74, 0x6a,
]);

/// Bundler3 multicall entry point on Base
pub const BUNDLER3_ADDRESS: Address = H160([
    0x6b, 0xfd, 0x81, 0x37, 0xe7, 0x02, 0x54, 0x0e, 0x7a, 0x42, 0xb7, 0x41, 0x78, 0xa4, 0xa4, 0x9b,
    0xa4, 0x39, 0x20, 0xc4,
]);

/// Morpho Blue singleton
pub const MORPHO_ADDRESS: Address = H160([
    0xbb, 0xbb, 0xbb, 0xbb, 0xbb, 0x9c, 0xc5, 0xe9, 0x0e, 0x3b, 0x3a, 0xf6, 0x4b, 0xda, 0xf6, 0x2c,
    0x37, 0xee, 0xff, 0xcb,
]);

/// Pseudo-token address used for native ether holdings
pub const NATIVE_ADDRESS: Address = H160([0xee; 20]);

/// Native currency kept back for gas when wrapping (0.0001 ETH)
pub const GAS_RESERVE_WEI: U256 = U256([100_000_000_000_000, 0, 0, 0]);

/// Upper bound on withdraw queue entries read per vault
pub const MAX_WITHDRAW_QUEUE_ITEMS: usize = 30;

/// 1e18
pub const WAD: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Protocol default slippage tolerance, WAD-scaled (0.03%)
pub const DEFAULT_SLIPPAGE_TOLERANCE: U256 = U256([300_000_000_000_000, 0, 0, 0]);

/// Contract addresses the planner and state builder depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAddresses {
    pub bundler: Address,
    pub general_adapter: Address,
    pub morpho: Address,
    pub wrapped_native: Address,
}

impl ChainAddresses {
    pub const fn base() -> Self {
        Self {
            bundler: BUNDLER3_ADDRESS,
            general_adapter: GENERAL_ADAPTER_ADDRESS,
            morpho: MORPHO_ADDRESS,
            wrapped_native: BASE_WETH_ADDRESS,
        }
    }
}

impl Default for ChainAddresses {
    fn default() -> Self {
        Self::base()
    }
}

/// User-level vault action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VaultAction {
    Deposit,
    Withdraw,
    WithdrawAll,
}

impl VaultAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultAction::Deposit => "deposit",
            VaultAction::Withdraw => "withdraw",
            VaultAction::WithdrawAll => "withdrawAll",
        }
    }
}

impl fmt::Display for VaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaultAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(VaultAction::Deposit),
            "withdraw" => Ok(VaultAction::Withdraw),
            "withdrawAll" | "withdraw-all" | "withdraw_all" => Ok(VaultAction::WithdrawAll),
            other => Err(format!("unknown vault action: {}", other)),
        }
    }
}

/// A single user intent: what to do, on which vault, for how much
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultIntent {
    pub action: VaultAction,
    pub vault: Address,
    /// Decimal string in asset units; ignored for withdraw-all
    pub amount: Option<String>,
}

impl VaultIntent {
    pub fn deposit(vault: Address, amount: impl Into<String>) -> Self {
        Self { action: VaultAction::Deposit, vault, amount: Some(amount.into()) }
    }

    pub fn withdraw(vault: Address, amount: impl Into<String>) -> Self {
        Self { action: VaultAction::Withdraw, vault, amount: Some(amount.into()) }
    }

    pub fn withdraw_all(vault: Address) -> Self {
        Self { action: VaultAction::WithdrawAll, vault, amount: None }
    }
}

/// An unsigned call ready for estimation or submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Block the snapshot was read at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: u64,
}

/// Minimal view of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub gas_used: Option<U256>,
}
