//! Error taxonomy for planning and executing vault actions

use ethers::types::{Address, H256, U256};

use crate::amount::format_units;

/// Everything that can stop a vault action
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Wallet client not available")]
    SignerUnavailable,

    #[error("Simulation state not ready: {0}")]
    StateNotReady(String),

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    #[error("Vault {vault:?} not found in simulation state (loaded vaults: {loaded})")]
    VaultNotLoaded { vault: Address, loaded: String },

    #[error("No holding for user {user:?} and token {token:?} in simulation state")]
    UnknownHolding { user: Address, token: Address },

    #[error("Address {0:?} is not tracked by the simulation state")]
    UntrackedUser(Address),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid amount format: \"{0}\". Expected a decimal number.")]
    InvalidAmountFormat(String),

    #[error(
        "Insufficient balance. Available: {}, requested: {}",
        display_units(.available, .decimals),
        display_units(.requested, .decimals)
    )]
    InsufficientBalance { requested: U256, available: U256, decimals: u8 },

    #[error(
        "Insufficient balance to cover gas reserve: requested {} but only {} wrapped + {} wrappable after keeping {} for gas",
        display_units(.requested, &18),
        display_units(.existing_wrapped, &18),
        display_units(.wrappable, &18),
        display_units(.reserve, &18)
    )]
    InsufficientGasReserve {
        requested: U256,
        existing_wrapped: U256,
        wrappable: U256,
        reserve: U256,
    },

    #[error("No shares to withdraw")]
    NoSharesToWithdraw,

    #[error("Bundle requires {required} signatures but {provided} were provided")]
    MissingSignature { required: usize, provided: usize },

    #[error("Fresh state requires permits that differ from the ones already signed")]
    PermitMismatch,

    #[error("Failed to convert assets to shares: {0}")]
    ConversionFailed(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Transaction {0:?} reverted")]
    TransactionReverted(H256),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("ABI error: {0}")]
    Abi(String),
}

impl VaultError {
    /// Gas estimation failure caused by the node still serving pre-approval state
    pub fn is_retryable_stale_state(&self) -> bool {
        matches!(self, VaultError::GasEstimation(msg) if is_stale_allowance_error(msg))
    }

    /// Fatal for the current invocation, never retried
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            VaultError::WalletNotConnected | VaultError::SignerUnavailable | VaultError::StateNotReady(_)
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, VaultError::UserRejected(_))
    }

    /// Short stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::WalletNotConnected => "wallet_not_connected",
            VaultError::SignerUnavailable => "signer_unavailable",
            VaultError::StateNotReady(_) => "state_not_ready",
            VaultError::UserRejected(_) => "user_rejected",
            VaultError::VaultNotLoaded { .. } => "vault_not_loaded",
            VaultError::UnknownHolding { .. } => "unknown_holding",
            VaultError::UntrackedUser(_) => "untracked_user",
            VaultError::InvalidAmount(_) => "invalid_amount",
            VaultError::InvalidAmountFormat(_) => "invalid_amount_format",
            VaultError::InsufficientBalance { .. } => "insufficient_balance",
            VaultError::InsufficientGasReserve { .. } => "insufficient_gas_reserve",
            VaultError::NoSharesToWithdraw => "no_shares",
            VaultError::MissingSignature { .. } => "missing_signature",
            VaultError::PermitMismatch => "permit_mismatch",
            VaultError::ConversionFailed(_) => "conversion_failed",
            VaultError::GasEstimation(_) => "gas_estimation",
            VaultError::TransactionReverted(_) => "reverted",
            VaultError::Rpc(_) => "rpc",
            VaultError::Abi(_) => "abi",
        }
    }
}

/// Classifies a gas estimation failure as a stale-allowance symptom.
///
/// Nodes do not return a structured revert cause here, so this matches on the
/// revert text. Keep all such matching in this one function.
pub fn is_stale_allowance_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("allowance") || lower.contains("transfer amount exceeds")
}

/// Maps wallet/provider error text to a rejection when the user declined
pub fn is_user_rejection_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("user rejected") || lower.contains("user denied") || lower.contains("rejected the request")
}

fn display_units(value: &U256, decimals: &u8) -> String {
    format_units(*value, *decimals)
}

impl From<ethers::abi::Error> for VaultError {
    fn from(err: ethers::abi::Error) -> Self {
        VaultError::Abi(err.to_string())
    }
}
