//! Vault Core - transaction bundle orchestration for Morpho ERC-4626 vaults on Base

pub mod abi;
pub mod amount;
pub mod bundle;
pub mod chain;
pub mod error;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod rpc_client;
pub mod simulation;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use amount::{format_units, parse_units};
pub use bundle::{
    Bundle, BundleBuilder, BundleOperation, BundlingOptions, PrerequisiteTx, SignatureRequirement,
};
pub use chain::{ChainClient, WalletSession, WalletSigner};
pub use error::{is_stale_allowance_error, VaultError};
pub use history::{HistoryCache, RawVaultHistory, VaultHistory, VaultHistoryService};
pub use metrics::OrchestratorMetrics;
pub use orchestrator::{OrchestratorConfig, OrchestratorPhase, TransactionOrchestrator};
pub use progress::{
    ModalState, ProgressCallback, ProgressError, ProgressReporter, ProgressStep, StepState, StepView,
    TransactionStatus,
};
pub use rpc_client::{EthersChainClient, LocalWalletSigner, RpcClientConfig};
pub use simulation::{
    Holding, ProviderConfig, SimulationState, SimulationStateProvider, SimulationStatus, StateCache, TokenInfo,
    VaultState,
};
pub use types::*;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
