pub mod cache;
pub mod provider;
pub mod state;

pub use cache::{StateCache, DEFAULT_STATE_TTL};
pub use provider::{ProviderConfig, SimulationStateProvider, SimulationStatus};
pub use state::{mul_div, Holding, MarketId, MarketParams, Rounding, SimulationState, TokenInfo, VaultState};
