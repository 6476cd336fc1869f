//! Builds simulation snapshots for a (vault, user) pair from live chain reads

use ethers::types::{Address, U256};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::cache::StateCache;
use super::state::{Holding, MarketParams, SimulationState, TokenInfo, VaultState};
use crate::chain::ChainClient;
use crate::error::VaultError;
use crate::types::{ChainAddresses, MAX_WITHDRAW_QUEUE_ITEMS, NATIVE_ADDRESS};

/// Outcome of a build or status query
#[derive(Debug, Clone)]
pub enum SimulationStatus {
    Ready(Arc<SimulationState>),
    /// Another build for the same pair is running, or nothing is cached yet
    Pending,
}

impl SimulationStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SimulationStatus::Ready(_))
    }

    pub fn ready(self) -> Option<Arc<SimulationState>> {
        match self {
            SimulationStatus::Ready(state) => Some(state),
            SimulationStatus::Pending => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub addresses: ChainAddresses,
    pub max_withdraw_queue_items: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { addresses: ChainAddresses::base(), max_withdraw_queue_items: MAX_WITHDRAW_QUEUE_ITEMS }
    }
}

type PairKey = (Address, Address);

/// Removes the pair from the in-flight set when the build finishes or is dropped
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<PairKey>>,
    key: PairKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.key);
    }
}

pub struct SimulationStateProvider<C: ChainClient + ?Sized> {
    chain: Arc<C>,
    config: ProviderConfig,
    cache: Arc<StateCache>,
    in_flight: Mutex<HashSet<PairKey>>,
    /// Last native balance observed per pair, used by `status`
    native_balances: RwLock<HashMap<PairKey, U256>>,
}

impl<C: ChainClient + ?Sized> SimulationStateProvider<C> {
    pub fn new(chain: Arc<C>, config: ProviderConfig, cache: Arc<StateCache>) -> Self {
        Self {
            chain,
            config,
            cache,
            in_flight: Mutex::new(HashSet::new()),
            native_balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    /// Build (or reuse a fresh cached) snapshot and overlay the live native balance.
    ///
    /// Returns `Pending` without doing any work when another build for the
    /// same pair is already running.
    pub async fn build(&self, vault: Address, user: Address) -> Result<SimulationStatus, VaultError> {
        let key = (vault, user);
        let _guard = match self.try_claim(key) {
            Some(guard) => guard,
            None => {
                debug!(vault = ?vault, user = ?user, "Simulation build already in flight");
                return Ok(SimulationStatus::Pending);
            }
        };

        let base = match self.cache.get_fresh(vault, user).await {
            Some(cached) => cached,
            None => {
                let fetched = Arc::new(self.fetch_base(vault, user).await?);
                self.cache.insert(vault, user, fetched.clone()).await;
                info!(
                    vault = ?vault,
                    user = ?user,
                    block = fetched.block.number,
                    tokens = fetched.tokens.len(),
                    markets = fetched.markets.len(),
                    cached = self.cache.len().await,
                    "Built simulation state"
                );
                fetched
            }
        };

        let native = self.chain.native_balance(user).await?;
        self.native_balances.write().await.insert(key, native);

        Ok(SimulationStatus::Ready(Arc::new(base.with_native_balance(user, native))))
    }

    /// Non-blocking view of the current snapshot
    pub async fn status(&self, vault: Address, user: Address) -> SimulationStatus {
        if self.is_in_flight((vault, user)) {
            return SimulationStatus::Pending;
        }
        let Some(base) = self.cache.get_fresh(vault, user).await else {
            return SimulationStatus::Pending;
        };
        match self.native_balances.read().await.get(&(vault, user)) {
            Some(native) => SimulationStatus::Ready(Arc::new(base.with_native_balance(user, *native))),
            None => SimulationStatus::Ready(base),
        }
    }

    pub async fn invalidate(&self, vault: Address, user: Address) {
        self.cache.invalidate(vault, user).await;
        self.native_balances.write().await.remove(&(vault, user));
    }

    fn try_claim(&self, key: PairKey) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(key) {
            return None;
        }
        Some(InFlightGuard { set: &self.in_flight, key })
    }

    fn is_in_flight(&self, key: PairKey) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.contains(&key)
    }

    async fn fetch_base(&self, vault: Address, user: Address) -> Result<SimulationState, VaultError> {
        let addresses = self.config.addresses;
        let chain = self.chain.as_ref();

        let block = chain.block_ref().await?;
        let asset = chain.vault_asset(vault).await?;

        let queue_len = chain.withdraw_queue_length(vault).await?;
        let capped = queue_len.min(self.config.max_withdraw_queue_items);
        if capped < queue_len {
            warn!(vault = ?vault, queue_len, capped, "Withdraw queue truncated");
        }
        let withdraw_queue = try_join_all((0..capped).map(|i| chain.withdraw_queue(vault, i))).await?;

        let raw_markets =
            try_join_all(withdraw_queue.iter().map(|id| chain.market_params(addresses.morpho, *id))).await?;
        let mut markets = BTreeMap::new();
        for (id, (loan_token, collateral_token, oracle, irm, lltv)) in withdraw_queue.iter().zip(raw_markets) {
            if loan_token.is_zero() {
                debug!(market = ?id, "Skipping unknown market");
                continue;
            }
            markets.insert(*id, MarketParams { id: *id, loan_token, collateral_token, oracle, irm, lltv });
        }

        let mut token_addresses = vec![NATIVE_ADDRESS, addresses.wrapped_native, asset, vault];
        for market in markets.values() {
            token_addresses.push(market.loan_token);
            if !market.collateral_token.is_zero() {
                token_addresses.push(market.collateral_token);
            }
        }
        dedup_in_order(&mut token_addresses);

        let token_infos = try_join_all(token_addresses.iter().map(|token| self.fetch_token(*token))).await?;
        let tokens: BTreeMap<Address, TokenInfo> =
            token_infos.into_iter().map(|info| (info.address, info)).collect();

        let mut users = vec![user, addresses.bundler, addresses.general_adapter, vault];
        dedup_in_order(&mut users);

        let pairs: Vec<(Address, &TokenInfo)> =
            users.iter().flat_map(|u| tokens.values().map(move |t| (*u, t))).collect();
        let fetched = try_join_all(pairs.into_iter().map(|(owner, token)| self.fetch_holding(owner, token))).await?;

        let mut holdings: BTreeMap<Address, BTreeMap<Address, Holding>> = BTreeMap::new();
        for holding in fetched {
            holdings.entry(holding.user).or_default().insert(holding.token, holding);
        }

        let (total_assets, total_supply) = chain.vault_totals(vault).await?;
        let asset_decimals = tokens.get(&asset).map(|t| t.decimals).unwrap_or(18);
        let vault_decimals = tokens.get(&vault).map(|t| t.decimals).unwrap_or(asset_decimals);

        let mut vaults = BTreeMap::new();
        vaults.insert(
            vault,
            VaultState {
                address: vault,
                asset,
                asset_decimals,
                decimals_offset: vault_decimals.saturating_sub(asset_decimals),
                total_assets,
                total_supply,
                withdraw_queue,
            },
        );

        Ok(SimulationState { block, users, tokens, holdings, vaults, markets })
    }

    async fn fetch_token(&self, token: Address) -> Result<TokenInfo, VaultError> {
        if token == NATIVE_ADDRESS {
            return Ok(TokenInfo { address: token, decimals: 18, domain_separator: None });
        }
        let decimals = self.chain.erc20_decimals(token).await?;
        let domain_separator = self.chain.domain_separator(token).await;
        Ok(TokenInfo { address: token, decimals, domain_separator })
    }

    async fn fetch_holding(&self, owner: Address, token: &TokenInfo) -> Result<Holding, VaultError> {
        if token.address == NATIVE_ADDRESS {
            let balance = self.chain.native_balance(owner).await?;
            return Ok(Holding::new(owner, NATIVE_ADDRESS, balance));
        }

        let spender = self.config.addresses.general_adapter;
        let balance = self.chain.erc20_balance(token.address, owner).await?;
        let allowance = self.chain.erc20_allowance(token.address, owner, spender).await?;

        let mut holding = Holding::new(owner, token.address, balance);
        holding.erc20_allowances.insert(spender, allowance);
        if token.supports_permit() {
            holding.erc2612_nonce = self.chain.permit_nonce(token.address, owner).await;
        }
        Ok(holding)
    }
}

fn dedup_in_order(addresses: &mut Vec<Address>) {
    let mut seen = HashSet::new();
    addresses.retain(|a| seen.insert(*a));
}
