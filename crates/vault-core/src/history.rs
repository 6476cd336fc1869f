//! Deposit and withdrawal totals for a vault position, from ERC-4626 event logs

use ethers::abi::{self as ethabi, ParamType};
use ethers::types::{Address, BlockNumber, Filter, Log, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::abi::{event_topic, DEPOSIT_EVENT, WITHDRAW_EVENT};
use crate::amount::format_units;
use crate::chain::ChainClient;
use crate::error::VaultError;

pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_HISTORY_MAX_ENTRIES: usize = 256;

/// Summed asset amounts in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVaultHistory {
    pub total_deposited: U256,
    pub total_withdrawn: U256,
}

/// USD-denominated view of a position's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultHistory {
    pub total_deposited: f64,
    pub total_withdrawn: f64,
    pub net_deposits: f64,
    /// Never negative
    pub interest_earned: f64,
}

impl VaultHistory {
    pub fn derive(raw: &RawVaultHistory, decimals: u8, price_usd: f64, current_balance_usd: f64) -> Self {
        let to_f64 = |value: U256| format_units(value, decimals).parse::<f64>().unwrap_or(0.0);
        let total_deposited = to_f64(raw.total_deposited) * price_usd;
        let total_withdrawn = to_f64(raw.total_withdrawn) * price_usd;
        let net_deposits = total_deposited - total_withdrawn;
        Self {
            total_deposited,
            total_withdrawn,
            net_deposits,
            interest_earned: (current_balance_usd - net_deposits).max(0.0),
        }
    }
}

/// TTL and capacity bounded cache keyed by (vault, owner)
#[derive(Debug)]
pub struct HistoryCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<(Address, Address), (RawVaultHistory, Instant)>>,
}

impl HistoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { ttl, max_entries: max_entries.max(1), entries: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, vault: Address, owner: Address) -> Option<RawVaultHistory> {
        let entries = self.entries.read().await;
        entries
            .get(&(vault, owner))
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(history, _)| *history)
    }

    pub async fn insert(&self, vault: Address, owner: Address, history: RawVaultHistory) {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&(vault, owner)) && entries.len() >= self.max_entries {
            let oldest = entries.iter().min_by_key(|(_, (_, stored_at))| *stored_at).map(|(key, _)| *key);
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert((vault, owner), (history, Instant::now()));
    }

    pub async fn invalidate(&self, vault: Address, owner: Address) {
        self.entries.write().await.remove(&(vault, owner));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TTL, DEFAULT_HISTORY_MAX_ENTRIES)
    }
}

pub struct VaultHistoryService<C: ChainClient + ?Sized> {
    chain: Arc<C>,
    cache: Arc<HistoryCache>,
}

impl<C: ChainClient + ?Sized> VaultHistoryService<C> {
    pub fn new(chain: Arc<C>, cache: Arc<HistoryCache>) -> Self {
        Self { chain, cache }
    }

    /// Sum every `Deposit` and `Withdraw` of `owner` on `vault` since genesis
    pub async fn raw_history(&self, vault: Address, owner: Address) -> Result<RawVaultHistory, VaultError> {
        if let Some(cached) = self.cache.get(vault, owner).await {
            debug!(vault = ?vault, owner = ?owner, "Vault history served from cache");
            return Ok(cached);
        }

        let deposit_topic = event_topic(DEPOSIT_EVENT);
        let withdraw_topic = event_topic(WITHDRAW_EVENT);
        let owner_topic = H256::from(owner);

        let deposits = Filter::new()
            .address(vault)
            .topic0(deposit_topic)
            .topic2(owner_topic)
            .from_block(BlockNumber::Earliest)
            .to_block(BlockNumber::Latest);
        let withdrawals = Filter::new()
            .address(vault)
            .topic0(withdraw_topic)
            .topic3(owner_topic)
            .from_block(BlockNumber::Earliest)
            .to_block(BlockNumber::Latest);

        let (deposit_logs, withdraw_logs) =
            futures::try_join!(self.chain.get_logs(&deposits), self.chain.get_logs(&withdrawals))?;

        let history = RawVaultHistory {
            total_deposited: sum_assets(&deposit_logs, vault, deposit_topic, 2, owner_topic)?,
            total_withdrawn: sum_assets(&withdraw_logs, vault, withdraw_topic, 3, owner_topic)?,
        };
        info!(
            vault = ?vault,
            owner = ?owner,
            deposits = deposit_logs.len(),
            withdrawals = withdraw_logs.len(),
            "Fetched vault history"
        );

        self.cache.insert(vault, owner, history).await;
        Ok(history)
    }

    pub async fn history(
        &self,
        vault: Address,
        owner: Address,
        decimals: u8,
        price_usd: f64,
        current_balance_usd: f64,
    ) -> Result<VaultHistory, VaultError> {
        let raw = self.raw_history(vault, owner).await?;
        Ok(VaultHistory::derive(&raw, decimals, price_usd, current_balance_usd))
    }
}

/// Sum the `assets` word of matching logs; `owner_index` is the topic holding the owner
fn sum_assets(logs: &[Log], vault: Address, topic0: H256, owner_index: usize, owner: H256) -> Result<U256, VaultError> {
    let mut total = U256::zero();
    for log in logs {
        let matches = log.address == vault
            && log.topics.first() == Some(&topic0)
            && log.topics.get(owner_index) == Some(&owner);
        if !matches {
            continue;
        }
        let values = ethabi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], &log.data)?;
        let assets = values
            .into_iter()
            .next()
            .and_then(|token| token.into_uint())
            .ok_or_else(|| VaultError::Abi("vault event without assets".to_string()))?;
        total = total.saturating_add(assets);
    }
    Ok(total)
}
