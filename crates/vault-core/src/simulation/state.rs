//! Point-in-time snapshot of the on-chain state a bundle is planned against

use ethers::types::{Address, H256, U256, U512};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::VaultError;
use crate::types::{BlockRef, NATIVE_ADDRESS};

pub type MarketId = H256;

/// One (user, token) position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub user: Address,
    pub token: Address,
    pub balance: U256,
    /// spender -> allowance
    pub erc20_allowances: BTreeMap<Address, U256>,
    /// Present only for tokens implementing EIP-2612
    pub erc2612_nonce: Option<U256>,
    pub can_transfer: bool,
}

impl Holding {
    pub fn new(user: Address, token: Address, balance: U256) -> Self {
        Self {
            user,
            token,
            balance,
            erc20_allowances: BTreeMap::new(),
            erc2612_nonce: None,
            can_transfer: true,
        }
    }

    pub fn allowance(&self, spender: Address) -> U256 {
        self.erc20_allowances.get(&spender).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub domain_separator: Option<H256>,
}

impl TokenInfo {
    pub fn supports_permit(&self) -> bool {
        self.domain_separator.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// ERC-4626 vault configuration needed to plan operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub address: Address,
    pub asset: Address,
    pub asset_decimals: u8,
    /// vault decimals minus asset decimals (virtual share offset)
    pub decimals_offset: u8,
    pub total_assets: U256,
    pub total_supply: U256,
    pub withdraw_queue: Vec<MarketId>,
}

impl VaultState {
    fn virtual_shares(&self) -> U256 {
        U256::exp10(self.decimals_offset as usize)
    }

    pub fn to_shares(&self, assets: U256, rounding: Rounding) -> U256 {
        mul_div(
            assets,
            self.total_supply.saturating_add(self.virtual_shares()),
            self.total_assets.saturating_add(U256::one()),
            rounding,
        )
    }

    pub fn to_assets(&self, shares: U256, rounding: Rounding) -> U256 {
        mul_div(
            shares,
            self.total_assets.saturating_add(U256::one()),
            self.total_supply.saturating_add(self.virtual_shares()),
            rounding,
        )
    }
}

/// Saturates at `U256::MAX` instead of overflowing
pub fn mul_div(x: U256, y: U256, denominator: U256, rounding: Rounding) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }
    let product = x.full_mul(y);
    let denominator = U512::from(denominator);
    let mut quotient = product / denominator;
    if rounding == Rounding::Up && !(product % denominator).is_zero() {
        quotient += U512::one();
    }
    U256::try_from(quotient).unwrap_or(U256::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    pub id: MarketId,
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    pub lltv: U256,
}

/// Immutable snapshot; every change produces a new value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    pub block: BlockRef,
    /// Tracked addresses in insertion order, no duplicates
    pub users: Vec<Address>,
    pub tokens: BTreeMap<Address, TokenInfo>,
    /// user -> token -> holding
    pub holdings: BTreeMap<Address, BTreeMap<Address, Holding>>,
    pub vaults: BTreeMap<Address, VaultState>,
    pub markets: BTreeMap<MarketId, MarketParams>,
}

impl SimulationState {
    pub fn vault(&self, vault: Address) -> Result<&VaultState, VaultError> {
        self.vaults.get(&vault).ok_or_else(|| VaultError::VaultNotLoaded {
            vault,
            loaded: if self.vaults.is_empty() {
                "none".to_string()
            } else {
                self.vaults.keys().map(|v| format!("{:?}", v)).collect::<Vec<_>>().join(", ")
            },
        })
    }

    pub fn holding(&self, user: Address, token: Address) -> Result<&Holding, VaultError> {
        self.holdings
            .get(&user)
            .and_then(|by_token| by_token.get(&token))
            .ok_or(VaultError::UnknownHolding { user, token })
    }

    pub fn token(&self, token: Address) -> Option<&TokenInfo> {
        self.tokens.get(&token)
    }

    pub fn is_tracked(&self, user: Address) -> bool {
        self.users.contains(&user)
    }

    pub fn require_tracked(&self, user: Address) -> Result<(), VaultError> {
        if self.is_tracked(user) {
            Ok(())
        } else {
            Err(VaultError::UntrackedUser(user))
        }
    }

    pub fn native_balance(&self, user: Address) -> U256 {
        self.holding(user, NATIVE_ADDRESS).map(|h| h.balance).unwrap_or_default()
    }

    /// New snapshot with `user`'s native holding replaced by `balance`.
    ///
    /// Allowances, nonce and transferability of an existing native holding are
    /// carried over. No other account is touched.
    pub fn with_native_balance(&self, user: Address, balance: U256) -> SimulationState {
        let mut next = self.clone();
        let by_token = next.holdings.entry(user).or_default();
        let holding = match by_token.get(&NATIVE_ADDRESS) {
            Some(existing) => Holding { balance, ..existing.clone() },
            None => Holding::new(user, NATIVE_ADDRESS, balance),
        };
        by_token.insert(NATIVE_ADDRESS, holding);
        next
    }
}
