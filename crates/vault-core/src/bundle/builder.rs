//! Turns a user intent and a simulation snapshot into an ordered bundle

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::types::{
    Bundle, BundleOperation, BundlingOptions, PrerequisiteTx, SignatureRequirement, PERMIT_VALIDITY_SECS,
};
use crate::abi::{self, BundlerCall};
use crate::amount::parse_units;
use crate::chain::ChainClient;
use crate::error::VaultError;
use crate::simulation::{mul_div, Rounding, SimulationState, VaultState};
use crate::types::{ChainAddresses, TxRequest, VaultAction, VaultIntent, DEFAULT_SLIPPAGE_TOLERANCE, WAD};

/// 1e9, WAD to RAY
const WAD_TO_RAY: U256 = U256([1_000_000_000, 0, 0, 0]);

/// Bundle builder for vault actions
pub struct BundleBuilder<C: ChainClient + ?Sized> {
    chain: Arc<C>,
    addresses: ChainAddresses,
    options: BundlingOptions,
}

impl<C: ChainClient + ?Sized> BundleBuilder<C> {
    pub fn new(chain: Arc<C>, addresses: ChainAddresses, options: BundlingOptions) -> Self {
        Self { chain, addresses, options }
    }

    pub fn options(&self) -> &BundlingOptions {
        &self.options
    }

    /// Resolve and plan in one go
    pub async fn plan(
        &self,
        intent: &VaultIntent,
        state: &SimulationState,
        user: Address,
    ) -> Result<Bundle, VaultError> {
        let operations = self.resolve_operations(intent, state, user).await?;
        self.plan_operations(&operations, state, user)
    }

    /// Translate an intent into input operations.
    ///
    /// Balance checks run against `state`; share amounts for withdrawals are
    /// read live from the vault.
    #[instrument(skip(self, state), fields(action = %intent.action, vault = ?intent.vault))]
    pub async fn resolve_operations(
        &self,
        intent: &VaultIntent,
        state: &SimulationState,
        user: Address,
    ) -> Result<Vec<BundleOperation>, VaultError> {
        let vault = state.vault(intent.vault)?;
        state.require_tracked(user)?;

        match intent.action {
            VaultAction::Deposit => {
                let assets = self.parse_positive(intent, vault.asset_decimals)?;
                self.resolve_deposit(vault, state, user, assets)
            }
            VaultAction::WithdrawAll => {
                let shares = self.chain.erc20_balance(vault.address, user).await?;
                if shares.is_zero() {
                    return Err(VaultError::NoSharesToWithdraw);
                }
                debug!(shares = %shares, "Withdrawing full share balance");
                Ok(vec![BundleOperation::Withdraw {
                    sender: user,
                    vault: vault.address,
                    shares,
                    slippage: DEFAULT_SLIPPAGE_TOLERANCE,
                }])
            }
            VaultAction::Withdraw => {
                let assets = self.parse_positive(intent, vault.asset_decimals)?;
                let shares = self
                    .chain
                    .convert_to_shares(vault.address, assets)
                    .await
                    .map_err(|e| VaultError::ConversionFailed(e.to_string()))?;
                if shares.is_zero() {
                    return Err(VaultError::ConversionFailed(format!("{} assets convert to zero shares", assets)));
                }
                let available = state.holding(user, vault.address)?.balance;
                if shares > available {
                    return Err(VaultError::InsufficientBalance {
                        requested: shares,
                        available,
                        decimals: vault.asset_decimals.saturating_add(vault.decimals_offset),
                    });
                }
                Ok(vec![BundleOperation::Withdraw {
                    sender: user,
                    vault: vault.address,
                    shares,
                    slippage: DEFAULT_SLIPPAGE_TOLERANCE,
                }])
            }
        }
    }

    fn parse_positive(&self, intent: &VaultIntent, decimals: u8) -> Result<U256, VaultError> {
        let raw = intent.amount.as_deref().unwrap_or("");
        let amount = parse_units(raw, decimals)?;
        if amount.is_zero() {
            return Err(VaultError::InvalidAmount("amount must be greater than zero".to_string()));
        }
        Ok(amount)
    }

    fn resolve_deposit(
        &self,
        vault: &VaultState,
        state: &SimulationState,
        user: Address,
        requested: U256,
    ) -> Result<Vec<BundleOperation>, VaultError> {
        let existing = state.holding(user, vault.asset)?.balance;
        let deposit = BundleOperation::Deposit {
            sender: user,
            vault: vault.address,
            assets: requested,
            slippage: DEFAULT_SLIPPAGE_TOLERANCE,
        };

        if vault.asset != self.addresses.wrapped_native {
            if requested > existing {
                return Err(VaultError::InsufficientBalance {
                    requested,
                    available: existing,
                    decimals: vault.asset_decimals,
                });
            }
            return Ok(vec![deposit]);
        }

        let native = state.native_balance(user);
        let available = existing.saturating_add(native);
        if requested > available {
            return Err(VaultError::InsufficientBalance { requested, available, decimals: vault.asset_decimals });
        }

        let wrappable = native.saturating_sub(self.options.gas_reserve);
        if requested > existing.saturating_add(wrappable) {
            return Err(VaultError::InsufficientGasReserve {
                requested,
                existing_wrapped: existing,
                wrappable,
                reserve: self.options.gas_reserve,
            });
        }

        let wrap = requested.saturating_sub(existing);
        let mut operations = Vec::with_capacity(2);
        if !wrap.is_zero() {
            debug!(wrap = %wrap, existing = %existing, "Wrapping native balance for deposit");
            operations.push(BundleOperation::WrapNative { sender: user, amount: wrap });
        }
        operations.push(deposit);
        Ok(operations)
    }

    /// Compose a bundle from input operations against `state`.
    ///
    /// Pure: the same operations and snapshot always yield an equal bundle,
    /// and planning a bundle's own `operations` again reproduces it.
    pub fn plan_operations(
        &self,
        operations: &[BundleOperation],
        state: &SimulationState,
        user: Address,
    ) -> Result<Bundle, VaultError> {
        let adapter = self.addresses.general_adapter;
        state.require_tracked(user)?;
        state.require_tracked(adapter)?;

        let mut requirements = AllowanceRequirements::default();
        let mut actions = Vec::new();
        let mut calls = Vec::new();
        let mut value = U256::zero();
        let mut wrapped = U256::zero();

        for operation in operations {
            state.require_tracked(operation.sender())?;
            match operation {
                BundleOperation::ApproveToken { sender, token, amount, .. } => {
                    requirements.require(*sender, *token, *amount);
                }
                BundleOperation::WrapNative { amount, .. } => {
                    // wrapNative is not payable: fund the adapter first, then wrap what it holds
                    calls.push(BundlerCall::new(adapter, Bytes::new()).with_value(*amount));
                    calls.push(BundlerCall::new(adapter, abi::wrap_native(*amount, adapter)));
                    value = value.saturating_add(*amount);
                    wrapped = wrapped.saturating_add(*amount);
                    actions.push(operation.clone());
                }
                BundleOperation::Deposit { sender, vault, assets, slippage } => {
                    let vault_state = state.vault(*vault)?;
                    let from_wallet = if vault_state.asset == self.addresses.wrapped_native {
                        let used = wrapped.min(*assets);
                        wrapped -= used;
                        *assets - used
                    } else {
                        *assets
                    };
                    if !from_wallet.is_zero() {
                        requirements.require(*sender, vault_state.asset, from_wallet);
                        calls.push(BundlerCall::new(
                            adapter,
                            abi::erc20_transfer_from(vault_state.asset, adapter, from_wallet),
                        ));
                    }
                    let max_share_price = max_share_price(vault_state, *assets, *slippage)?;
                    calls.push(BundlerCall::new(
                        adapter,
                        abi::erc4626_deposit(*vault, *assets, max_share_price, *sender),
                    ));
                    actions.push(operation.clone());
                }
                BundleOperation::Withdraw { sender, vault, shares, slippage } => {
                    let vault_state = state.vault(*vault)?;
                    requirements.require(*sender, *vault, *shares);
                    let min_share_price = min_share_price(vault_state, *shares, *slippage);
                    calls.push(BundlerCall::new(
                        adapter,
                        abi::erc4626_redeem(*vault, *shares, min_share_price, *sender, *sender),
                    ));
                    actions.push(operation.clone());
                }
            }
        }

        let mut bundle = Bundle {
            bundler: self.addresses.bundler,
            operations: Vec::new(),
            signatures: Vec::new(),
            prerequisites: Vec::new(),
            calls,
            value,
        };

        for (owner, token, amount) in requirements.into_inner() {
            bundle.operations.push(BundleOperation::ApproveToken { sender: owner, token, spender: adapter, amount });

            let holding = state.holding(owner, token)?;
            if holding.allowance(adapter) >= amount {
                continue;
            }

            let permit = match (self.options.supports_signature, state.token(token), holding.erc2612_nonce) {
                (true, Some(info), Some(nonce)) => info.domain_separator.map(|domain_separator| {
                    SignatureRequirement {
                        token,
                        owner,
                        spender: adapter,
                        amount,
                        nonce,
                        deadline: U256::from(state.block.timestamp.saturating_add(PERMIT_VALIDITY_SECS)),
                        domain_separator,
                    }
                }),
                _ => None,
            };

            match permit {
                Some(requirement) => bundle.signatures.push(requirement),
                None => bundle.prerequisites.push(PrerequisiteTx {
                    token,
                    spender: adapter,
                    amount,
                    tx: TxRequest { to: token, data: abi::approve(adapter, amount), value: U256::zero() },
                }),
            }
        }
        bundle.operations.extend(actions);

        debug!(
            operations = bundle.operations.len(),
            signatures = bundle.signatures.len(),
            prerequisites = bundle.prerequisites.len(),
            value = %bundle.value,
            "Planned bundle"
        );
        Ok(bundle)
    }
}

/// (owner, token) -> amount, in first-seen order; repeated needs keep the larger amount
#[derive(Default)]
struct AllowanceRequirements(Vec<(Address, Address, U256)>);

impl AllowanceRequirements {
    fn require(&mut self, owner: Address, token: Address, amount: U256) {
        match self.0.iter_mut().find(|(o, t, _)| *o == owner && *t == token) {
            Some(entry) => entry.2 = entry.2.max(amount),
            None => self.0.push((owner, token, amount)),
        }
    }

    fn into_inner(self) -> Vec<(Address, Address, U256)> {
        self.0
    }
}

/// Highest acceptable assets-per-share for a deposit, RAY-scaled
fn max_share_price(vault: &VaultState, assets: U256, slippage: U256) -> Result<U256, VaultError> {
    let shares = vault.to_shares(assets, Rounding::Down);
    if shares.is_zero() {
        return Err(VaultError::InvalidAmount("amount too small to mint any shares".to_string()));
    }
    Ok(mul_div(assets, WAD.saturating_add(slippage).saturating_mul(WAD_TO_RAY), shares, Rounding::Up))
}

/// Lowest acceptable assets-per-share for a redemption, RAY-scaled
fn min_share_price(vault: &VaultState, shares: U256, slippage: U256) -> U256 {
    let assets = vault.to_assets(shares, Rounding::Down);
    mul_div(assets, WAD.saturating_sub(slippage).saturating_mul(WAD_TO_RAY), shares, Rounding::Down)
}
