//! In-memory chain and wallet used across unit and integration tests

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Filter, Log, Signature, H256, U256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::abi;
use crate::chain::{ChainClient, WalletSigner};
use crate::error::VaultError;
use crate::simulation::{Holding, MarketParams, SimulationState, TokenInfo, VaultState};
use crate::types::{BlockRef, ChainAddresses, TxReceipt, TxRequest, BASE_WETH_ADDRESS, NATIVE_ADDRESS};

pub const DEFAULT_GAS: u64 = 350_000;

#[derive(Default)]
struct MockState {
    native: HashMap<Address, U256>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    decimals: HashMap<Address, u8>,
    domain_separators: HashMap<Address, H256>,
    vault_assets: HashMap<Address, Address>,
    totals: HashMap<Address, (U256, U256)>,
    queue_lengths: HashMap<Address, usize>,
    markets: HashMap<H256, (Address, Address, Address, Address, U256)>,
    failing_targets: HashSet<Address>,
    fail_conversions: bool,
    estimates: VecDeque<Result<U256, String>>,
    reverted: HashSet<H256>,
    logs: Vec<Log>,
    journal: Vec<String>,
    clock_offset: u64,
}

/// Scriptable [`ChainClient`]; the signer writes into the same journal
#[derive(Default)]
pub struct MockChain {
    inner: Mutex<MockState>,
    block_reads: AtomicUsize,
    estimate_calls: AtomicUsize,
}

fn word(data: &[u8], index: usize) -> &[u8] {
    let start = 4 + 32 * index;
    &data[start..start + 32]
}

fn arg_address(data: &[u8], index: usize) -> Address {
    Address::from_slice(&word(data, index)[12..])
}

fn arg_uint(data: &[u8], index: usize) -> U256 {
    U256::from_big_endian(word(data, index))
}

pub fn queue_entry(index: usize) -> H256 {
    H256::from_low_u64_be(index as u64 + 1)
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    pub fn set_native_balance(&self, owner: Address, balance: U256) {
        self.state().native.insert(owner, balance);
    }

    pub fn set_erc20_balance(&self, token: Address, owner: Address, balance: U256) {
        self.state().balances.insert((token, owner), balance);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state().allowances.insert((token, owner, spender), amount);
    }

    pub fn add_token(&self, token: Address, decimals: u8, domain_separator: Option<H256>) {
        let mut state = self.state();
        state.decimals.insert(token, decimals);
        if let Some(domain) = domain_separator {
            state.domain_separators.insert(token, domain);
        }
    }

    pub fn add_vault(&self, vault: Address, asset: Address, total_assets: U256, total_supply: U256) {
        let mut state = self.state();
        state.vault_assets.insert(vault, asset);
        state.totals.insert(vault, (total_assets, total_supply));
    }

    pub fn set_queue_length(&self, vault: Address, len: usize) {
        self.state().queue_lengths.insert(vault, len);
    }

    pub fn add_market(&self, id: H256, loan_token: Address, collateral_token: Address) {
        self.state().markets.insert(
            id,
            (loan_token, collateral_token, Address::repeat_byte(0x0e), Address::repeat_byte(0x0f), U256::exp10(17) * 8),
        );
    }

    pub fn fail_reads_to(&self, target: Address) {
        self.state().failing_targets.insert(target);
    }

    pub fn fail_conversions(&self) {
        self.state().fail_conversions = true;
    }

    /// Queue estimate outcomes; once drained every estimate succeeds with `DEFAULT_GAS`
    pub fn script_estimates(&self, outcomes: Vec<Result<u64, &str>>) {
        let mut state = self.state();
        for outcome in outcomes {
            state.estimates.push_back(outcome.map(U256::from).map_err(str::to_string));
        }
    }

    /// Move the reported block timestamp forward
    pub fn advance_clock(&self, secs: u64) {
        self.state().clock_offset += secs;
    }

    pub fn mark_reverted(&self, hash: H256) {
        self.state().reverted.insert(hash);
    }

    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.state().journal.push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn block_reads(&self) -> usize {
        self.block_reads.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    fn revert() -> VaultError {
        VaultError::Rpc("execution reverted".to_string())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes, VaultError> {
        let state = self.state();
        if state.failing_targets.contains(&to) {
            return Err(VaultError::Rpc(format!("connection reset reading {:?}", to)));
        }

        let selector = abi::selector(&data).ok_or_else(Self::revert)?;
        let is = |call: Bytes| abi::selector(&call) == Some(selector);

        if is(abi::balance_of(Address::zero())) {
            let owner = arg_address(&data, 0);
            return Ok(abi::encode_uint(state.balances.get(&(to, owner)).copied().unwrap_or_default()));
        }
        if is(abi::allowance(Address::zero(), Address::zero())) {
            let key = (to, arg_address(&data, 0), arg_address(&data, 1));
            return Ok(abi::encode_uint(state.allowances.get(&key).copied().unwrap_or_default()));
        }
        if is(abi::decimals()) {
            let decimals = state.decimals.get(&to).ok_or_else(Self::revert)?;
            return Ok(abi::encode_uint(U256::from(*decimals)));
        }
        if is(abi::nonces(Address::zero())) {
            if !state.domain_separators.contains_key(&to) {
                return Err(Self::revert());
            }
            return Ok(abi::encode_uint(U256::zero()));
        }
        if is(abi::domain_separator()) {
            let domain = state.domain_separators.get(&to).ok_or_else(Self::revert)?;
            return Ok(abi::encode_bytes32(*domain));
        }
        if is(abi::asset()) {
            let asset = state.vault_assets.get(&to).ok_or_else(Self::revert)?;
            return Ok(abi::encode_address(*asset));
        }
        if is(abi::total_assets()) || is(abi::total_supply()) {
            let (assets, supply) = state.totals.get(&to).copied().ok_or_else(Self::revert)?;
            let value = if is(abi::total_assets()) { assets } else { supply };
            return Ok(abi::encode_uint(value));
        }
        if is(abi::convert_to_shares(U256::zero())) {
            if state.fail_conversions {
                return Err(Self::revert());
            }
            let (assets, supply) = state.totals.get(&to).copied().ok_or_else(Self::revert)?;
            return Ok(abi::encode_uint(arg_uint(&data, 0) * supply / assets));
        }
        if is(abi::withdraw_queue_length()) {
            let len = state.queue_lengths.get(&to).copied().unwrap_or_default();
            return Ok(abi::encode_uint(U256::from(len)));
        }
        if is(abi::withdraw_queue(0)) {
            return Ok(abi::encode_bytes32(queue_entry(arg_uint(&data, 0).as_usize())));
        }
        if is(abi::id_to_market_params(H256::zero())) {
            let id = H256::from_slice(word(&data, 0));
            let (loan, collateral, oracle, irm, lltv) = state.markets.get(&id).copied().unwrap_or_default();
            return Ok(Bytes::from(ethers::abi::encode(&[
                Token::Address(loan),
                Token::Address(collateral),
                Token::Address(oracle),
                Token::Address(irm),
                Token::Uint(lltv),
            ])));
        }
        Err(Self::revert())
    }

    async fn native_balance(&self, account: Address) -> Result<U256, VaultError> {
        Ok(self.state().native.get(&account).copied().unwrap_or_default())
    }

    async fn block_ref(&self) -> Result<BlockRef, VaultError> {
        self.block_reads.fetch_add(1, Ordering::SeqCst);
        let timestamp = 1_700_000_000 + self.state().clock_offset;
        Ok(BlockRef { number: 100, timestamp })
    }

    async fn estimate_gas(&self, _from: Address, _tx: &TxRequest) -> Result<U256, VaultError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.journal.push("estimate".to_string());
        match state.estimates.pop_front() {
            Some(Ok(gas)) => Ok(gas),
            Some(Err(message)) => Err(VaultError::GasEstimation(message)),
            None => Ok(U256::from(DEFAULT_GAS)),
        }
    }

    async fn wait_for_transaction_receipt(&self, hash: H256) -> Result<TxReceipt, VaultError> {
        let mut state = self.state();
        state.journal.push("receipt".to_string());
        Ok(TxReceipt {
            transaction_hash: hash,
            block_number: Some(101),
            success: !state.reverted.contains(&hash),
            gas_used: Some(U256::from(46_000u64)),
        })
    }

    async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>, VaultError> {
        Ok(self.state().logs.clone())
    }
}

/// Wallet that signs with a fixed signature and applies approvals to the mock chain
pub struct MockSigner {
    address: Address,
    chain: Arc<MockChain>,
    reject_signing: bool,
    reject_sending: bool,
    sent: Mutex<Vec<(TxRequest, Option<U256>)>>,
    next_hash: AtomicUsize,
}

impl MockSigner {
    pub fn new(address: Address, chain: Arc<MockChain>) -> Self {
        Self {
            address,
            chain,
            reject_signing: false,
            reject_sending: false,
            sent: Mutex::new(Vec::new()),
            next_hash: AtomicUsize::new(1),
        }
    }

    pub fn rejecting_signatures(mut self) -> Self {
        self.reject_signing = true;
        self
    }

    pub fn rejecting_transactions(mut self) -> Self {
        self.reject_sending = true;
        self
    }

    pub fn sent(&self) -> Vec<(TxRequest, Option<U256>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Hash the n-th submitted transaction (1-based) will receive
    pub fn hash_for(n: usize) -> H256 {
        H256::from_low_u64_be(0xa000 + n as u64)
    }
}

#[async_trait]
impl WalletSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, _digest: H256) -> Result<Signature, VaultError> {
        self.chain.record("sign");
        if self.reject_signing {
            return Err(VaultError::UserRejected("User rejected the request.".to_string()));
        }
        Ok(Signature { r: U256::one(), s: U256::from(2u64), v: 27 })
    }

    async fn send_transaction(&self, tx: &TxRequest, gas: Option<U256>) -> Result<H256, VaultError> {
        if self.reject_sending {
            return Err(VaultError::UserRejected("User denied transaction signature.".to_string()));
        }

        let is_approval = abi::selector(&tx.data) == abi::selector(&abi::approve(Address::zero(), U256::zero()));
        if is_approval {
            self.chain.record("approve");
            self.chain.set_allowance(tx.to, self.address, arg_address(&tx.data, 0), arg_uint(&tx.data, 1));
        } else {
            self.chain.record("send_bundle");
        }

        self.sent.lock().unwrap().push((tx.clone(), gas));
        Ok(Self::hash_for(self.next_hash.fetch_add(1, Ordering::SeqCst)))
    }
}

/// A user holding assets and shares in one vault, with matching chain and snapshot
#[derive(Debug, Clone)]
pub struct VaultFixture {
    pub user: Address,
    pub vault: Address,
    pub asset: Address,
    pub asset_decimals: u8,
    pub vault_decimals: u8,
    pub asset_balance: U256,
    pub native_balance: U256,
    pub share_balance: U256,
    pub total_assets: U256,
    pub total_supply: U256,
    pub asset_domain: Option<H256>,
}

impl VaultFixture {
    /// 6-decimal asset with permit support, 500 held
    pub fn usdc() -> Self {
        Self {
            user: Address::repeat_byte(0x11),
            vault: Address::repeat_byte(0x22),
            asset: Address::repeat_byte(0x33),
            asset_decimals: 6,
            vault_decimals: 18,
            asset_balance: U256::from(500_000_000u64),
            native_balance: U256::exp10(18),
            share_balance: U256::exp10(20),
            total_assets: U256::from(1_000_000u64) * U256::exp10(6),
            total_supply: U256::from(1_000_000u64) * U256::exp10(18),
            asset_domain: Some(H256::repeat_byte(0xd0)),
        }
    }

    /// Wrapped-native vault; 0.5 wrapped and 1 native held
    pub fn weth() -> Self {
        Self {
            user: Address::repeat_byte(0x11),
            vault: Address::repeat_byte(0x44),
            asset: BASE_WETH_ADDRESS,
            asset_decimals: 18,
            vault_decimals: 18,
            asset_balance: U256::from(500_000_000_000_000_000u64),
            native_balance: U256::exp10(18),
            share_balance: U256::exp10(18),
            total_assets: U256::from(1_000u64) * U256::exp10(18),
            total_supply: U256::from(1_000u64) * U256::exp10(18),
            asset_domain: None,
        }
    }

    pub fn vault_domain(&self) -> H256 {
        H256::repeat_byte(0xd1)
    }

    pub fn market_id(&self) -> H256 {
        queue_entry(0)
    }

    pub fn chain(&self) -> MockChain {
        let chain = MockChain::new();
        let addresses = ChainAddresses::base();

        chain.add_token(self.asset, self.asset_decimals, self.asset_domain);
        chain.add_token(self.vault, self.vault_decimals, Some(self.vault_domain()));
        if self.asset != addresses.wrapped_native {
            chain.add_token(addresses.wrapped_native, 18, None);
        }
        chain.add_token(Address::repeat_byte(0x55), 18, None);

        chain.add_vault(self.vault, self.asset, self.total_assets, self.total_supply);
        chain.set_queue_length(self.vault, 2);
        chain.add_market(self.market_id(), self.asset, Address::repeat_byte(0x55));

        chain.set_native_balance(self.user, self.native_balance);
        chain.set_erc20_balance(self.asset, self.user, self.asset_balance);
        chain.set_erc20_balance(self.vault, self.user, self.share_balance);
        chain
    }

    /// Snapshot equivalent to what the provider reads for `user`
    pub fn state(&self) -> SimulationState {
        let addresses = ChainAddresses::base();
        let mut state = SimulationState {
            block: BlockRef { number: 100, timestamp: 1_700_000_000 },
            users: vec![self.user, addresses.bundler, addresses.general_adapter, self.vault],
            ..SimulationState::default()
        };

        let tokens = [
            TokenInfo { address: NATIVE_ADDRESS, decimals: 18, domain_separator: None },
            TokenInfo { address: self.asset, decimals: self.asset_decimals, domain_separator: self.asset_domain },
            TokenInfo { address: self.vault, decimals: self.vault_decimals, domain_separator: Some(self.vault_domain()) },
            TokenInfo { address: addresses.wrapped_native, decimals: 18, domain_separator: None },
        ];
        for token in tokens {
            state.tokens.insert(token.address, token);
        }

        let mut holdings = BTreeMap::new();
        holdings.insert(NATIVE_ADDRESS, Holding::new(self.user, NATIVE_ADDRESS, self.native_balance));
        let mut asset = Holding::new(self.user, self.asset, self.asset_balance);
        asset.erc20_allowances.insert(addresses.general_adapter, U256::zero());
        if self.asset_domain.is_some() {
            asset.erc2612_nonce = Some(U256::zero());
        }
        holdings.insert(self.asset, asset);
        let mut shares = Holding::new(self.user, self.vault, self.share_balance);
        shares.erc20_allowances.insert(addresses.general_adapter, U256::zero());
        shares.erc2612_nonce = Some(U256::zero());
        holdings.insert(self.vault, shares);
        holdings
            .entry(addresses.wrapped_native)
            .or_insert_with(|| Holding::new(self.user, addresses.wrapped_native, U256::zero()));
        state.holdings.insert(self.user, holdings);

        state.vaults.insert(
            self.vault,
            VaultState {
                address: self.vault,
                asset: self.asset,
                asset_decimals: self.asset_decimals,
                decimals_offset: self.vault_decimals - self.asset_decimals,
                total_assets: self.total_assets,
                total_supply: self.total_supply,
                withdraw_queue: vec![queue_entry(0), queue_entry(1)],
            },
        );
        state.markets.insert(
            self.market_id(),
            MarketParams {
                id: self.market_id(),
                loan_token: self.asset,
                collateral_token: Address::repeat_byte(0x55),
                oracle: Address::repeat_byte(0x0e),
                irm: Address::repeat_byte(0x0f),
                lltv: U256::exp10(17) * 8,
            },
        );
        state
    }
}
