//! Bundle type definitions

use ethers::types::{Address, Signature, H256, U256};
use serde::{Deserialize, Serialize};

use crate::abi::{self, BundlerCall};
use crate::error::VaultError;
use crate::types::{TxRequest, GAS_RESERVE_WEI};

/// Seconds a permit signature stays valid past the snapshot block
pub const PERMIT_VALIDITY_SECS: u64 = 3_600;

/// One step of a vault action, before calldata is composed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BundleOperation {
    /// Wrap native currency into the wrapped native token through the adapter
    WrapNative { sender: Address, amount: U256 },

    /// The adapter needs `amount` of `token` pulled from `sender`
    ApproveToken {
        sender: Address,
        token: Address,
        spender: Address,
        amount: U256,
    },

    /// Deposit `assets` into `vault`, shares minted to `sender`
    Deposit {
        sender: Address,
        vault: Address,
        assets: U256,
        /// WAD-scaled
        slippage: U256,
    },

    /// Redeem `shares` of `vault`, assets sent to `sender`
    Withdraw {
        sender: Address,
        vault: Address,
        shares: U256,
        /// WAD-scaled
        slippage: U256,
    },
}

impl BundleOperation {
    pub fn sender(&self) -> Address {
        match self {
            BundleOperation::WrapNative { sender, .. }
            | BundleOperation::ApproveToken { sender, .. }
            | BundleOperation::Deposit { sender, .. }
            | BundleOperation::Withdraw { sender, .. } => *sender,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BundleOperation::WrapNative { .. } => "wrap_native",
            BundleOperation::ApproveToken { .. } => "approve_token",
            BundleOperation::Deposit { .. } => "deposit",
            BundleOperation::Withdraw { .. } => "withdraw",
        }
    }
}

/// An EIP-2612 permit the user signs off-chain; consumed inside the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequirement {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub domain_separator: H256,
}

impl SignatureRequirement {
    pub fn digest(&self) -> H256 {
        abi::permit_digest(self.domain_separator, self.owner, self.spender, self.amount, self.nonce, self.deadline)
    }

    fn permit_call(&self, signature: &Signature) -> BundlerCall {
        let data = abi::permit(self.owner, self.spender, self.amount, self.deadline, signature);
        BundlerCall::new(self.token, data).skipping_revert()
    }
}

/// A standalone transaction that must be mined before the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteTx {
    /// Token being approved
    pub token: Address,

    /// Spender receiving the allowance
    pub spender: Address,

    pub amount: U256,

    /// `approve(spender, amount)` on `token`
    pub tx: TxRequest,
}

/// A planned vault action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundler multicall entry point
    pub bundler: Address,

    /// Ordered operations, allowance requirements first
    pub operations: Vec<BundleOperation>,

    /// Off-chain signatures required, in signing order
    pub signatures: Vec<SignatureRequirement>,

    /// Approval transactions to send before the bundle
    pub prerequisites: Vec<PrerequisiteTx>,

    /// Adapter calls executed by the multicall, permits excluded
    pub calls: Vec<BundlerCall>,

    /// Native value attached to the multicall
    pub value: U256,
}

impl Bundle {
    /// Total progress steps: one per signature, one per prerequisite, one final
    pub fn total_steps(&self) -> usize {
        self.signatures.len() + self.prerequisites.len() + 1
    }

    /// Compose the final multicall.
    ///
    /// `signatures` must line up with `self.signatures`; permit calls are
    /// placed ahead of every adapter call.
    pub fn tx(&self, signatures: &[Signature]) -> Result<TxRequest, VaultError> {
        if signatures.len() < self.signatures.len() {
            return Err(VaultError::MissingSignature {
                required: self.signatures.len(),
                provided: signatures.len(),
            });
        }

        let mut calls: Vec<BundlerCall> = self
            .signatures
            .iter()
            .zip(signatures)
            .map(|(requirement, signature)| requirement.permit_call(signature))
            .collect();
        calls.extend(self.calls.iter().cloned());

        Ok(TxRequest { to: self.bundler, data: abi::multicall(calls), value: self.value })
    }
}

/// Knobs for how requirements are satisfied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlingOptions {
    /// Satisfy allowances with EIP-2612 permits where the token allows it
    pub supports_signature: bool,

    /// Native currency never wrapped, kept for gas
    pub gas_reserve: U256,
}

impl Default for BundlingOptions {
    fn default() -> Self {
        Self { supports_signature: false, gas_reserve: GAS_RESERVE_WEI }
    }
}
