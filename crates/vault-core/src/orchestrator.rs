//! Executes a planned bundle: signatures, approvals, estimation, submission

use ethers::types::{Address, Signature, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::bundle::{Bundle, BundleBuilder, BundleOperation, BundlingOptions, SignatureRequirement};
use crate::chain::{ChainClient, WalletSession, WalletSigner};
use crate::error::VaultError;
use crate::metrics::{OrchestratorMetrics, PhaseTimer};
use crate::progress::{step_label, ProgressCallback, ProgressStep};
use crate::simulation::{SimulationState, SimulationStateProvider, SimulationStatus};
use crate::types::{TxReceipt, TxRequest, VaultIntent};

pub const DEFAULT_APPROVAL_SETTLE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause after each mined approval
    pub approval_settle_delay: Duration,
    /// Pause before re-simulating after a stale-allowance estimate
    pub retry_delay: Duration,
    pub options: BundlingOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approval_settle_delay: DEFAULT_APPROVAL_SETTLE_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            options: BundlingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "index", rename_all = "camelCase")]
pub enum OrchestratorPhase {
    Idle,
    Planning,
    Signing(usize),
    Approving(usize),
    Estimating,
    Confirming,
    Success,
    Error,
}

pub struct TransactionOrchestrator<C: ChainClient + ?Sized> {
    chain: Arc<C>,
    provider: Arc<SimulationStateProvider<C>>,
    builder: BundleBuilder<C>,
    config: OrchestratorConfig,
    phase: Mutex<OrchestratorPhase>,
    metrics: Option<Arc<OrchestratorMetrics>>,
}

impl<C: ChainClient + ?Sized> TransactionOrchestrator<C> {
    pub fn new(provider: Arc<SimulationStateProvider<C>>, config: OrchestratorConfig) -> Self {
        let chain = provider.chain().clone();
        let builder = BundleBuilder::new(chain.clone(), provider.config().addresses, config.options.clone());
        Self { chain, provider, builder, config, phase: Mutex::new(OrchestratorPhase::Idle), metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<OrchestratorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider(&self) -> &Arc<SimulationStateProvider<C>> {
        &self.provider
    }

    pub fn builder(&self) -> &BundleBuilder<C> {
        &self.builder
    }

    pub fn phase(&self) -> OrchestratorPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: OrchestratorPhase) {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = phase;
    }

    /// Run one vault action end to end and return the bundle transaction hash.
    ///
    /// Progress events go to `on_progress` in order. The hash is returned as
    /// soon as the wallet accepts the transaction; use
    /// [`wait_for_confirmation`](Self::wait_for_confirmation) to await mining.
    #[instrument(skip(self, session, on_progress), fields(action = %intent.action, vault = ?intent.vault))]
    pub async fn execute_vault_action(
        &self,
        session: &WalletSession,
        intent: &VaultIntent,
        on_progress: Option<ProgressCallback>,
    ) -> Result<H256, VaultError> {
        let emit = |step: ProgressStep| {
            if let Some(callback) = on_progress.as_ref() {
                callback(step);
            }
        };

        let result = self.run(session, intent, &emit).await;
        let action = intent.action.as_str();
        match &result {
            Ok(_) => {
                self.set_phase(OrchestratorPhase::Success);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_execution(action, "success");
                }
            }
            Err(err) => {
                self.set_phase(OrchestratorPhase::Error);
                if err.is_user_rejection() {
                    info!(error = %err, "Vault action cancelled by user");
                } else {
                    crate::log_action_failed!(action, err);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.inc_execution(action, err.kind());
                }
            }
        }
        result
    }

    async fn run(
        &self,
        session: &WalletSession,
        intent: &VaultIntent,
        emit: &(dyn Fn(ProgressStep) + Send + Sync),
    ) -> Result<H256, VaultError> {
        let user = session.account.ok_or(VaultError::WalletNotConnected)?;
        let signer = session.signer.clone().ok_or(VaultError::SignerUnavailable)?;
        let state = match self.provider.status(intent.vault, user).await {
            SimulationStatus::Ready(state) => state,
            SimulationStatus::Pending => {
                return Err(VaultError::StateNotReady("simulation state is still loading".to_string()))
            }
        };

        self.set_phase(OrchestratorPhase::Planning);
        let (operations, bundle) = {
            let _timer = PhaseTimer::new(self.metrics.as_deref(), "planning");
            let operations = self.builder.resolve_operations(intent, &state, user).await?;
            let bundle = self.builder.plan_operations(&operations, &state, user)?;
            (operations, bundle)
        };

        self.submit_bundle(intent, user, signer.as_ref(), &operations, &bundle, emit).await
    }

    /// Sign, approve, estimate and send an already planned bundle.
    ///
    /// `operations` are the resolved inputs `bundle` was planned from; they are
    /// re-planned against fresh state if the estimate hits a stale allowance.
    pub(crate) async fn submit_bundle(
        &self,
        intent: &VaultIntent,
        user: Address,
        signer: &dyn WalletSigner,
        operations: &[BundleOperation],
        bundle: &Bundle,
        emit: &(dyn Fn(ProgressStep) + Send + Sync),
    ) -> Result<H256, VaultError> {
        let total_steps = bundle.total_steps();
        info!(
            user = ?user,
            signatures = bundle.signatures.len(),
            prerequisites = bundle.prerequisites.len(),
            total_steps,
            "Executing bundle"
        );

        let signatures = self.collect_signatures(bundle, signer, total_steps, emit).await?;
        self.send_prerequisites(bundle, signer, total_steps, emit).await?;
        if !bundle.prerequisites.is_empty() {
            self.provider.invalidate(intent.vault, user).await;
        }

        self.set_phase(OrchestratorPhase::Estimating);
        let (tx, gas) = {
            let _timer = PhaseTimer::new(self.metrics.as_deref(), "estimating");
            self.estimate_with_retry(intent, user, operations, bundle, &signatures).await?
        };

        self.set_phase(OrchestratorPhase::Confirming);
        let step_index = total_steps - 1;
        emit(ProgressStep::Confirming { step_index, total_steps, label: "Confirm".to_string(), tx_hash: None });
        let hash = signer.send_transaction(&tx, Some(gas)).await?;
        crate::log_tx_submitted!("bundle", hash, tx.to);
        emit(ProgressStep::Confirming { step_index, total_steps, label: "Confirm".to_string(), tx_hash: Some(hash) });

        Ok(hash)
    }

    async fn collect_signatures(
        &self,
        bundle: &Bundle,
        signer: &dyn WalletSigner,
        total_steps: usize,
        emit: &(dyn Fn(ProgressStep) + Send + Sync),
    ) -> Result<Vec<Signature>, VaultError> {
        let count = bundle.signatures.len();
        let mut signatures = Vec::with_capacity(count);
        for (i, requirement) in bundle.signatures.iter().enumerate() {
            self.set_phase(OrchestratorPhase::Signing(i));
            emit(ProgressStep::Signing { step_index: i, total_steps, label: step_label("Sign", i, count) });
            let signature = signer.sign_digest(requirement.digest()).await?;
            info!(token = ?requirement.token, step = i, "Permit signed");
            signatures.push(signature);
        }
        Ok(signatures)
    }

    async fn send_prerequisites(
        &self,
        bundle: &Bundle,
        signer: &dyn WalletSigner,
        total_steps: usize,
        emit: &(dyn Fn(ProgressStep) + Send + Sync),
    ) -> Result<(), VaultError> {
        let offset = bundle.signatures.len();
        let count = bundle.prerequisites.len();
        for (i, prerequisite) in bundle.prerequisites.iter().enumerate() {
            let step_index = offset + i;
            let label = step_label("Approve", i, count);
            let contract = prerequisite.tx.to;
            self.set_phase(OrchestratorPhase::Approving(i));

            emit(ProgressStep::Approving {
                step_index,
                total_steps,
                label: label.clone(),
                contract,
                tx_hash: None,
            });
            let hash = signer.send_transaction(&prerequisite.tx, None).await?;
            crate::log_tx_submitted!("approval", hash, contract);
            emit(ProgressStep::Approving { step_index, total_steps, label, contract, tx_hash: Some(hash) });

            let receipt = self.chain.wait_for_transaction_receipt(hash).await?;
            if !receipt.success {
                return Err(VaultError::TransactionReverted(hash));
            }
            info!(token = ?prerequisite.token, amount = %prerequisite.amount, tx_hash = ?hash, "Approval mined");

            tokio::time::sleep(self.config.approval_settle_delay).await;
        }
        Ok(())
    }

    /// Estimate gas for the bundle, re-planning once against fresh state when
    /// the node still reports the pre-approval allowance.
    async fn estimate_with_retry(
        &self,
        intent: &VaultIntent,
        user: Address,
        operations: &[BundleOperation],
        bundle: &Bundle,
        signatures: &[Signature],
    ) -> Result<(TxRequest, U256), VaultError> {
        let tx = bundle.tx(signatures)?;
        let err = match self.chain.estimate_gas(user, &tx).await {
            Ok(gas) => return Ok((tx, gas)),
            Err(err) => err,
        };

        if !(err.is_retryable_stale_state() && !bundle.prerequisites.is_empty()) {
            return Err(err);
        }

        let action = intent.action.as_str();
        warn!(error = %err, delay_ms = self.config.retry_delay.as_millis() as u64, "Stale allowance during estimation, retrying once");
        tokio::time::sleep(self.config.retry_delay).await;

        self.set_phase(OrchestratorPhase::Planning);
        let fresh = self.rebuild_state(intent.vault, user).await?;
        let mut retry_bundle = self.builder.plan_operations(operations, &fresh, user)?;
        retry_bundle.signatures = reuse_signed_permits(&bundle.signatures, &retry_bundle.signatures)?;
        if !retry_bundle.prerequisites.is_empty() {
            warn!(
                prerequisites = retry_bundle.prerequisites.len(),
                "Fresh state still reports missing allowances"
            );
        }

        self.set_phase(OrchestratorPhase::Estimating);
        let tx = retry_bundle.tx(signatures)?;
        match self.chain.estimate_gas(user, &tx).await {
            Ok(gas) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_retry(action, "recovered");
                }
                Ok((tx, gas))
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_retry(action, "failed");
                }
                Err(err)
            }
        }
    }

    /// Build state for the pair through the provider, counting the outcome
    pub async fn build_state(&self, vault: Address, user: Address) -> Result<SimulationStatus, VaultError> {
        let status = self.provider.build(vault, user).await;
        if let Some(metrics) = &self.metrics {
            metrics.inc_state_build(match &status {
                Ok(SimulationStatus::Ready(_)) => "ready",
                Ok(SimulationStatus::Pending) => "pending",
                Err(_) => "error",
            });
        }
        status
    }

    async fn rebuild_state(&self, vault: Address, user: Address) -> Result<Arc<SimulationState>, VaultError> {
        self.provider.invalidate(vault, user).await;
        self.build_state(vault, user)
            .await?
            .ready()
            .ok_or_else(|| VaultError::StateNotReady("state rebuild already in progress".to_string()))
    }

    /// Await the bundle receipt and drop the now-stale snapshot
    pub async fn wait_for_confirmation(
        &self,
        hash: H256,
        vault: Address,
        user: Address,
    ) -> Result<TxReceipt, VaultError> {
        let receipt = self.chain.wait_for_transaction_receipt(hash).await;
        self.provider.invalidate(vault, user).await;
        let receipt = receipt?;
        if !receipt.success {
            return Err(VaultError::TransactionReverted(hash));
        }
        info!(tx_hash = ?hash, block = ?receipt.block_number, "Vault action confirmed");
        Ok(receipt)
    }
}

/// Keep the permits already signed when a re-plan asks for the same ones.
///
/// Deadlines are derived from the block the plan was built on, so a fresh plan
/// carries new deadlines; every other field must match.
fn reuse_signed_permits(
    signed: &[SignatureRequirement],
    fresh: &[SignatureRequirement],
) -> Result<Vec<SignatureRequirement>, VaultError> {
    let same = signed.len() == fresh.len()
        && signed
            .iter()
            .zip(fresh)
            .all(|(old, new)| SignatureRequirement { deadline: old.deadline, ..new.clone() } == *old);
    if !same {
        return Err(VaultError::PermitMismatch);
    }
    Ok(signed.to_vec())
}
