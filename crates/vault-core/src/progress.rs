//! Progress events emitted while executing a bundle, and the presentation state they drive

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::VaultError;
use crate::types::VaultAction;

/// Receives every progress event, in order, synchronously
pub type ProgressCallback = Arc<dyn Fn(ProgressStep) + Send + Sync>;

/// One progress notification. A `tx_hash` of `None` means not yet submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressStep {
    Signing {
        step_index: usize,
        total_steps: usize,
        label: String,
    },
    Approving {
        step_index: usize,
        total_steps: usize,
        label: String,
        contract: Address,
        tx_hash: Option<H256>,
    },
    Confirming {
        step_index: usize,
        total_steps: usize,
        label: String,
        tx_hash: Option<H256>,
    },
}

impl ProgressStep {
    pub fn step_index(&self) -> usize {
        match self {
            ProgressStep::Signing { step_index, .. }
            | ProgressStep::Approving { step_index, .. }
            | ProgressStep::Confirming { step_index, .. } => *step_index,
        }
    }

    pub fn total_steps(&self) -> usize {
        match self {
            ProgressStep::Signing { total_steps, .. }
            | ProgressStep::Approving { total_steps, .. }
            | ProgressStep::Confirming { total_steps, .. } => *total_steps,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ProgressStep::Signing { label, .. }
            | ProgressStep::Approving { label, .. }
            | ProgressStep::Confirming { label, .. } => label,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            ProgressStep::Signing { .. } => None,
            ProgressStep::Approving { tx_hash, .. } | ProgressStep::Confirming { tx_hash, .. } => *tx_hash,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            ProgressStep::Signing { .. } => TransactionStatus::Signing,
            ProgressStep::Approving { .. } => TransactionStatus::Approving,
            ProgressStep::Confirming { .. } => TransactionStatus::Confirming,
        }
    }

    /// Short human-readable line, e.g. `Approving... (2/3)`
    pub fn status_message(&self) -> String {
        let position = format!("({}/{})", self.step_index() + 1, self.total_steps());
        match self {
            ProgressStep::Signing { .. } => format!("Signing transaction... {}", position),
            ProgressStep::Approving { .. } => format!("Approving... {}", position),
            ProgressStep::Confirming { tx_hash: None, .. } => "Confirm in wallet...".to_string(),
            ProgressStep::Confirming { tx_hash: Some(_), .. } => "Confirming transaction...".to_string(),
        }
    }
}

/// Step label: `base` alone for a single step, `base i/n` otherwise
pub fn step_label(base: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("{} {}/{}", base, index + 1, count)
    } else {
        base.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Preview,
    Signing,
    Approving,
    Confirming,
    Success,
    Error,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransactionStatus::Signing | TransactionStatus::Approving | TransactionStatus::Confirming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Error | TransactionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub id: String,
    pub label: String,
    pub state: StepState,
    pub contract: Option<Address>,
}

/// Everything a front end needs to render the transaction dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalState {
    pub is_open: bool,
    pub kind: Option<VaultAction>,
    pub vault: Option<Address>,
    pub vault_name: Option<String>,
    pub vault_symbol: Option<String>,
    pub amount: Option<String>,
    pub status: TransactionStatus,
    pub error: Option<String>,
    pub tx_hash: Option<H256>,
    pub steps: Vec<StepView>,
    pub current_step_index: usize,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            is_open: false,
            kind: None,
            vault: None,
            vault_name: None,
            vault_symbol: None,
            amount: None,
            status: TransactionStatus::Preview,
            error: None,
            tx_hash: None,
            steps: Vec::new(),
            current_step_index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("No transaction dialog is open")]
    NotOpen,

    #[error("A transaction is already in progress ({0:?})")]
    AlreadyInFlight(TransactionStatus),
}

/// Shared, cloneable handle over one dialog's state
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    state: Arc<Mutex<ModalState>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ModalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ModalState {
        self.lock().clone()
    }

    /// Open a fresh dialog. A blank amount is stored as `None`.
    pub fn open(&self, kind: VaultAction, vault: Address, vault_name: &str, vault_symbol: &str, amount: Option<&str>) {
        let amount = amount.map(str::trim).filter(|a| !a.is_empty()).map(str::to_string);
        *self.lock() = ModalState {
            is_open: true,
            kind: Some(kind),
            vault: Some(vault),
            vault_name: Some(vault_name.to_string()),
            vault_symbol: Some(vault_symbol.to_string()),
            amount,
            ..ModalState::default()
        };
    }

    pub fn close(&self) {
        *self.lock() = ModalState::default();
    }

    /// Replace status, error and hash together; `None` clears
    pub fn update_status(&self, status: TransactionStatus, error: Option<String>, tx_hash: Option<H256>) {
        let mut state = self.lock();
        state.status = status;
        state.error = error;
        state.tx_hash = tx_hash;
        if status == TransactionStatus::Success {
            for step in state.steps.iter_mut() {
                step.state = StepState::Completed;
            }
        }
    }

    /// Claim the dialog for one execution.
    ///
    /// Fails when no dialog is open or an execution is already running.
    pub fn begin(&self) -> Result<(), ProgressError> {
        let mut state = self.lock();
        if !state.is_open {
            return Err(ProgressError::NotOpen);
        }
        if state.status.is_in_flight() {
            return Err(ProgressError::AlreadyInFlight(state.status));
        }
        state.status = TransactionStatus::Confirming;
        state.error = None;
        state.tx_hash = None;
        state.steps.clear();
        state.current_step_index = 0;
        Ok(())
    }

    /// Record a failed execution; a declined wallet prompt is a cancellation
    pub fn fail(&self, error: &VaultError) {
        let status = if error.is_user_rejection() { TransactionStatus::Cancelled } else { TransactionStatus::Error };
        let mut state = self.lock();
        state.status = status;
        state.error = Some(error.to_string());
    }

    pub fn apply(&self, step: &ProgressStep) {
        let mut state = self.lock();
        let total = step.total_steps();
        let index = step.step_index();

        if state.steps.len() != total {
            state.steps = (0..total)
                .map(|i| StepView {
                    id: format!("step-{}", i),
                    label: if i + 1 == total { "Confirm".to_string() } else { format!("Step {}", i + 1) },
                    state: StepState::Pending,
                    contract: None,
                })
                .collect();
        }

        for (i, view) in state.steps.iter_mut().enumerate() {
            view.state = match i.cmp(&index) {
                std::cmp::Ordering::Less => StepState::Completed,
                std::cmp::Ordering::Equal => StepState::Active,
                std::cmp::Ordering::Greater => StepState::Pending,
            };
        }
        if let Some(view) = state.steps.get_mut(index) {
            view.label = step.label().to_string();
            if let ProgressStep::Approving { contract, .. } = step {
                view.contract = Some(*contract);
            }
        }

        state.current_step_index = index;
        state.status = step.status();
        if let ProgressStep::Confirming { tx_hash: Some(hash), .. } = step {
            state.tx_hash = Some(*hash);
        }
        debug!(status = ?state.status, step = index, total, "Progress updated");
    }

    /// Adapter for the orchestrator's progress callback
    pub fn callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |step: ProgressStep| reporter.apply(&step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_reporter() -> ProgressReporter {
        let reporter = ProgressReporter::new();
        reporter.open(VaultAction::Deposit, Address::repeat_byte(1), "Spark USDC", "sparkUSDC", Some(" 10 "));
        reporter
    }

    #[test]
    fn test_open_normalizes_amount() {
        let reporter = open_reporter();
        let state = reporter.snapshot();
        assert!(state.is_open);
        assert_eq!(state.amount.as_deref(), Some("10"));
        assert_eq!(state.status, TransactionStatus::Preview);

        reporter.open(VaultAction::WithdrawAll, Address::repeat_byte(1), "v", "V", Some("   "));
        assert_eq!(reporter.snapshot().amount, None);
    }

    #[test]
    fn test_close_resets() {
        let reporter = open_reporter();
        reporter.update_status(TransactionStatus::Error, Some("boom".into()), None);
        reporter.close();
        assert_eq!(reporter.snapshot(), ModalState::default());
    }

    #[test]
    fn test_begin_is_single_flight() {
        let reporter = ProgressReporter::new();
        assert_eq!(reporter.begin(), Err(ProgressError::NotOpen));

        let reporter = open_reporter();
        assert!(reporter.begin().is_ok());
        assert!(matches!(reporter.begin(), Err(ProgressError::AlreadyInFlight(_))));

        reporter.update_status(TransactionStatus::Success, None, Some(H256::repeat_byte(9)));
        assert!(reporter.begin().is_ok());
    }

    #[test]
    fn test_apply_tracks_steps() {
        let reporter = open_reporter();
        let approve = Address::repeat_byte(7);
        let callback = reporter.callback();

        callback(ProgressStep::Approving {
            step_index: 0,
            total_steps: 2,
            label: "Approve".into(),
            contract: approve,
            tx_hash: None,
        });
        let state = reporter.snapshot();
        assert_eq!(state.status, TransactionStatus::Approving);
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[0].state, StepState::Active);
        assert_eq!(state.steps[0].contract, Some(approve));

        let hash = H256::repeat_byte(3);
        callback(ProgressStep::Confirming { step_index: 1, total_steps: 2, label: "Confirm".into(), tx_hash: Some(hash) });
        let state = reporter.snapshot();
        assert_eq!(state.status, TransactionStatus::Confirming);
        assert_eq!(state.steps[0].state, StepState::Completed);
        assert_eq!(state.steps[1].state, StepState::Active);
        assert_eq!(state.tx_hash, Some(hash));
        assert_eq!(state.current_step_index, 1);
    }

    #[test]
    fn test_fail_distinguishes_cancellation() {
        let reporter = open_reporter();
        reporter.fail(&VaultError::UserRejected("declined".into()));
        assert_eq!(reporter.snapshot().status, TransactionStatus::Cancelled);

        reporter.fail(&VaultError::NoSharesToWithdraw);
        let state = reporter.snapshot();
        assert_eq!(state.status, TransactionStatus::Error);
        assert_eq!(state.error.as_deref(), Some("No shares to withdraw"));
    }

    #[test]
    fn test_labels_and_messages() {
        assert_eq!(step_label("Sign", 0, 1), "Sign");
        assert_eq!(step_label("Approve", 1, 2), "Approve 2/2");

        let step = ProgressStep::Signing { step_index: 0, total_steps: 3, label: "Sign".into() };
        assert_eq!(step.status_message(), "Signing transaction... (1/3)");
    }
}
