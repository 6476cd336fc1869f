//! Public amount and progress API, driven the way a front end would drive it

use ethers::types::{Address, H256, U256};
use vault_core::{
    format_units, parse_units, ProgressReporter, ProgressStep, StepState, TransactionStatus, VaultAction,
    VaultError,
};

fn approving(step_index: usize, total_steps: usize, label: &str, tx_hash: Option<H256>) -> ProgressStep {
    ProgressStep::Approving {
        step_index,
        total_steps,
        label: label.to_string(),
        contract: Address::repeat_byte(0x33),
        tx_hash,
    }
}

#[test]
fn test_user_amounts_survive_display() {
    let parsed = parse_units(" 1 234.5678 ", 6).unwrap();
    assert_eq!(parsed, U256::from(1_234_567_800u64));
    assert_eq!(format_units(parsed, 6), "1234.5678");

    assert_eq!(parse_units("0.123456789", 6).unwrap(), U256::from(123_456u64));
    assert_eq!(format_units(U256::exp10(18), 18), "1");
}

#[test]
fn test_malformed_amounts_are_rejected() {
    for input in ["", ".", "-1", "1e6", "1,000", "abc", "1.2.3"] {
        assert!(
            matches!(parse_units(input, 18), Err(VaultError::InvalidAmountFormat(_))),
            "{:?} should be rejected",
            input
        );
    }
}

#[test]
fn test_two_approval_flow_through_callback() {
    let reporter = ProgressReporter::new();
    reporter.open(VaultAction::Deposit, Address::repeat_byte(0x22), "Moonwell USDC", "mwUSDC", Some("25"));
    reporter.begin().unwrap();

    let callback = reporter.callback();
    let hash = H256::repeat_byte(0xab);
    callback(approving(0, 3, "Approve 1/2", None));
    callback(approving(0, 3, "Approve 1/2", Some(H256::repeat_byte(1))));
    callback(approving(1, 3, "Approve 2/2", None));

    let state = reporter.snapshot();
    assert_eq!(state.status, TransactionStatus::Approving);
    assert_eq!(state.current_step_index, 1);
    assert_eq!(state.steps.len(), 3);
    assert_eq!(state.steps[0].state, StepState::Completed);
    assert_eq!(state.steps[1].state, StepState::Active);
    assert_eq!(state.steps[1].label, "Approve 2/2");
    assert_eq!(state.steps[2].state, StepState::Pending);

    callback(ProgressStep::Confirming { step_index: 2, total_steps: 3, label: "Confirm".to_string(), tx_hash: None });
    callback(ProgressStep::Confirming {
        step_index: 2,
        total_steps: 3,
        label: "Confirm".to_string(),
        tx_hash: Some(hash),
    });
    assert_eq!(reporter.snapshot().tx_hash, Some(hash));

    reporter.update_status(TransactionStatus::Success, None, Some(hash));
    let done = reporter.snapshot();
    assert!(done.status.is_terminal());
    assert!(done.steps.iter().all(|s| s.state == StepState::Completed));
}

#[test]
fn test_declined_prompt_is_cancellation() {
    let reporter = ProgressReporter::new();
    reporter.open(VaultAction::WithdrawAll, Address::repeat_byte(0x22), "Moonwell USDC", "mwUSDC", None);
    reporter.begin().unwrap();

    reporter.fail(&VaultError::UserRejected("User rejected the request.".to_string()));
    assert_eq!(reporter.snapshot().status, TransactionStatus::Cancelled);

    reporter.begin().unwrap();
    reporter.fail(&VaultError::GasEstimation("execution reverted".to_string()));
    let state = reporter.snapshot();
    assert_eq!(state.status, TransactionStatus::Error);
    assert!(state.error.unwrap().contains("execution reverted"));
}

#[test]
fn test_status_messages() {
    let step = approving(1, 3, "Approve 2/2", None);
    assert_eq!(step.status_message(), "Approving... (2/3)");

    let confirm = ProgressStep::Confirming { step_index: 0, total_steps: 1, label: "Confirm".to_string(), tx_hash: None };
    assert_eq!(confirm.status_message(), "Confirm in wallet...");

    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json["type"], "approving");
}
