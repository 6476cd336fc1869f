//! Prometheus metrics for vault action execution

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::{Duration, Instant};

/// Metrics collector backed by its own registry, so several orchestrators can coexist
#[derive(Clone)]
pub struct OrchestratorMetrics {
    registry: Registry,

    pub executions_total: IntCounterVec,
    pub stale_state_retries_total: IntCounterVec,
    pub state_builds_total: IntCounterVec,
    pub phase_duration: HistogramVec,
}

impl OrchestratorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let executions_total = IntCounterVec::new(
            Opts::new("vault_executions_total", "Vault actions executed, by action and result"),
            &["action", "result"],
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let stale_state_retries_total = IntCounterVec::new(
            Opts::new(
                "vault_stale_state_retries_total",
                "Gas estimation retries after a stale-allowance failure",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(stale_state_retries_total.clone()))?;

        let state_builds_total = IntCounterVec::new(
            Opts::new("vault_state_builds_total", "Simulation state builds, by result"),
            &["result"],
        )?;
        registry.register(Box::new(state_builds_total.clone()))?;

        let phase_duration = HistogramVec::new(
            HistogramOpts::new("vault_phase_duration_seconds", "Time spent in each orchestrator phase")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["phase"],
        )?;
        registry.register(Box::new(phase_duration.clone()))?;

        Ok(Self { registry, executions_total, stale_state_retries_total, state_builds_total, phase_duration })
    }

    pub fn inc_execution(&self, action: &str, result: &str) {
        self.executions_total.with_label_values(&[action, result]).inc();
    }

    pub fn inc_retry(&self, action: &str, outcome: &str) {
        self.stale_state_retries_total.with_label_values(&[action, outcome]).inc();
    }

    pub fn inc_state_build(&self, result: &str) {
        self.state_builds_total.with_label_values(&[result]).inc();
    }

    pub fn record_phase(&self, phase: &str, duration: Duration) {
        self.phase_duration.with_label_values(&[phase]).observe(duration.as_secs_f64());
    }

    /// Text exposition of every metric in this registry
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

/// Observes the elapsed time into `phase` when dropped
pub struct PhaseTimer<'a> {
    metrics: Option<&'a OrchestratorMetrics>,
    phase: &'static str,
    start: Instant,
}

impl<'a> PhaseTimer<'a> {
    pub fn new(metrics: Option<&'a OrchestratorMetrics>, phase: &'static str) -> Self {
        Self { metrics, phase, start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        if let Some(metrics) = self.metrics {
            metrics.record_phase(self.phase, self.start.elapsed());
        }
    }
}
