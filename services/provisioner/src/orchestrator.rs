//! Retry loop.
//!
//! Each iteration optionally probes capacity, launches, then decides whether
//! to stop or wait for the retry interval. The loop is a small state machine:
//!
//! ```text
//! Probing ──> Launching ──> Deciding ──> Stopped
//!    │                         ▲   │
//!    └──────── skipped ────────┘   └──> Waiting ──> next iteration
//! ```
//!
//! A shutdown signal interrupts any state, including an in-flight call. Once
//! an attempt has an outcome, that outcome is kept: a shutdown during the
//! launch notification abandons the notification, not the launch.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::capacity::{CapacityProbe, CapacityStatus};
use crate::compute::ComputeApi;
use crate::config::ProvisionRequest;
use crate::launch::LaunchExecutor;
use crate::notify::Notifier;

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The provider accepted the launch.
    Launched { instance_id: String },
    /// The tenancy has no quota left for the shape.
    LimitExceeded,
    /// The launch failed in a way worth retrying.
    TransientFailure,
    /// The launch was skipped by the peek or check-only policy.
    SkippedByPolicy,
}

/// Loop state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Probing,
    Launching,
    Deciding(AttemptOutcome),
    Waiting,
    Stopped(RunOutcome),
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Launched { instance_id: String },
    LimitExceeded,
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Iterations started, including an interrupted one.
    pub attempts: u64,
}

/// Whether the loop halts after this outcome.
///
/// Check-only runs never halt on their own.
pub fn should_stop(outcome: &AttemptOutcome, check_only: bool) -> bool {
    !check_only
        && matches!(
            outcome,
            AttemptOutcome::Launched { .. } | AttemptOutcome::LimitExceeded
        )
}

/// First state of every iteration.
pub fn initial_state(request: &ProvisionRequest) -> LoopState {
    if request.peeks() {
        LoopState::Probing
    } else {
        LoopState::Launching
    }
}

fn decide(outcome: AttemptOutcome, check_only: bool) -> LoopState {
    if !should_stop(&outcome, check_only) {
        return LoopState::Waiting;
    }
    match outcome {
        AttemptOutcome::Launched { instance_id } => {
            LoopState::Stopped(RunOutcome::Launched { instance_id })
        }
        AttemptOutcome::LimitExceeded => LoopState::Stopped(RunOutcome::LimitExceeded),
        AttemptOutcome::TransientFailure | AttemptOutcome::SkippedByPolicy => LoopState::Waiting,
    }
}

/// Drives probe and launch attempts until a terminal outcome or shutdown.
pub struct RetryOrchestrator {
    request: ProvisionRequest,
    probe: CapacityProbe,
    executor: LaunchExecutor,
}

impl RetryOrchestrator {
    pub fn new(
        request: ProvisionRequest,
        compute: Arc<dyn ComputeApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            request,
            probe: CapacityProbe::new(compute.clone()),
            executor: LaunchExecutor::new(compute, notifier),
        }
    }

    pub fn request(&self) -> &ProvisionRequest {
        &self.request
    }

    /// Run until the instance launches, the limit is hit, or `shutdown`
    /// turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunReport {
        info!(
            shape = %self.request.shape,
            availability_domain = %self.request.availability_domain,
            retry_interval_secs = self.request.retry_interval.as_secs(),
            check_only = self.request.check_only,
            peek_before_launch = self.request.peek_before_launch,
            "Starting retry loop"
        );

        let mut attempts = 1;
        let mut state = initial_state(&self.request);

        loop {
            if let LoopState::Stopped(outcome) = state {
                info!(?outcome, attempts, "Retry loop stopped");
                return RunReport { outcome, attempts };
            }

            let waited = state == LoopState::Waiting;
            let span = info_span!("attempt", attempt = attempts);
            state = match state {
                LoopState::Deciding(outcome) => {
                    self.settle(outcome, &mut shutdown).instrument(span).await
                }
                state => tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => {
                        info!("Shutdown requested");
                        LoopState::Stopped(RunOutcome::Cancelled)
                    }
                    next = self.step(state).instrument(span) => next,
                },
            };

            if waited && !matches!(state, LoopState::Stopped(_)) {
                attempts += 1;
            }
        }
    }

    async fn step(&self, state: LoopState) -> LoopState {
        match state {
            LoopState::Probing => {
                info!(availability_domain = %self.request.availability_domain, "Peeking capacity");
                match self.probe.probe(&self.request).await {
                    CapacityStatus::Unavailable => {
                        info!("No capacity reported, skipping launch attempt");
                        LoopState::Deciding(AttemptOutcome::SkippedByPolicy)
                    }
                    CapacityStatus::Available if self.request.check_only => {
                        info!("Check-only mode, skipping launch attempt");
                        LoopState::Deciding(AttemptOutcome::SkippedByPolicy)
                    }
                    CapacityStatus::Available => LoopState::Launching,
                }
            }
            LoopState::Launching => LoopState::Deciding(self.executor.attempt(&self.request).await),
            LoopState::Waiting => {
                info!(
                    delay_secs = self.request.retry_interval.as_secs(),
                    "Waiting before next attempt"
                );
                tokio::time::sleep(self.request.retry_interval).await;
                initial_state(&self.request)
            }
            state @ (LoopState::Deciding(_) | LoopState::Stopped(_)) => state,
        }
    }

    /// Notify about a launch, then pick the next state from `outcome`.
    async fn settle(
        &self,
        outcome: AttemptOutcome,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopState {
        info!(?outcome, "Attempt finished");
        if let AttemptOutcome::Launched { instance_id } = &outcome {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => {
                    warn!(instance_id = %instance_id, "Shutdown requested, launch notification abandoned");
                }
                _ = self.executor.report_launched(&self.request, instance_id) => {}
            }
        }
        decide(outcome, self.request.check_only)
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}
