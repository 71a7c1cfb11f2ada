//! flexgrab provisioner library
//!
//! Keeps trying to launch one OCI compute instance until the provider
//! accepts it or reports that the tenancy's limit is used up.
//!
//! ## Architecture
//!
//! ```text
//! RetryOrchestrator
//! ├── CapacityProbe    (optional capacity report before each launch)
//! ├── LaunchExecutor   (one launch per iteration, error classification)
//! │   └── Notifier     (webhook after a successful launch)
//! └── ComputeApi       (signed Compute client, or MockCompute in tests)
//! ```
//!
//! ## Modules
//!
//! - `config`: command-line and environment configuration
//! - `compute`: Compute API seam and scripted mock
//! - `capacity`: capacity probe
//! - `launch`: launch executor and error classification
//! - `notify`: webhook notifications
//! - `orchestrator`: the retry loop state machine

pub mod capacity;
pub mod compute;
pub mod config;
pub mod launch;
pub mod notify;
pub mod orchestrator;

pub use capacity::{CapacityProbe, CapacityStatus};
pub use compute::{ComputeApi, MockCompute, MockReply};
pub use config::{Args, ConfigError, LogFormat, ProvisionRequest};
pub use launch::{classify_launch_error, LaunchExecutor, LaunchFailure};
pub use notify::{Notifier, NotifyError, WebhookNotifier};
pub use orchestrator::{AttemptOutcome, LoopState, RetryOrchestrator, RunOutcome, RunReport};
