//! Compute API interface and mock implementation.
//!
//! The provisioner only needs two Compute calls:
//! - Launching an instance
//! - Creating a capacity report
//!
//! A scripted mock is provided for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use flexgrab_oci::models::{
    AvailabilityStatus, CapacityReportShapeAvailability, ComputeCapacityReport,
    CreateComputeCapacityReportDetails, Instance, LaunchInstanceDetails,
};
use flexgrab_oci::{ComputeClient, OciError, ServiceError};
use tracing::debug;

/// Compute operations used by the retry loop.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Ask whether the requested shape has capacity.
    async fn create_capacity_report(
        &self,
        details: &CreateComputeCapacityReportDetails,
    ) -> Result<ComputeCapacityReport, OciError>;

    /// Launch an instance.
    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance, OciError>;
}

#[async_trait]
impl ComputeApi for ComputeClient {
    async fn create_capacity_report(
        &self,
        details: &CreateComputeCapacityReportDetails,
    ) -> Result<ComputeCapacityReport, OciError> {
        self.create_compute_capacity_report(details).await
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance, OciError> {
        ComputeClient::launch_instance(self, details).await
    }
}

/// Scripted response for a mock call.
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Ok(T),
    Err(ServiceError),
}

impl<T: Clone> MockReply<T> {
    fn to_result(&self) -> Result<T, OciError> {
        match self {
            MockReply::Ok(value) => Ok(value.clone()),
            MockReply::Err(err) => Err(err.clone().into()),
        }
    }
}

/// Mock Compute API for tests.
///
/// Each call pops the next scripted reply. The last reply repeats once the
/// script runs out.
pub struct MockCompute {
    reports: Mutex<VecDeque<MockReply<ComputeCapacityReport>>>,
    launches: Mutex<VecDeque<MockReply<Instance>>>,
    report_calls: AtomicUsize,
    launch_calls: AtomicUsize,
    launched: Mutex<Vec<LaunchInstanceDetails>>,
}

impl MockCompute {
    /// Create a mock that reports capacity and launches successfully.
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(VecDeque::from([MockReply::Ok(Self::report(
                AvailabilityStatus::Available,
            ))])),
            launches: Mutex::new(VecDeque::from([MockReply::Ok(Self::instance(
                "ocid1.instance.oc1..mock",
            ))])),
            report_calls: AtomicUsize::new(0),
            launch_calls: AtomicUsize::new(0),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Replace the capacity report script.
    pub fn with_reports(self, replies: impl IntoIterator<Item = MockReply<ComputeCapacityReport>>) -> Self {
        *lock(&self.reports) = replies.into_iter().collect();
        self
    }

    /// Replace the launch script.
    pub fn with_launches(self, replies: impl IntoIterator<Item = MockReply<Instance>>) -> Self {
        *lock(&self.launches) = replies.into_iter().collect();
        self
    }

    /// A report with a single shape in the given status.
    pub fn report(status: AvailabilityStatus) -> ComputeCapacityReport {
        ComputeCapacityReport {
            compartment_id: None,
            availability_domain: None,
            shape_availabilities: vec![CapacityReportShapeAvailability {
                instance_shape: None,
                availability_status: status,
                available_count: None,
                fault_domain: None,
            }],
            time_created: None,
        }
    }

    /// A report with no shape entries.
    pub fn empty_report() -> ComputeCapacityReport {
        ComputeCapacityReport {
            compartment_id: None,
            availability_domain: None,
            shape_availabilities: Vec::new(),
            time_created: None,
        }
    }

    /// A freshly launched instance.
    pub fn instance(id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            display_name: None,
            lifecycle_state: Some("PROVISIONING".to_string()),
            availability_domain: None,
            shape: None,
            time_created: None,
        }
    }

    /// A service error with the given status, code and message.
    pub fn service_error(status: u16, code: &str, message: &str) -> ServiceError {
        ServiceError {
            service: "Compute".to_string(),
            status,
            code: code.to_string(),
            message: message.to_string(),
            opc_request_id: "mock-request".to_string(),
        }
    }

    /// The error returned when a shape has no free hosts.
    pub fn out_of_capacity() -> ServiceError {
        Self::service_error(500, "InternalError", "Out of host capacity.")
    }

    /// Number of capacity report calls made.
    pub fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    /// Number of launch calls made.
    pub fn launch_calls(&self) -> usize {
        self.launch_calls.load(Ordering::SeqCst)
    }

    /// Launch requests received, in order.
    pub fn launched(&self) -> Vec<LaunchInstanceDetails> {
        lock(&self.launched).clone()
    }
}

impl Default for MockCompute {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn next_reply<T: Clone>(script: &Mutex<VecDeque<MockReply<T>>>) -> Result<T, OciError> {
    let mut script = lock(script);
    let reply = if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    };
    match reply {
        Some(reply) => reply.to_result(),
        None => Err(OciError::Config("mock script is empty".to_string())),
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    async fn create_capacity_report(
        &self,
        details: &CreateComputeCapacityReportDetails,
    ) -> Result<ComputeCapacityReport, OciError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            availability_domain = %details.availability_domain,
            "[MOCK] Creating capacity report"
        );
        next_reply(&self.reports)
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance, OciError> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        debug!(display_name = %details.display_name, "[MOCK] Launching instance");
        lock(&self.launched).push(details.clone());
        next_reply(&self.launches)
    }
}
