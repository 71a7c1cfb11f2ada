//! Capacity probe.
//!
//! Asks the provider whether the requested shape and size has room in the
//! availability domain. The answer is advisory; nothing is reserved.

use std::sync::Arc;

use flexgrab_oci::models::{
    AvailabilityStatus, CapacityReportInstanceShapeConfig, ComputeCapacityReport,
    CreateCapacityReportShapeAvailabilityDetails, CreateComputeCapacityReportDetails,
};
use tracing::{info, warn};

use crate::compute::ComputeApi;
use crate::config::ProvisionRequest;

/// Result of a capacity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    Available,
    Unavailable,
}

impl CapacityStatus {
    /// Status derived from the first shape entry of a report.
    pub fn from_report(report: &ComputeCapacityReport) -> Self {
        match report.shape_availabilities.first() {
            Some(entry) if entry.availability_status == AvailabilityStatus::Available => {
                CapacityStatus::Available
            }
            _ => CapacityStatus::Unavailable,
        }
    }
}

/// Queries capacity reports for one shape configuration.
pub struct CapacityProbe {
    compute: Arc<dyn ComputeApi>,
}

impl CapacityProbe {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self { compute }
    }

    /// Probe capacity for the request's shape. Never fails; errors count as
    /// unavailable.
    pub async fn probe(&self, request: &ProvisionRequest) -> CapacityStatus {
        let details = report_details(request);

        let report = match self.compute.create_capacity_report(&details).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Capacity check failed");
                return CapacityStatus::Unavailable;
            }
        };

        let observed = report
            .shape_availabilities
            .first()
            .map(|entry| entry.availability_status.to_string())
            .unwrap_or_else(|| "NONE".to_string());
        let status = CapacityStatus::from_report(&report);

        info!(
            shape = %request.shape,
            availability_domain = %request.availability_domain,
            availability_status = %observed,
            available = status == CapacityStatus::Available,
            "Capacity report"
        );

        status
    }
}

/// Capacity report request for exactly one shape and size.
pub fn report_details(request: &ProvisionRequest) -> CreateComputeCapacityReportDetails {
    CreateComputeCapacityReportDetails {
        compartment_id: request.compartment_id.clone(),
        availability_domain: request.availability_domain.clone(),
        shape_availabilities: vec![CreateCapacityReportShapeAvailabilityDetails {
            instance_shape: request.shape.clone(),
            instance_shape_config: Some(CapacityReportInstanceShapeConfig {
                ocpus: Some(request.ocpus),
                memory_in_gbs: Some(request.memory_in_gbs),
            }),
            fault_domain: None,
        }],
    }
}
