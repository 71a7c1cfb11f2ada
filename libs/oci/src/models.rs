//! Wire models for the Compute API (version 20160918).
//!
//! Field names follow the provider's JSON exactly; note `memoryInGBs`, which
//! serde's camelCase would otherwise spell `memoryInGbs`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /instances/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceDetails {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: String,
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_config: Option<LaunchInstanceShapeConfigDetails>,
    pub source_details: InstanceSourceDetails,
    pub create_vnic_details: CreateVnicDetails,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Flexible shape sizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceShapeConfigDetails {
    pub ocpus: f32,
    #[serde(rename = "memoryInGBs")]
    pub memory_in_gbs: f32,
}

/// Boot source for a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "sourceType", rename_all = "camelCase")]
pub enum InstanceSourceDetails {
    #[serde(rename = "image", rename_all = "camelCase")]
    Image { image_id: String },
}

/// Primary VNIC settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVnicDetails {
    pub subnet_id: String,
    pub assign_public_ip: bool,
}

/// Instance returned by the launch call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub lifecycle_state: Option<String>,
    #[serde(default)]
    pub availability_domain: Option<String>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
}

/// Body of `POST /computeCapacityReports`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComputeCapacityReportDetails {
    pub compartment_id: String,
    pub availability_domain: String,
    pub shape_availabilities: Vec<CreateCapacityReportShapeAvailabilityDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCapacityReportShapeAvailabilityDetails {
    pub instance_shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_shape_config: Option<CapacityReportInstanceShapeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_domain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReportInstanceShapeConfig {
    #[serde(default)]
    pub ocpus: Option<f32>,
    #[serde(rename = "memoryInGBs", default)]
    pub memory_in_gbs: Option<f32>,
}

/// Capacity report returned by the provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeCapacityReport {
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default)]
    pub availability_domain: Option<String>,
    #[serde(default)]
    pub shape_availabilities: Vec<CapacityReportShapeAvailability>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReportShapeAvailability {
    #[serde(default)]
    pub instance_shape: Option<String>,
    pub availability_status: AvailabilityStatus,
    #[serde(default)]
    pub available_count: Option<i64>,
    #[serde(default)]
    pub fault_domain: Option<String>,
}

/// Availability status of one shape in a capacity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    Available,
    OutOfHostCapacity,
    HardwareNotSupported,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityStatus::Available => write!(f, "AVAILABLE"),
            AvailabilityStatus::OutOfHostCapacity => write!(f, "OUT_OF_HOST_CAPACITY"),
            AvailabilityStatus::HardwareNotSupported => write!(f, "HARDWARE_NOT_SUPPORTED"),
            AvailabilityStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Error body returned by OCI services.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
