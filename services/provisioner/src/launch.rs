//! Launch executor and launch error classification.

use std::collections::BTreeMap;
use std::sync::Arc;

use flexgrab_oci::models::{
    CreateVnicDetails, InstanceSourceDetails, LaunchInstanceDetails,
    LaunchInstanceShapeConfigDetails,
};
use flexgrab_oci::OciError;
use tracing::{error, info, warn};

use crate::compute::ComputeApi;
use crate::config::ProvisionRequest;
use crate::notify::Notifier;
use crate::orchestrator::AttemptOutcome;

/// Marker the provider puts in launch errors when a shape has no free hosts.
pub const OUT_OF_HOST_CAPACITY: &str = "Out of host capacity";

/// Error code (and message marker) for an exhausted service limit.
pub const LIMIT_EXCEEDED: &str = "LimitExceeded";

/// Metadata key the instance agent reads SSH keys from.
const SSH_AUTHORIZED_KEYS: &str = "ssh_authorized_keys";

/// Kind of launch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// No free hosts for the shape right now.
    OutOfHostCapacity,
    /// The tenancy's limit for the shape is used up.
    LimitExceeded,
    /// Anything else.
    Unexpected,
}

impl LaunchFailure {
    /// Outcome of an attempt that failed this way.
    pub fn outcome(self) -> AttemptOutcome {
        match self {
            LaunchFailure::LimitExceeded => AttemptOutcome::LimitExceeded,
            LaunchFailure::OutOfHostCapacity | LaunchFailure::Unexpected => {
                AttemptOutcome::TransientFailure
            }
        }
    }
}

/// Classify a failed launch.
///
/// The rendered error always carries both the provider's code and message.
/// Out-of-host-capacity wins over everything else. A `LimitExceeded` code is
/// checked first, then the rendered text as a fallback.
pub fn classify_launch_error(err: &OciError) -> LaunchFailure {
    let rendered = err.to_string();

    if rendered.contains(OUT_OF_HOST_CAPACITY) {
        return LaunchFailure::OutOfHostCapacity;
    }

    let limit_code = matches!(err, OciError::Service(service) if service.has_code(LIMIT_EXCEEDED));
    if limit_code || rendered.contains(LIMIT_EXCEEDED) {
        return LaunchFailure::LimitExceeded;
    }

    LaunchFailure::Unexpected
}

/// Issues launch requests and reports successes.
pub struct LaunchExecutor {
    compute: Arc<dyn ComputeApi>,
    notifier: Arc<dyn Notifier>,
}

impl LaunchExecutor {
    pub fn new(compute: Arc<dyn ComputeApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { compute, notifier }
    }

    /// Submit one launch request, classify the result and notify on success.
    pub async fn launch(&self, request: &ProvisionRequest) -> AttemptOutcome {
        let outcome = self.attempt(request).await;
        if let AttemptOutcome::Launched { instance_id } = &outcome {
            self.report_launched(request, instance_id).await;
        }
        outcome
    }

    /// Submit one launch request and classify the result without notifying.
    pub async fn attempt(&self, request: &ProvisionRequest) -> AttemptOutcome {
        info!(
            availability_domain = %request.availability_domain,
            shape = %request.shape,
            ocpus = request.ocpus,
            memory_in_gbs = request.memory_in_gbs,
            "Attempting to launch instance"
        );

        let details = launch_details(request);
        let instance = match self.compute.launch_instance(&details).await {
            Ok(instance) => instance,
            Err(e) => {
                let failure = classify_launch_error(&e);
                match failure {
                    LaunchFailure::OutOfHostCapacity => {
                        info!("Out of host capacity, retrying later")
                    }
                    LaunchFailure::LimitExceeded => error!(error = %e, "Service limit exceeded"),
                    LaunchFailure::Unexpected => warn!(error = %e, "Launch failed unexpectedly"),
                }
                return failure.outcome();
            }
        };

        info!(
            instance_id = %instance.id,
            lifecycle_state = instance.lifecycle_state.as_deref().unwrap_or("UNKNOWN"),
            "Instance launched"
        );

        AttemptOutcome::Launched {
            instance_id: instance.id,
        }
    }

    /// Announce a launched instance.
    pub async fn report_launched(&self, request: &ProvisionRequest, instance_id: &str) {
        self.notifier.notify_launched(request, instance_id).await;
    }
}

/// Launch request body for the configured instance.
pub fn launch_details(request: &ProvisionRequest) -> LaunchInstanceDetails {
    LaunchInstanceDetails {
        compartment_id: request.compartment_id.clone(),
        availability_domain: request.availability_domain.clone(),
        display_name: request.display_name.clone(),
        shape: request.shape.clone(),
        shape_config: Some(LaunchInstanceShapeConfigDetails {
            ocpus: request.ocpus,
            memory_in_gbs: request.memory_in_gbs,
        }),
        source_details: InstanceSourceDetails::Image {
            image_id: request.image_id.clone(),
        },
        create_vnic_details: CreateVnicDetails {
            subnet_id: request.subnet_id.clone(),
            assign_public_ip: true,
        },
        metadata: BTreeMap::from([(
            SSH_AUTHORIZED_KEYS.to_string(),
            request.ssh_public_key.clone(),
        )]),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use flexgrab_oci::ServiceError;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::compute::{MockCompute, MockReply};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_launched(&self, _request: &ProvisionRequest, instance_id: &str) {
            self.sent.lock().unwrap().push(instance_id.to_string());
        }
    }

    fn test_request() -> ProvisionRequest {
        ProvisionRequest {
            compartment_id: "ocid1.compartment.oc1..c".to_string(),
            subnet_id: "ocid1.subnet.oc1..s".to_string(),
            image_id: "ocid1.image.oc1..i".to_string(),
            ssh_public_key: "ssh-ed25519 AAAA me@host".to_string(),
            availability_domain: "Uocm:PHX-AD-1".to_string(),
            display_name: "free-arm".to_string(),
            shape: "VM.Standard.A1.Flex".to_string(),
            ocpus: 4.0,
            memory_in_gbs: 24.0,
            retry_interval: Duration::from_secs(60),
            check_only: false,
            peek_before_launch: false,
            webhook_url: None,
        }
    }

    fn service_error(code: &str, message: &str) -> OciError {
        OciError::Service(ServiceError {
            service: "Compute".to_string(),
            status: 400,
            code: code.to_string(),
            message: message.to_string(),
            opc_request_id: "req".to_string(),
        })
    }

    #[rstest]
    #[case("InternalError", "Out of host capacity.", LaunchFailure::OutOfHostCapacity)]
    #[case("InternalError", "Out of host capacity in ad-1", LaunchFailure::OutOfHostCapacity)]
    #[case("LimitExceeded", "Out of host capacity.", LaunchFailure::OutOfHostCapacity)]
    #[case("LimitExceeded", "standard-a1-core-count limit reached", LaunchFailure::LimitExceeded)]
    #[case("BadRequest", "LimitExceeded: max instance count reached", LaunchFailure::LimitExceeded)]
    #[case("NotAuthorizedOrNotFound", "Authorization failed", LaunchFailure::Unexpected)]
    #[case("InternalError", "out of host capacity", LaunchFailure::Unexpected)]
    #[case("InternalError", "limitexceeded", LaunchFailure::Unexpected)]
    fn test_classify_service_errors(
        #[case] code: &str,
        #[case] message: &str,
        #[case] expected: LaunchFailure,
    ) {
        assert_eq!(classify_launch_error(&service_error(code, message)), expected);
    }

    #[test]
    fn test_classify_non_service_errors() {
        let err = OciError::Federation("LimitExceeded for tokens".to_string());
        assert_eq!(classify_launch_error(&err), LaunchFailure::LimitExceeded);

        let err = OciError::Identity("metadata service unreachable".to_string());
        assert_eq!(classify_launch_error(&err), LaunchFailure::Unexpected);
    }

    #[test]
    fn test_failure_outcomes() {
        assert_eq!(
            LaunchFailure::OutOfHostCapacity.outcome(),
            AttemptOutcome::TransientFailure
        );
        assert_eq!(LaunchFailure::LimitExceeded.outcome(), AttemptOutcome::LimitExceeded);
        assert_eq!(LaunchFailure::Unexpected.outcome(), AttemptOutcome::TransientFailure);
    }

    proptest! {
        #[test]
        fn prop_limit_exceeded_anywhere_stops(
            prefix in "[a-zA-Z0-9 :,.-]{0,40}",
            suffix in "[a-zA-Z0-9 :,.-]{0,40}",
        ) {
            let message = format!("{prefix}LimitExceeded{suffix}");
            prop_assume!(!message.contains(OUT_OF_HOST_CAPACITY));
            let err = service_error("BadRequest", &message);
            prop_assert_eq!(classify_launch_error(&err), LaunchFailure::LimitExceeded);
        }

        #[test]
        fn prop_out_of_host_capacity_anywhere_retries(
            prefix in "[a-zA-Z0-9 :,.-]{0,40}",
            suffix in "[a-zA-Z0-9 :,.-]{0,40}",
        ) {
            let err = service_error("InternalError", &format!("{prefix}Out of host capacity{suffix}"));
            prop_assert_eq!(classify_launch_error(&err), LaunchFailure::OutOfHostCapacity);
            prop_assert_eq!(classify_launch_error(&err).outcome(), AttemptOutcome::TransientFailure);
        }

        #[test]
        fn prop_classification_is_pure(code in "[A-Za-z]{1,20}", message in ".{0,80}") {
            let err = service_error(&code, &message);
            prop_assert_eq!(classify_launch_error(&err), classify_launch_error(&err));
        }
    }

    #[test]
    fn test_launch_details() {
        let details = launch_details(&test_request());

        assert_eq!(details.shape, "VM.Standard.A1.Flex");
        assert_eq!(
            details.shape_config,
            Some(LaunchInstanceShapeConfigDetails {
                ocpus: 4.0,
                memory_in_gbs: 24.0
            })
        );
        assert!(details.create_vnic_details.assign_public_ip);
        assert_eq!(details.create_vnic_details.subnet_id, "ocid1.subnet.oc1..s");
        assert_eq!(
            details.metadata.get("ssh_authorized_keys").map(String::as_str),
            Some("ssh-ed25519 AAAA me@host")
        );
    }

    #[tokio::test]
    async fn test_success_notifies() {
        let compute = Arc::new(
            MockCompute::new().with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.abc"))]),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = LaunchExecutor::new(compute.clone(), notifier.clone());

        let outcome = executor.launch(&test_request()).await;

        assert_eq!(
            outcome,
            AttemptOutcome::Launched {
                instance_id: "ocid1.instance.abc".to_string()
            }
        );
        assert_eq!(compute.launch_calls(), 1);
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["ocid1.instance.abc"]);
    }

    #[tokio::test]
    async fn test_attempt_does_not_notify() {
        let compute = Arc::new(
            MockCompute::new().with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.abc"))]),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = LaunchExecutor::new(compute, notifier.clone());

        let outcome = executor.attempt(&test_request()).await;
        assert!(matches!(outcome, AttemptOutcome::Launched { .. }));
        assert!(notifier.sent.lock().unwrap().is_empty());

        executor.report_launched(&test_request(), "ocid1.instance.abc").await;
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["ocid1.instance.abc"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_notify() {
        let compute = Arc::new(
            MockCompute::new().with_launches([MockReply::Err(MockCompute::out_of_capacity())]),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = LaunchExecutor::new(compute, notifier.clone());

        let outcome = executor.launch(&test_request()).await;

        assert_eq!(outcome, AttemptOutcome::TransientFailure);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
