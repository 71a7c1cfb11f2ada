//! Integration tests for the retry loop.
//!
//! The Compute API is replaced by `MockCompute`. Tests that depend on the
//! retry interval run on tokio's paused clock, so a 60 second wait costs no
//! real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flexgrab_oci::models::{
    AvailabilityStatus, ComputeCapacityReport, CreateComputeCapacityReportDetails, Instance,
    LaunchInstanceDetails,
};
use flexgrab_oci::OciError;
use flexgrab_provisioner::{
    ComputeApi, MockCompute, MockReply, Notifier, ProvisionRequest, RetryOrchestrator,
    RunOutcome, RunReport, WebhookNotifier,
};
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTERVAL: Duration = Duration::from_secs(60);

fn test_request(check_only: bool, peek_before_launch: bool) -> ProvisionRequest {
    ProvisionRequest {
        compartment_id: "ocid1.compartment.oc1..c".to_string(),
        subnet_id: "ocid1.subnet.oc1..s".to_string(),
        image_id: "ocid1.image.oc1..i".to_string(),
        ssh_public_key: "ssh-ed25519 AAAA test".to_string(),
        availability_domain: "Uocm:PHX-AD-1".to_string(),
        display_name: "free-arm".to_string(),
        shape: "VM.Standard.A1.Flex".to_string(),
        ocpus: 4.0,
        memory_in_gbs: 24.0,
        retry_interval: INTERVAL,
        check_only,
        peek_before_launch,
        webhook_url: None,
    }
}

fn orchestrator(request: ProvisionRequest, compute: Arc<MockCompute>) -> RetryOrchestrator {
    let notifier = WebhookNotifier::new(request.webhook_url.clone()).unwrap();
    RetryOrchestrator::new(request, compute, Arc::new(notifier))
}

fn spawn_run(orchestrator: RetryOrchestrator) -> (watch::Sender<bool>, JoinHandle<RunReport>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });
    (shutdown_tx, handle)
}

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[tokio::test]
async fn test_launch_success_stops_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let compute = Arc::new(
        MockCompute::new()
            .with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.abc"))]),
    );
    let mut request = test_request(false, false);
    request.webhook_url = Some(Url::parse(&format!("{}/webhook", server.uri())).unwrap());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = orchestrator(request, compute.clone()).run(shutdown_rx).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Launched {
            instance_id: "ocid1.instance.abc".to_string()
        }
    );
    assert_eq!(report.attempts, 1);
    assert_eq!(compute.launch_calls(), 1);
    assert_eq!(compute.report_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_capacity_report_skips_launch() {
    let compute =
        Arc::new(MockCompute::new().with_reports([MockReply::Ok(MockCompute::empty_report())]));
    let (shutdown_tx, handle) = spawn_run(orchestrator(test_request(false, true), compute.clone()));

    advance(Duration::from_secs(1)).await;
    assert_eq!(compute.report_calls(), 1);
    assert_eq!(compute.launch_calls(), 0);
    assert!(!handle.is_finished());

    advance(INTERVAL).await;
    assert_eq!(compute.report_calls(), 2);
    assert_eq!(compute.launch_calls(), 0);

    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_check_only_never_launches_or_stops() {
    let compute = Arc::new(MockCompute::new().with_reports([MockReply::Ok(MockCompute::report(
        AvailabilityStatus::Available,
    ))]));
    let (shutdown_tx, handle) = spawn_run(orchestrator(test_request(true, false), compute.clone()));

    advance(INTERVAL * 10 + Duration::from_secs(1)).await;

    assert_eq!(compute.report_calls(), 11);
    assert_eq!(compute.launch_calls(), 0);
    assert!(!handle.is_finished());

    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_host_capacity_retries_after_interval() {
    let compute = Arc::new(MockCompute::new().with_launches([
        MockReply::Err(MockCompute::service_error(
            500,
            "InternalError",
            "Out of host capacity in ad-1",
        )),
        MockReply::Err(MockCompute::out_of_capacity()),
        MockReply::Ok(MockCompute::instance("ocid1.instance.third")),
    ]));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = Instant::now();
    let report = orchestrator(test_request(false, false), compute.clone())
        .run(shutdown_rx)
        .await;
    let elapsed = start.elapsed();

    assert_eq!(
        report.outcome,
        RunOutcome::Launched {
            instance_id: "ocid1.instance.third".to_string()
        }
    );
    assert_eq!(report.attempts, 3);
    assert_eq!(compute.launch_calls(), 3);
    assert!(elapsed >= INTERVAL * 2, "elapsed {elapsed:?}");
    assert!(elapsed < INTERVAL * 2 + Duration::from_secs(1), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_out_of_host_capacity_alone_never_stops() {
    let compute = Arc::new(
        MockCompute::new().with_launches([MockReply::Err(MockCompute::out_of_capacity())]),
    );
    let (shutdown_tx, handle) = spawn_run(orchestrator(test_request(false, false), compute.clone()));

    advance(INTERVAL * 5 + Duration::from_secs(1)).await;
    assert_eq!(compute.launch_calls(), 6);
    assert!(!handle.is_finished());

    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap().outcome, RunOutcome::Cancelled);
}

#[tokio::test]
async fn test_limit_exceeded_stops() {
    let compute = Arc::new(MockCompute::new().with_launches([MockReply::Err(
        MockCompute::service_error(400, "LimitExceeded", "LimitExceeded: max instance count reached"),
    )]));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = orchestrator(test_request(false, false), compute.clone())
        .run(shutdown_rx)
        .await;

    assert_eq!(report.outcome, RunOutcome::LimitExceeded);
    assert_eq!(report.attempts, 1);
    assert_eq!(compute.launch_calls(), 1);
}

#[tokio::test]
async fn test_peek_with_capacity_still_launches() {
    let compute = Arc::new(
        MockCompute::new()
            .with_reports([MockReply::Ok(MockCompute::report(AvailabilityStatus::Available))])
            .with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.peeked"))]),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = orchestrator(test_request(false, true), compute.clone())
        .run(shutdown_rx)
        .await;

    assert_eq!(
        report.outcome,
        RunOutcome::Launched {
            instance_id: "ocid1.instance.peeked".to_string()
        }
    );
    assert_eq!(compute.report_calls(), 1);
    assert_eq!(compute.launch_calls(), 1);

    let launched = compute.launched();
    assert_eq!(launched[0].display_name, "free-arm");
    assert_eq!(
        launched[0].metadata.get("ssh_authorized_keys").map(String::as_str),
        Some("ssh-ed25519 AAAA test")
    );
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_is_not_fatal() {
    let compute = Arc::new(
        MockCompute::new()
            .with_reports([
                MockReply::Err(MockCompute::service_error(503, "ServiceUnavailable", "busy")),
                MockReply::Ok(MockCompute::report(AvailabilityStatus::Available)),
            ])
            .with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.later"))]),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = orchestrator(test_request(false, true), compute.clone())
        .run(shutdown_rx)
        .await;

    assert_eq!(report.attempts, 2);
    assert_eq!(compute.report_calls(), 2);
    assert_eq!(compute.launch_calls(), 1);
    assert!(matches!(report.outcome, RunOutcome::Launched { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_error_is_retried() {
    let compute = Arc::new(MockCompute::new().with_launches([
        MockReply::Err(MockCompute::service_error(
            404,
            "NotAuthorizedOrNotFound",
            "Authorization failed or requested resource not found",
        )),
        MockReply::Ok(MockCompute::instance("ocid1.instance.second")),
    ]));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let report = orchestrator(test_request(false, false), compute.clone())
        .run(shutdown_rx)
        .await;

    assert_eq!(report.attempts, 2);
    assert_eq!(
        report.outcome,
        RunOutcome::Launched {
            instance_id: "ocid1.instance.second".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_wait() {
    let compute = Arc::new(
        MockCompute::new().with_launches([MockReply::Err(MockCompute::out_of_capacity())]),
    );
    let (shutdown_tx, handle) = spawn_run(orchestrator(test_request(false, false), compute.clone()));

    advance(Duration::from_secs(30)).await;
    let signalled_at = Instant::now();
    shutdown_tx.send(true).unwrap();

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.attempts, 1);
    assert_eq!(compute.launch_calls(), 1);
    assert!(signalled_at.elapsed() < Duration::from_secs(1));
}

/// Compute API whose launch call never answers in time.
struct HangingCompute;

#[async_trait]
impl ComputeApi for HangingCompute {
    async fn create_capacity_report(
        &self,
        _details: &CreateComputeCapacityReportDetails,
    ) -> Result<ComputeCapacityReport, OciError> {
        Ok(MockCompute::report(AvailabilityStatus::Available))
    }

    async fn launch_instance(&self, _details: &LaunchInstanceDetails) -> Result<Instance, OciError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(MockCompute::instance("ocid1.instance.too-late"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_in_flight_launch() {
    let orchestrator = RetryOrchestrator::new(
        test_request(false, false),
        Arc::new(HangingCompute),
        Arc::new(WebhookNotifier::new(None).unwrap()),
    );
    let (shutdown_tx, handle) = spawn_run(orchestrator);

    advance(Duration::from_secs(5)).await;
    shutdown_tx.send(true).unwrap();

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
}

/// Notifier that takes a while to deliver.
#[derive(Default)]
struct SlowNotifier {
    delivered: AtomicBool,
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn notify_launched(&self, _request: &ProvisionRequest, _instance_id: &str) {
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.delivered.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_notification_keeps_launch() {
    let compute = Arc::new(
        MockCompute::new()
            .with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.abc"))]),
    );
    let notifier = Arc::new(SlowNotifier::default());
    let orchestrator = RetryOrchestrator::new(
        test_request(false, false),
        compute.clone(),
        notifier.clone(),
    );
    let (shutdown_tx, handle) = spawn_run(orchestrator);

    advance(Duration::from_secs(2)).await;
    let signalled_at = Instant::now();
    shutdown_tx.send(true).unwrap();

    let report = handle.await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Launched {
            instance_id: "ocid1.instance.abc".to_string()
        }
    );
    assert_eq!(report.attempts, 1);
    assert_eq!(compute.launch_calls(), 1);
    assert!(signalled_at.elapsed() < Duration::from_secs(1));
    assert!(!notifier.delivered.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_slow_notification_completes_without_shutdown() {
    let compute = Arc::new(
        MockCompute::new()
            .with_launches([MockReply::Ok(MockCompute::instance("ocid1.instance.abc"))]),
    );
    let notifier = Arc::new(SlowNotifier::default());
    let orchestrator = RetryOrchestrator::new(
        test_request(false, false),
        compute.clone(),
        notifier.clone(),
    );
    let (_shutdown_tx, handle) = spawn_run(orchestrator);

    let report = handle.await.unwrap();
    assert!(matches!(report.outcome, RunOutcome::Launched { .. }));
    assert!(notifier.delivered.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_already_signalled_shutdown_runs_nothing() {
    let compute = Arc::new(MockCompute::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(true);

    let report = orchestrator(test_request(false, false), compute.clone())
        .run(shutdown_rx)
        .await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(compute.launch_calls(), 0);
}
