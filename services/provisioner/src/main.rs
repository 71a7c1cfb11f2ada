//! flexgrab
//!
//! Retries an OCI instance launch on a fixed interval until it succeeds, the
//! service limit is reached, or the process is told to stop.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flexgrab_oci::{auth, ComputeClient};
use flexgrab_provisioner::{
    Args, LogFormat, RetryOrchestrator, RunOutcome, WebhookNotifier,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables win
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to FLEXGRAB_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with((args.log_format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .with((args.log_format == LogFormat::Text).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting flexgrab");
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded .env file");
    }

    let request = args
        .provision_request()
        .context("Invalid configuration")?;
    if request.ssh_public_key.is_empty() {
        warn!("OCI_SSH_PUBLIC_KEY is empty; the instance will not accept SSH logins");
    }
    info!(
        display_name = %request.display_name,
        shape = %request.shape,
        availability_domain = %request.availability_domain,
        notifications = request.webhook_url.is_some(),
        "Configuration loaded"
    );

    let provider = auth::resolve(&args.auth_options())
        .await
        .context("Failed to resolve OCI credentials")?;
    info!(auth = provider.name(), region = provider.region(), "Using OCI credentials");

    let compute = ComputeClient::new(provider, args.compute_endpoint.clone())
        .context("Failed to create compute client")?;
    info!(endpoint = compute.endpoint(), "Compute client ready");

    let notifier = WebhookNotifier::new(request.webhook_url.clone())
        .context("Failed to create webhook client")?;
    let orchestrator = RetryOrchestrator::new(request, Arc::new(compute), Arc::new(notifier));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let report = orchestrator.run(shutdown_rx).await;
    match report.outcome {
        RunOutcome::Launched { instance_id } => {
            info!(instance_id = %instance_id, attempts = report.attempts, "Instance created, exiting")
        }
        RunOutcome::LimitExceeded => {
            info!(attempts = report.attempts, "Service limit reached, exiting")
        }
        RunOutcome::Cancelled => info!(attempts = report.attempts, "Stopped by signal"),
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
