//! Launch notifications.
//!
//! Posts a Discord-style embed to a webhook after a successful launch.
//! Delivery is best-effort: failures are logged and never returned to the
//! retry loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProvisionRequest;

const EMBED_TITLE: &str = "🎉 OCI Instance Launched!";
const EMBED_DESCRIPTION: &str = "The instance was created successfully.";
const EMBED_COLOR: u32 = 0x00FF00;

/// Webhook delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Receives launch notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Report a launched instance. Must not fail.
    async fn notify_launched(&self, request: &ProvisionRequest, instance_id: &str);
}

/// Notifier posting to a Discord-compatible webhook.
pub struct WebhookNotifier {
    client: Client,
    url: Option<Url>,
}

impl WebhookNotifier {
    /// Create a notifier with a 10 s request timeout. `None` disables delivery.
    pub fn new(url: Option<Url>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self::with_client(client, url))
    }

    /// Create a notifier sending through `client`.
    pub fn with_client(client: Client, url: Option<Url>) -> Self {
        Self { client, url }
    }

    /// Whether a webhook is configured.
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn deliver(&self, url: &Url, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let response = self.client.post(url.clone()).json(payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_launched(&self, request: &ProvisionRequest, instance_id: &str) {
        let Some(url) = &self.url else {
            debug!("No webhook configured, skipping notification");
            return;
        };

        let payload = WebhookPayload::launched(request, instance_id, Utc::now());
        match self.deliver(url, &payload).await {
            Ok(()) => info!(instance_id = %instance_id, "Launch notification sent"),
            Err(e) => warn!(error = %e, instance_id = %instance_id, "Launch notification failed"),
        }
    }
}

/// Webhook body: `{"embeds": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline,
        }
    }
}

impl WebhookPayload {
    /// Payload announcing a launched instance.
    pub fn launched(request: &ProvisionRequest, instance_id: &str, at: DateTime<Utc>) -> Self {
        let embed = Embed {
            title: EMBED_TITLE.to_string(),
            description: EMBED_DESCRIPTION.to_string(),
            color: EMBED_COLOR,
            fields: vec![
                EmbedField::new("Name", request.display_name.as_str(), true),
                EmbedField::new("Shape", request.shape.as_str(), true),
                EmbedField::new("OCPUs", format!("{:.0}", request.ocpus), true),
                EmbedField::new("Memory (GB)", format!("{:.0}", request.memory_in_gbs), true),
                EmbedField::new("Availability Domain", request.availability_domain.as_str(), false),
                EmbedField::new("OCID", instance_id, false),
            ],
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        Self {
            embeds: vec![embed],
        }
    }
}
