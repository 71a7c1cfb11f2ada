//! Configuration for the provisioner.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback. Variables may also come from a `.env` file, loaded by `main`
//! before parsing.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use flexgrab_oci::{AuthMode, AuthOptions};
use reqwest::Url;
use thiserror::Error;

/// Shape launched when `OCI_SHAPE` is unset.
pub const DEFAULT_SHAPE: &str = "VM.Standard.A1.Flex";

/// Retry interval used when `RETRY_DELAY` is unset or zero.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Configuration errors. All are fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("{name} must be a positive number, got {value}")]
    InvalidSize { name: &'static str, value: f32 },

    #[error("invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),
}

/// Boolean settings are on only for `true`, in any case. Anything else is off.
fn parse_flag(value: &str) -> Result<bool, Infallible> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flexgrab",
    version,
    about = "Keep trying to launch an OCI instance until capacity frees up"
)]
pub struct Args {
    /// Compartment to launch into.
    #[arg(long, env = "OCI_COMPARTMENT_ID")]
    pub compartment_id: Option<String>,

    /// Subnet for the primary VNIC.
    #[arg(long, env = "OCI_SUBNET_ID")]
    pub subnet_id: Option<String>,

    /// Boot image.
    #[arg(long, env = "OCI_IMAGE_ID")]
    pub image_id: Option<String>,

    /// Public key installed as `ssh_authorized_keys`.
    #[arg(long, env = "OCI_SSH_PUBLIC_KEY")]
    pub ssh_public_key: Option<String>,

    /// Availability domain (e.g. `Uocm:PHX-AD-1`).
    #[arg(long, env = "OCI_AVAILABILITY_DOMAIN")]
    pub availability_domain: Option<String>,

    /// Display name of the new instance.
    #[arg(long, env = "OCI_DISPLAY_NAME")]
    pub display_name: Option<String>,

    /// Compute shape.
    #[arg(long, env = "OCI_SHAPE", default_value = DEFAULT_SHAPE)]
    pub shape: String,

    /// OCPU count for the flexible shape.
    #[arg(long, env = "OCPUS", default_value_t = 4.0)]
    pub ocpus: f32,

    /// Memory in GB for the flexible shape.
    #[arg(long, env = "MEMORY_IN_GBS", default_value_t = 24.0)]
    pub memory_in_gbs: f32,

    /// Seconds between attempts; 0 means the default of 60.
    #[arg(long, env = "RETRY_DELAY")]
    pub retry_delay: Option<u64>,

    /// Only report capacity; never launch and never exit on its own.
    #[arg(
        long,
        env = "CHECK_ONLY",
        action = ArgAction::SetTrue,
        value_parser = parse_flag
    )]
    pub check_only: bool,

    /// Skip the launch call when a capacity report shows no room.
    #[arg(
        long = "peek",
        env = "PEEK_BEFORE_LAUNCH",
        action = ArgAction::SetTrue,
        value_parser = parse_flag
    )]
    pub peek_before_launch: bool,

    /// Discord-compatible webhook notified after a successful launch.
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Credential strategy: auto, instance-principal or config-file.
    #[arg(long, env = "OCI_AUTH", default_value = "auto")]
    pub auth: AuthMode,

    /// OCI CLI config file (defaults to ~/.oci/config).
    #[arg(long, env = "OCI_CONFIG_FILE")]
    pub oci_config_file: Option<PathBuf>,

    /// Profile within the OCI CLI config file.
    #[arg(long, env = "OCI_CLI_PROFILE")]
    pub oci_profile: Option<String>,

    /// Override the regional Compute endpoint.
    #[arg(long, env = "OCI_COMPUTE_ENDPOINT")]
    pub compute_endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "FLEXGRAB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "FLEXGRAB_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Args {
    /// Validate the arguments and build the immutable launch request.
    pub fn provision_request(&self) -> Result<ProvisionRequest, ConfigError> {
        let mut missing = Vec::new();
        let mut required = |value: &Option<String>, name: &'static str| -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let compartment_id = required(&self.compartment_id, "OCI_COMPARTMENT_ID");
        let subnet_id = required(&self.subnet_id, "OCI_SUBNET_ID");
        let image_id = required(&self.image_id, "OCI_IMAGE_ID");
        let availability_domain = required(&self.availability_domain, "OCI_AVAILABILITY_DOMAIN");
        let display_name = required(&self.display_name, "OCI_DISPLAY_NAME");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        for (name, value) in [("OCPUS", self.ocpus), ("MEMORY_IN_GBS", self.memory_in_gbs)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidSize { name, value });
            }
        }

        let webhook_url = self
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| Url::parse(url).map_err(|e| ConfigError::InvalidWebhookUrl(e.to_string())))
            .transpose()?;

        let retry_secs = match self.retry_delay {
            Some(secs) if secs > 0 => secs,
            _ => DEFAULT_RETRY_DELAY_SECS,
        };

        Ok(ProvisionRequest {
            compartment_id,
            subnet_id,
            image_id,
            ssh_public_key: self.ssh_public_key.clone().unwrap_or_default(),
            availability_domain,
            display_name,
            shape: self.shape.clone(),
            ocpus: self.ocpus,
            memory_in_gbs: self.memory_in_gbs,
            retry_interval: Duration::from_secs(retry_secs),
            check_only: self.check_only,
            peek_before_launch: self.peek_before_launch,
            webhook_url,
        })
    }

    /// Options for resolving OCI credentials.
    pub fn auth_options(&self) -> AuthOptions {
        AuthOptions {
            mode: self.auth,
            config_file: self.oci_config_file.clone(),
            profile: self.oci_profile.clone(),
            metadata_url: None,
        }
    }
}

/// Everything needed to launch the instance, fixed for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub compartment_id: String,
    pub subnet_id: String,
    pub image_id: String,
    pub ssh_public_key: String,
    pub availability_domain: String,
    pub display_name: String,
    pub shape: String,
    pub ocpus: f32,
    pub memory_in_gbs: f32,
    pub retry_interval: Duration,
    pub check_only: bool,
    pub peek_before_launch: bool,
    pub webhook_url: Option<Url>,
}

impl ProvisionRequest {
    /// Whether each iteration starts with a capacity report.
    pub fn peeks(&self) -> bool {
        self.peek_before_launch || self.check_only
    }
}
