//! Credential providers.
//!
//! Two strategies are supported:
//! - **Instance principal**: the instance's own identity certificate, exchanged
//!   for a short-lived security token. Only works on OCI instances.
//! - **Config file**: an API signing key referenced from `~/.oci/config`.
//!
//! [`resolve`] picks one according to [`AuthMode`].

mod config_file;
mod instance_principal;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

pub use config_file::{ConfigFileProvider, DEFAULT_PROFILE};
pub use instance_principal::{InstancePrincipalProvider, METADATA_BASE_URL};

use crate::error::OciError;
use crate::signer::Credentials;

/// Source of signing credentials.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Region identifier (e.g. `us-ashburn-1`).
    fn region(&self) -> &str;

    /// Credentials valid for signing a request right now.
    async fn credentials(&self) -> Result<Credentials, OciError>;
}

/// Which credential strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Instance principal, falling back to the config file.
    #[default]
    Auto,
    InstancePrincipal,
    ConfigFile,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(Self::Auto),
            "instance-principal" => Ok(Self::InstancePrincipal),
            "config-file" | "api-key" => Ok(Self::ConfigFile),
            other => Err(format!(
                "unknown auth mode '{other}' (expected auto, instance-principal or config-file)"
            )),
        }
    }
}

/// Options for [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
    pub mode: AuthMode,

    /// Config file path; `~/.oci/config` when unset.
    pub config_file: Option<PathBuf>,

    /// Profile name; `DEFAULT` when unset.
    pub profile: Option<String>,

    /// Metadata service base URL; the link-local endpoint when unset.
    pub metadata_url: Option<String>,
}

/// Resolve a credential provider.
///
/// In [`AuthMode::Auto`] an instance principal failure is logged and the
/// config file is used instead. An error from the last strategy tried is
/// returned to the caller.
pub async fn resolve(options: &AuthOptions) -> Result<Arc<dyn AuthProvider>, OciError> {
    if options.mode != AuthMode::ConfigFile {
        let metadata_url = options.metadata_url.as_deref().unwrap_or(METADATA_BASE_URL);
        match InstancePrincipalProvider::discover(metadata_url).await {
            Ok(provider) => {
                info!(region = %provider.region(), "Using instance principal for authentication");
                return Ok(Arc::new(provider));
            }
            Err(e) if options.mode == AuthMode::Auto => {
                warn!(
                    error = %e,
                    "Instance principal not available, falling back to config file"
                );
            }
            Err(e) => return Err(e),
        }
    }

    let path = match &options.config_file {
        Some(path) => path.clone(),
        None => ConfigFileProvider::default_path()?,
    };
    let profile = options.profile.as_deref().unwrap_or(DEFAULT_PROFILE);

    let provider = ConfigFileProvider::load(&path, profile)?;
    info!(
        path = %path.display(),
        profile,
        region = %provider.region(),
        "Using config file for authentication"
    );
    Ok(Arc::new(provider))
}
