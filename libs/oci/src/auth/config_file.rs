//! API key credentials from an OCI CLI config file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use config::{Config, File, FileFormat, Value};
use directories::BaseDirs;

use super::AuthProvider;
use crate::error::OciError;
use crate::signer::{parse_private_key, Credentials};

/// Profile read when none is specified.
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Credentials from one profile of `~/.oci/config`.
#[derive(Debug)]
pub struct ConfigFileProvider {
    region: String,
    credentials: Credentials,
}

impl ConfigFileProvider {
    /// `~/.oci/config`.
    pub fn default_path() -> Result<PathBuf, OciError> {
        home_dir()
            .map(|home| home.join(".oci").join("config"))
            .ok_or_else(|| OciError::Config("could not determine home directory".to_string()))
    }

    /// Load a profile and its private key.
    pub fn load(path: &Path, profile: &str) -> Result<Self, OciError> {
        let contents = std::fs::read_to_string(path).map_err(|source| OciError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let section = read_profile(&contents, profile)
            .map_err(|e| OciError::Config(format!("{}: {e}", path.display())))?
            .ok_or_else(|| {
                OciError::Config(format!("profile [{profile}] not found in {}", path.display()))
            })?;

        let tenancy = required(&section, profile, "tenancy")?;
        let user = required(&section, profile, "user")?;
        let fingerprint = required(&section, profile, "fingerprint")?;
        let region = required(&section, profile, "region")?;
        let key_file = expand_home(required(&section, profile, "key_file")?);

        let pem = std::fs::read_to_string(&key_file).map_err(|source| OciError::Io {
            path: key_file.clone(),
            source,
        })?;
        let private_key = parse_private_key(&pem).map_err(|e| {
            if section.contains_key("pass_phrase") {
                OciError::Key(format!(
                    "{}: passphrase-protected keys are not supported",
                    key_file.display()
                ))
            } else {
                e
            }
        })?;

        Ok(Self {
            region: region.to_string(),
            credentials: Credentials::new(
                format!("{tenancy}/{user}/{fingerprint}"),
                private_key,
            ),
        })
    }
}

#[async_trait]
impl AuthProvider for ConfigFileProvider {
    fn name(&self) -> &'static str {
        "config_file"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn credentials(&self) -> Result<Credentials, OciError> {
        Ok(self.credentials.clone())
    }
}

fn required<'a>(
    section: &'a HashMap<String, String>,
    profile: &str,
    name: &str,
) -> Result<&'a str, OciError> {
    section
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OciError::Config(format!("profile [{profile}] is missing '{name}'")))
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Read one INI section as `key -> value`.
///
/// Profile names match exactly, falling back to a case-insensitive match.
/// Keys outside any section are ignored.
fn read_profile(
    contents: &str,
    profile: &str,
) -> Result<Option<HashMap<String, String>>, config::ConfigError> {
    let mut sections: HashMap<String, Value> = Config::builder()
        .add_source(File::from_str(contents, FileFormat::Ini))
        .build()?
        .try_deserialize()?;

    let name = sections
        .keys()
        .find(|name| name.as_str() == profile)
        .or_else(|| sections.keys().find(|name| name.eq_ignore_ascii_case(profile)))
        .cloned();
    let Some(section) = name.and_then(|name| sections.remove(&name)) else {
        return Ok(None);
    };

    section
        .into_table()?
        .into_iter()
        .map(|(key, value)| {
            Ok::<_, config::ConfigError>((key.to_ascii_lowercase(), value.into_string()?))
        })
        .collect::<Result<_, _>>()
        .map(Some)
}
