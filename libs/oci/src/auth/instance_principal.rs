//! Instance principal credentials.
//!
//! An OCI instance can authenticate as itself:
//! 1. Read its identity certificate, key and intermediate from the metadata service
//! 2. Generate an ephemeral session key pair
//! 3. Exchange the certificate for a security token at the federation endpoint
//! 4. Sign API calls with the session key and key id `ST$<token>`
//!
//! Tokens are short-lived; they are refreshed shortly before they expire.

use std::time::Duration;

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::AuthProvider;
use crate::error::OciError;
use crate::signer::{parse_private_key, sign_request, Credentials};

/// Link-local metadata service, version 2.
pub const METADATA_BASE_URL: &str = "http://169.254.169.254/opc/v2";

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

const SESSION_KEY_BITS: usize = 2048;

/// Credentials derived from the instance's own identity.
pub struct InstancePrincipalProvider {
    http: Client,
    metadata_url: String,
    federation_url: String,
    region: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for InstancePrincipalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePrincipalProvider")
            .field("region", &self.region)
            .field("federation_url", &self.federation_url)
            .finish_non_exhaustive()
    }
}

struct Session {
    credentials: Credentials,
    expires_at: DateTime<Utc>,
}

struct Identity {
    leaf_der: Vec<u8>,
    intermediate_der: Vec<Vec<u8>>,
    leaf_key: RsaPrivateKey,
    tenancy_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct X509FederationRequest {
    certificate: String,
    public_key: String,
    intermediate_certificates: Vec<String>,
    purpose: &'static str,
    fingerprint_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
struct X509FederationResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

impl InstancePrincipalProvider {
    /// Discover the instance identity and obtain a first security token.
    ///
    /// Fails quickly when the metadata service is unreachable, which is the
    /// normal case when not running on an OCI instance.
    pub async fn discover(metadata_url: &str) -> Result<Self, OciError> {
        Self::discover_with(metadata_url, None).await
    }

    /// Like [`discover`](Self::discover), with an explicit federation endpoint.
    pub async fn discover_with(
        metadata_url: &str,
        federation_url: Option<&str>,
    ) -> Result<Self, OciError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()?;
        let metadata_url = metadata_url.trim_end_matches('/').to_string();

        let region = fetch_metadata(&http, &metadata_url, "instance/canonicalRegionName")
            .await?
            .trim()
            .to_string();
        let federation_url = federation_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://auth.{region}.oraclecloud.com/v1/x509"));

        let session = new_session(&http, &metadata_url, &federation_url).await?;
        info!(
            region = %region,
            expires_at = %session.expires_at,
            "Obtained instance principal security token"
        );

        Ok(Self {
            http,
            metadata_url,
            federation_url,
            region,
            session: Mutex::new(session),
        })
    }
}

#[async_trait]
impl AuthProvider for InstancePrincipalProvider {
    fn name(&self) -> &'static str {
        "instance_principal"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn credentials(&self) -> Result<Credentials, OciError> {
        let mut session = self.session.lock().await;

        if session.expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS) <= Utc::now() {
            debug!(expires_at = %session.expires_at, "Refreshing instance principal token");
            *session = new_session(&self.http, &self.metadata_url, &self.federation_url).await?;
        }

        Ok(session.credentials.clone())
    }
}

async fn new_session(
    http: &Client,
    metadata_url: &str,
    federation_url: &str,
) -> Result<Session, OciError> {
    let identity = fetch_identity(http, metadata_url).await?;

    let session_key = tokio::task::spawn_blocking(|| {
        let mut rng = rsa::rand_core::OsRng;
        RsaPrivateKey::new(&mut rng, SESSION_KEY_BITS)
    })
    .await
    .map_err(|e| OciError::Key(e.to_string()))?
    .map_err(|e| OciError::Key(e.to_string()))?;

    let token = federate(http, federation_url, &identity, &session_key).await?;
    let expires_at = token_expiry(&token)?;

    Ok(Session {
        credentials: Credentials::new(format!("ST${token}"), session_key),
        expires_at,
    })
}

async fn fetch_metadata(http: &Client, base: &str, path: &str) -> Result<String, OciError> {
    let url = format!("{base}/{path}");
    let response = http
        .get(&url)
        .header("Authorization", "Bearer Oracle")
        .send()
        .await
        .map_err(|e| OciError::Identity(format!("{url}: {e}")))?;

    if !response.status().is_success() {
        return Err(OciError::Identity(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    Ok(response.text().await?)
}

async fn fetch_identity(http: &Client, metadata_url: &str) -> Result<Identity, OciError> {
    let leaf_pem = fetch_metadata(http, metadata_url, "identity/cert.pem").await?;
    let key_pem = fetch_metadata(http, metadata_url, "identity/key.pem").await?;
    let intermediate_pem = fetch_metadata(http, metadata_url, "identity/intermediate.pem").await?;

    let leaf_der = pem_certificates(&leaf_pem)?
        .into_iter()
        .next()
        .ok_or_else(|| OciError::Identity("no leaf certificate in cert.pem".to_string()))?;
    let intermediate_der = pem_certificates(&intermediate_pem)?;
    let tenancy_id = tenancy_from_certificate(&leaf_der)?;

    Ok(Identity {
        leaf_der,
        intermediate_der,
        leaf_key: parse_private_key(&key_pem)?,
        tenancy_id,
    })
}

async fn federate(
    http: &Client,
    federation_url: &str,
    identity: &Identity,
    session_key: &RsaPrivateKey,
) -> Result<String, OciError> {
    let public_key = session_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| OciError::Key(e.to_string()))?;

    let body = X509FederationRequest {
        certificate: STANDARD.encode(&identity.leaf_der),
        public_key: STANDARD.encode(public_key.as_bytes()),
        intermediate_certificates: identity
            .intermediate_der
            .iter()
            .map(|der| STANDARD.encode(der))
            .collect(),
        purpose: "DEFAULT",
        fingerprint_algorithm: "SHA256",
    };

    let leaf_credentials = Credentials::new(
        format!(
            "{}/fed-x509-sha256/{}",
            identity.tenancy_id,
            fingerprint(&identity.leaf_der)
        ),
        identity.leaf_key.clone(),
    );

    let mut request = http
        .post(federation_url)
        .header("Content-Type", "application/json")
        .body(serde_json::to_vec(&body)?)
        .build()?;
    sign_request(&mut request, &leaf_credentials)?;

    let response = http.execute(request).await?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(OciError::Federation(format!("{status}: {text}")));
    }

    let payload: X509FederationResponse = response.json().await?;
    Ok(payload.token)
}

fn pem_certificates(pem: &str) -> Result<Vec<Vec<u8>>, OciError> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OciError::Identity(format!("invalid certificate PEM: {e}")))
}

/// Extract the tenancy OCID from the leaf certificate subject.
fn tenancy_from_certificate(der: &[u8]) -> Result<String, OciError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| OciError::Identity(format!("invalid leaf certificate: {e}")))?;
    let subject = cert.subject();

    let tenancy = subject
        .iter_organizational_unit()
        .chain(subject.iter_organization())
        .filter_map(|attr| attr.as_str().ok())
        .find_map(|value| {
            value
                .strip_prefix("opc-tenant:")
                .or_else(|| value.strip_prefix("opc-identity:"))
        })
        .map(str::to_string)
        .ok_or_else(|| OciError::Identity("no tenancy id in certificate subject".to_string()));
    tenancy
}

/// Colon-separated upper-case SHA-256 of a DER certificate.
fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Read the `exp` claim of a JWT without verifying it.
fn token_expiry(token: &str) -> Result<DateTime<Utc>, OciError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| OciError::Federation("security token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OciError::Federation(format!("invalid token payload: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)?;

    DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| OciError::Federation(format!("invalid token expiry {}", claims.exp)))
}
