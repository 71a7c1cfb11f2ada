//! HTTP request signing for OCI APIs.
//!
//! Every OCI API call is authenticated with an `rsa-sha256` HTTP signature
//! (draft-cavage). The signature covers:
//! - `date`, `(request-target)` and `host` on every request
//! - `content-length`, `content-type` and `x-content-sha256` on requests with a body
//!
//! Reference: https://docs.oracle.com/en-us/iaas/Content/API/Concepts/signingrequests.htm

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

use crate::error::OciError;

/// Key id and private key used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl Credentials {
    /// Create credentials from a key id and an RSA private key.
    pub fn new(key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        }
    }

    /// The `keyId` placed in the `Authorization` header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Parse an unencrypted RSA private key in PKCS#1 or PKCS#8 PEM form.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, OciError> {
    if pem.contains("ENCRYPTED") {
        return Err(OciError::Key(
            "encrypted private keys are not supported".to_string(),
        ));
    }

    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| OciError::Key(e.to_string()))
}

/// Sign a request in place using the current time.
pub fn sign_request(request: &mut Request, credentials: &Credentials) -> Result<(), OciError> {
    sign_request_at(request, credentials, Utc::now())
}

/// Sign a request in place with an explicit `date`.
pub fn sign_request_at(
    request: &mut Request,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<(), OciError> {
    let signed = signed_headers(request, now)?;

    let signing_string = signed
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n");

    let signature = credentials
        .signing_key
        .try_sign(signing_string.as_bytes())
        .map_err(|e| OciError::Signing(e.to_string()))?;

    let header_names = signed
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(" ");

    let authorization = format!(
        "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        credentials.key_id,
        header_names,
        STANDARD.encode(signature.to_bytes())
    );

    let headers = request.headers_mut();
    for (name, value) in signed {
        if name == REQUEST_TARGET {
            continue;
        }
        headers.insert(HeaderName::from_static(name), header_value(&value)?);
    }
    headers.insert(AUTHORIZATION, header_value(&authorization)?);

    Ok(())
}

const REQUEST_TARGET: &str = "(request-target)";

/// Compute the ordered list of signed headers for a request.
fn signed_headers(
    request: &Request,
    now: DateTime<Utc>,
) -> Result<Vec<(&'static str, String)>, OciError> {
    let url = request.url();
    let host = url
        .host_str()
        .ok_or_else(|| OciError::Signing(format!("URL has no host: {url}")))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut target = format!("{} {}", request.method().as_str().to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut signed = vec![
        ("date", now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()),
        (REQUEST_TARGET, target),
        ("host", host),
    ];

    if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        let body = request
            .body()
            .and_then(|body| body.as_bytes())
            .unwrap_or_default();

        signed.push(("content-length", body.len().to_string()));
        signed.push(("content-type", "application/json".to_string()));
        signed.push(("x-content-sha256", STANDARD.encode(Sha256::digest(body))));
    }

    Ok(signed)
}

fn header_value(value: &str) -> Result<HeaderValue, OciError> {
    HeaderValue::from_str(value).map_err(|e| OciError::Signing(e.to_string()))
}
