//! Compute service client.
//!
//! Provides the two calls the provisioner needs:
//! - Launching an instance
//! - Creating a capacity report for a shape

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::AuthProvider;
use crate::error::{OciError, ServiceError};
use crate::models::{
    ComputeCapacityReport, CreateComputeCapacityReportDetails, ErrorBody, Instance,
    LaunchInstanceDetails,
};
use crate::signer::sign_request;

/// Compute API version path.
const API_VERSION: &str = "20160918";

const SERVICE_NAME: &str = "Compute";

/// Signed client for the Compute API.
pub struct ComputeClient {
    http: Client,
    endpoint: String,
    auth: Arc<dyn AuthProvider>,
}

impl ComputeClient {
    /// Create a client for the provider's region.
    ///
    /// `endpoint` overrides the regional `https://iaas.<region>.oraclecloud.com`.
    pub fn new(auth: Arc<dyn AuthProvider>, endpoint: Option<String>) -> Result<Self, OciError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        let endpoint = endpoint
            .unwrap_or_else(|| regional_endpoint(auth.region()))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            endpoint,
            auth,
        })
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Launch a new instance.
    pub async fn launch_instance(
        &self,
        details: &LaunchInstanceDetails,
    ) -> Result<Instance, OciError> {
        self.post("instances/", details).await
    }

    /// Ask the provider whether the given shapes currently have capacity.
    pub async fn create_compute_capacity_report(
        &self,
        details: &CreateComputeCapacityReportDetails,
    ) -> Result<ComputeCapacityReport, OciError> {
        self.post("computeCapacityReports", details).await
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, OciError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}/{}", self.endpoint, API_VERSION, path);
        debug!(url = %url, auth = self.auth.name(), "Sending Compute request");

        let credentials = self.auth.credentials().await?;
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(serde_json::to_vec(body)?)
            .build()?;
        sign_request(&mut request, &credentials)?;

        let response = self.http.execute(request).await?;
        let status = response.status();

        if !status.is_success() {
            let opc_request_id = response
                .headers()
                .get("opc-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let text = response.text().await.unwrap_or_default();
            let body: ErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ErrorBody {
                code: status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .replace(' ', ""),
                message: text,
            });

            return Err(ServiceError {
                service: SERVICE_NAME.to_string(),
                status: status.as_u16(),
                code: body.code,
                message: body.message,
                opc_request_id,
            }
            .into());
        }

        Ok(response.json().await?)
    }
}

/// Regional Compute endpoint in the commercial realm.
pub fn regional_endpoint(region: &str) -> String {
    format!("https://iaas.{region}.oraclecloud.com")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_endpoint() {
        assert_eq!(
            regional_endpoint("eu-frankfurt-1"),
            "https://iaas.eu-frankfurt-1.oraclecloud.com"
        );
    }
}
