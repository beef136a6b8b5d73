//! reqwest-backed [`RemoteApi`]

use super::{Endpoint, HttpMethod, RemoteApi};
use crate::auth::CredentialsProvider;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL, e.g. "https://api.example.org/prod"
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Backend client over HTTPS with bearer authentication.
///
/// Connectivity is checked before anything goes on the wire; a rejected
/// credential asks the provider for a refresh and fails the request.
pub struct HttpApiClient {
    config: HttpApiConfig,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
    connectivity: ConnectivityMonitor,
}

impl HttpApiClient {
    pub fn new(
        config: HttpApiConfig,
        credentials: Arc<dyn CredentialsProvider>,
        connectivity: ConnectivityMonitor,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            credentials,
            connectivity,
        })
    }

    pub fn config(&self) -> &HttpApiConfig {
        &self.config
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path_and_query)
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn request(&self, endpoint: &Endpoint) -> Result<serde_json::Value> {
        if !self.connectivity.is_online() {
            return Err(SyncError::NotConnected);
        }

        let token = self
            .credentials
            .access_token()
            .ok_or_else(|| SyncError::CredentialMissing("no access token".into()))?;

        let descriptor = endpoint.descriptor();
        let url = self.url(&descriptor.path_and_query());

        let mut request = match descriptor.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Put => self.http.put(&url),
        }
        .bearer_auth(token);

        if let Some(body) = &descriptor.body {
            request = request.json(body);
        }

        debug!(endpoint = endpoint.name(), url = %url, "Sending request");
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => {
                    warn!(endpoint = endpoint.name(), status = status.as_u16(), "Credential rejected");
                    self.credentials.request_refresh();
                    SyncError::CredentialMissing(format!("HTTP {}", status.as_u16()))
                }
                400 | 422 => SyncError::RequestMalformed(format!("HTTP {} - {}", status.as_u16(), body)),
                404 => SyncError::NotFound(endpoint.to_string()),
                code => SyncError::Server {
                    status: Some(code),
                    message: body,
                },
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            // A write the server accepted is acknowledged even if the body is not JSON
            Err(e) if descriptor.method != HttpMethod::Get => {
                debug!(endpoint = endpoint.name(), error = %e, "Ignoring non-JSON write response");
                Ok(serde_json::Value::Null)
            }
            Err(e) => Err(SyncError::Decode(format!("{}: {}", endpoint.name(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let credentials = Arc::new(StaticCredentials::new("token"));
        let client = HttpApiClient::new(
            HttpApiConfig::default(),
            credentials,
            ConnectivityMonitor::new(false),
        )
        .unwrap();

        let err = client.request(&Endpoint::ListBehaviors).await.unwrap_err();
        assert_eq!(err, SyncError::NotConnected);
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_send() {
        let client = HttpApiClient::new(
            HttpApiConfig::default(),
            Arc::new(StaticCredentials::none()),
            ConnectivityMonitor::new(true),
        )
        .unwrap();

        let err = client.request(&Endpoint::ListLocations).await.unwrap_err();
        assert!(matches!(err, SyncError::CredentialMissing(_)));
    }

    #[test]
    fn test_url_joins_base() {
        let client = HttpApiClient::new(
            HttpApiConfig {
                base_url: "https://api.example.org/prod/".into(),
                ..Default::default()
            },
            Arc::new(StaticCredentials::none()),
            ConnectivityMonitor::new(true),
        )
        .unwrap();

        assert_eq!(
            client.url("/juvenile?event_id=1"),
            "https://api.example.org/prod/juvenile?event_id=1"
        );
    }
}
