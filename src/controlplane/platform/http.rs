//! HTTP Platform Adapter
//!
//! Reads inventory from the virtualization platform's REST endpoint and
//! logs out its sessions on shutdown.
//!
//! Inventory reads are idempotent and retried with exponential backoff on
//! connection failures and 5xx responses. Session logout is mutating and is
//! attempted exactly once.

use crate::domain::ports::{InventoryProvider, PlatformSessions};
use crate::error::{Error, Result};
use crate::inventory::{InventoryDocument, InventorySnapshot};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the HTTP platform adapter
#[derive(Debug, Clone)]
pub struct HttpPlatformConfig {
    /// Base URL, e.g. `https://vcenter.example.com`
    pub base_url: String,
    /// Bearer token for the platform API
    pub token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Upper bound on the time spent retrying one inventory read
    pub max_retry_elapsed: Duration,
}

impl HttpPlatformConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
            max_retry_elapsed: Duration::from_secs(60),
        }
    }
}

/// Platform adapter over HTTP
pub struct HttpPlatform {
    client: reqwest::Client,
    config: HttpPlatformConfig,
}

impl HttpPlatform {
    pub fn new(config: HttpPlatformConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_inventory(&self) -> std::result::Result<InventoryDocument, backoff::Error<Error>> {
        let response = self
            .authorize(self.client.get(self.url("/api/v1/inventory")))
            .send()
            .await
            .map_err(|e| {
                warn!("Inventory request failed, will retry: {}", e);
                backoff::Error::transient(Error::from(e))
            })?;

        let status = response.status();
        if status.is_server_error() {
            warn!("Inventory endpoint returned {}, will retry", status);
            return Err(backoff::Error::transient(Error::transport(
                "read inventory",
                format!("platform returned {}", status),
            )));
        }
        if !status.is_success() {
            return Err(backoff::Error::permanent(Error::transport(
                "read inventory",
                format!("platform returned {}", status),
            )));
        }

        response
            .json::<InventoryDocument>()
            .await
            .map_err(|e| backoff::Error::permanent(Error::from(e)))
    }
}

#[async_trait]
impl InventoryProvider for HttpPlatform {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.config.max_retry_elapsed))
            .build();

        let doc = backoff::future::retry(policy, || self.fetch_inventory()).await?;
        debug!(
            "Fetched inventory: {} zone(s), {} pool(s)",
            doc.domains.len(),
            doc.pools.len()
        );
        Ok(InventorySnapshot::from_document(doc))
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl PlatformSessions for HttpPlatform {
    async fn logout_all(&self) -> Result<()> {
        let response = self
            .authorize(self.client.post(self.url("/api/v1/sessions/logout")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::transport(
                "logout sessions",
                format!("platform returned {}", response.status()),
            ));
        }
        info!("Logged out platform sessions at {}", self.config.base_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{PoolId, VolumeId};
    use assert_matches::assert_matches;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn platform(server: &MockServer) -> HttpPlatform {
        let mut config = HttpPlatformConfig::new(server.uri());
        config.token = Some("secret".into());
        config.max_retry_elapsed = Duration::from_secs(2);
        HttpPlatform::new(config).unwrap()
    }

    fn inventory_body() -> serde_json::Value {
        serde_json::json!({
            "domains": [],
            "pools": [{
                "id": "ds-1",
                "domain": { "category": "topology.kubernetes.io/zone", "value": "zone-1" },
                "totalBytes": 100,
                "usedBytes": 10
            }],
            "replicas": { "vol-1": ["ds-1"] }
        })
    }

    #[tokio::test]
    async fn test_snapshot_reads_inventory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/inventory"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(inventory_body()))
            .mount(&server)
            .await;

        let snapshot = platform(&server).snapshot().await.unwrap();
        assert_eq!(snapshot.pools.len(), 1);
        assert_eq!(snapshot.domains.len(), 1);
        assert_eq!(snapshot.copies_of(&VolumeId::new("vol-1")).count(), 1);
        assert!(snapshot.pool(&PoolId::new("ds-1")).unwrap().accessible);
    }

    #[tokio::test]
    async fn test_snapshot_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/inventory"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(inventory_body()))
            .mount(&server)
            .await;

        let snapshot = platform(&server).snapshot().await.unwrap();
        assert_eq!(snapshot.pools.len(), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/inventory"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let result = platform(&server).snapshot().await;
        assert_matches!(result, Err(Error::TransportFailure { .. }));
    }

    #[tokio::test]
    async fn test_logout_posts_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/sessions/logout"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        platform(&server).logout_all().await.unwrap();
    }
}
