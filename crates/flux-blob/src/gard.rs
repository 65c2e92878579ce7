//! HTTP client for the Gard blob service.
//!
//! | Operation       | Request                         |
//! |-----------------|---------------------------------|
//! | `store`         | `POST {base}/upload/{name}`     |
//! | `fetch`         | `GET {base}/download/{name}`    |
//! | `report_metric` | `POST {base}/speed?value={v}`   |
//!
//! Anything other than `200 OK` is a failure.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flux_core::{BlobError, BlobPort};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};

#[derive(Clone, Debug)]
pub struct GardConfig {
    pub base_url: String,
    /// Bound on each request, connect through body.
    pub timeout: Duration,
}

impl Default for GardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Blob Port backed by Gard.
#[derive(Clone)]
pub struct GardClient {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl GardClient {
    pub fn new(config: GardConfig) -> Result<Self, BlobError> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            BlobError::Network(format!("invalid gard url {}: {e}", config.base_url))
        })?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BlobError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base,
            timeout: config.timeout,
        })
    }

    /// `{base}/{action}/{name}` with `name` encoded as a single segment.
    fn blob_url(&self, action: &str, name: &str) -> Result<Url, BlobError> {
        if name.is_empty() {
            return Err(BlobError::InvalidName(name.to_string()));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BlobError::Network(format!("url cannot take a path: {}", self.base)))?
            .pop_if_empty()
            .extend([action, name]);
        Ok(url)
    }

    fn transport(&self, e: reqwest::Error) -> BlobError {
        if e.is_timeout() {
            BlobError::Timeout(self.timeout)
        } else {
            BlobError::Network(e.to_string())
        }
    }

    async fn expect_ok(
        &self,
        resp: reqwest::Response,
        name: &str,
    ) -> Result<reqwest::Response, BlobError> {
        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BlobError::from_status(status.as_u16(), body, name))
    }
}

#[async_trait]
impl BlobPort for GardClient {
    async fn store(&self, name: &str, payload: Bytes) -> Result<(), BlobError> {
        let url = self.blob_url("upload", name)?;
        let size = payload.len();
        let resp = self
            .client
            .post(url)
            .body(payload)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let _ = self.expect_ok(resp, name).await?;
        tracing::debug!(name, bytes = size, "stored blob");
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Bytes, BlobError> {
        let url = self.blob_url("download", name)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let resp = self.expect_ok(resp, name).await?;
        resp.bytes().await.map_err(|e| self.transport(e))
    }

    async fn report_metric(&self, value: f64) -> Result<(), BlobError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BlobError::Network(format!("url cannot take a path: {}", self.base)))?
            .pop_if_empty()
            .push("speed");
        url.query_pairs_mut()
            .append_pair("value", &format!("{value:.6}"));

        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let _ = self.expect_ok(resp, "speed").await?;
        Ok(())
    }
}
