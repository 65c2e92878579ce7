//! Redpanda HTTP Proxy client (Kafka REST v2 API).
//!
//! Producing is a single `POST /topics/{topic}`. Consuming uses one consumer
//! instance per session in its own group, so every session receives every
//! message published after it subscribed.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use flux_core::{BusError, BusPort, BusSubscription, SessionId};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

const BINARY_V2: &str = "application/vnd.kafka.binary.v2+json";
const JSON_V2: &str = "application/vnd.kafka.v2+json";

/// Connection settings for [`PandaproxyBus`].
#[derive(Clone, Debug)]
pub struct PandaproxyConfig {
    /// Base URL of the proxy, e.g. `http://localhost:8082`.
    pub base_url: String,
    /// Consumer group prefix. Sessions join `<prefix>-<session id>`.
    pub consumer_group: String,
    /// Long-poll timeout passed to each records fetch.
    pub fetch_timeout: Duration,
    pub fetch_max_bytes: u64,
}

impl Default for PandaproxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            consumer_group: "flux".to_string(),
            fetch_timeout: Duration::from_secs(1),
            fetch_max_bytes: 1024 * 1024,
        }
    }
}

/// Bus adapter speaking to the Redpanda HTTP Proxy.
#[derive(Clone)]
pub struct PandaproxyBus {
    client: Client,
    base: Url,
    config: PandaproxyConfig,
}

impl PandaproxyBus {
    pub fn new(config: PandaproxyConfig) -> Result<Self, BusError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| BusError::Network(format!("invalid proxy url {}: {e}", config.base_url)))?;
        // Fetches long-poll for `fetch_timeout`; leave headroom on top of it.
        let client = Client::builder()
            .timeout(config.fetch_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| BusError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base,
            config,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<ProduceOffset>,
}

#[derive(Debug, Deserialize)]
struct ProduceOffset {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConsumerInstance {
    base_uri: String,
}

#[derive(Debug, Deserialize)]
struct ConsumedRecord {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    partition: i32,
    #[serde(default)]
    offset: i64,
}

/// Append path segments to `base`, percent-encoding each one.
fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, BusError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| BusError::Network(format!("url cannot take a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn network(e: reqwest::Error) -> BusError {
    BusError::Network(e.to_string())
}

/// Turn a non-success response into [`BusError::Status`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BusError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BusError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BusPort for PandaproxyBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let url = join_segments(&self.base, &["topics", topic])?;
        let body = json!({ "records": [{ "value": BASE64.encode(&payload) }] });

        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, BINARY_V2)
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let resp = check(resp).await?;

        let produced: ProduceResponse = resp
            .json()
            .await
            .map_err(|e| BusError::Decode(e.to_string()))?;
        if let Some(failed) = produced.offsets.iter().find(|o| o.error_code.is_some()) {
            return Err(BusError::Rejected(
                failed
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("error code {}", failed.error_code.unwrap_or(-1))),
            ));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        session: &SessionId,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        let mut sub = PandaproxySubscription {
            client: self.client.clone(),
            base: self.base.clone(),
            config: self.config.clone(),
            group: format!("{}-{}", self.config.consumer_group, session),
            instance_name: session.to_string(),
            topic: topic.to_string(),
            instance: None,
            buffered: VecDeque::new(),
        };
        let _ = sub.ensure_instance().await?;
        tracing::debug!(topic, group = %sub.group, "pandaproxy consumer subscribed");
        Ok(Box::new(sub))
    }
}

/// One consumer instance, subscribed to one topic.
struct PandaproxySubscription {
    client: Client,
    base: Url,
    config: PandaproxyConfig,
    group: String,
    instance_name: String,
    topic: String,
    /// Base URI of the live consumer instance. `None` after the proxy
    /// forgot it; the next poll re-creates it.
    instance: Option<Url>,
    buffered: VecDeque<Bytes>,
}

impl PandaproxySubscription {
    async fn ensure_instance(&mut self) -> Result<Url, BusError> {
        if let Some(url) = &self.instance {
            return Ok(url.clone());
        }

        let url = join_segments(&self.base, &["consumers", self.group.as_str()])?;
        let body = json!({
            "name": self.instance_name,
            "format": "binary",
            "auto.offset.reset": "latest",
            "auto.commit.enable": "true",
            "fetch.min.bytes": "1",
            "consumer.request.timeout.ms": self.config.fetch_timeout.as_millis().to_string(),
        });
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JSON_V2)
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let created: ConsumerInstance = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BusError::Decode(e.to_string()))?;
        let instance = Url::parse(&created.base_uri)
            .map_err(|e| BusError::Decode(format!("bad base_uri {}: {e}", created.base_uri)))?;

        if let Err(e) = self.subscribe_instance(&instance).await {
            delete_instance(&self.client, &instance).await;
            return Err(e);
        }

        self.instance = Some(instance.clone());
        Ok(instance)
    }

    async fn subscribe_instance(&self, instance: &Url) -> Result<(), BusError> {
        let url = join_segments(instance, &["subscription"])?;
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JSON_V2)
            .json(&json!({ "topics": [self.topic] }))
            .send()
            .await
            .map_err(network)?;
        let _ = check(resp).await?;
        Ok(())
    }

    async fn fetch(&mut self, instance: &Url) -> Result<(), BusError> {
        let mut url = join_segments(instance, &["records"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &self.config.fetch_timeout.as_millis().to_string())
            .append_pair("max_bytes", &self.config.fetch_max_bytes.to_string());

        let resp = self
            .client
            .get(url)
            .header(ACCEPT, BINARY_V2)
            .send()
            .await
            .map_err(network)?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::warn!(group = %self.group, "consumer instance gone, will re-create");
            self.instance = None;
        }
        let records: Vec<ConsumedRecord> = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| BusError::Decode(e.to_string()))?;

        // The proxy commits past the whole batch, so each record is decoded
        // on its own and only undecodable ones are dropped.
        let mut decoded = 0usize;
        let mut first_error = None;
        for record in records {
            let Some(value) = record.value else { continue };
            match BASE64.decode(value.as_bytes()) {
                Ok(bytes) => {
                    self.buffered.push_back(Bytes::from(bytes));
                    decoded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        group = %self.group,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "dropping record with non-base64 value"
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) if decoded == 0 => Err(BusError::Decode(format!(
                "record value is not base64: {e}"
            ))),
            _ => Ok(()),
        }
    }
}

async fn delete_instance(client: &Client, instance: &Url) {
    match client.delete(instance.clone()).send().await {
        Ok(resp) if resp.status().is_success() => {}
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), %instance, "failed to delete consumer instance");
        }
        Err(e) => tracing::warn!(error = %e, %instance, "failed to delete consumer instance"),
    }
}

#[async_trait]
impl BusSubscription for PandaproxySubscription {
    async fn poll(&mut self) -> Result<Bytes, BusError> {
        loop {
            if let Some(payload) = self.buffered.pop_front() {
                return Ok(payload);
            }
            let instance = self.ensure_instance().await?;
            self.fetch(&instance).await?;
        }
    }

    async fn close(self: Box<Self>) {
        if let Some(instance) = &self.instance {
            delete_instance(&self.client, instance).await;
        }
    }
}
