//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root settings for the Flux gateway.
///
/// ```json
/// {
///   "gateway": { "listenAddr": "0.0.0.0:9000" },
///   "bus": { "proxyUrl": "http://redpanda:8082" },
///   "blob": { "baseUrl": "http://gard:8081", "timeoutSecs": 10 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FluxSettings {
    /// TCP listener and session behaviour.
    pub gateway: GatewaySettings,
    /// Message bus connection.
    pub bus: BusSettings,
    /// Blob store connection.
    pub blob: BlobSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// In-process metrics.
    pub metrics: MetricsSettings,
}

impl FluxSettings {
    /// Correct values that would make the gateway unusable.
    ///
    /// Called automatically during loading. Bad values are replaced with the
    /// compiled default and a warning, not rejected.
    pub fn validate(&mut self) {
        let gw_defaults = GatewaySettings::default();
        if self.gateway.topic.trim().is_empty() {
            tracing::warn!(default = %gw_defaults.topic, "empty topic, using default");
            self.gateway.topic = gw_defaults.topic;
        }
        if self.gateway.outbound_queue == 0 {
            tracing::warn!("outboundQueue must be at least 1, correcting");
            self.gateway.outbound_queue = 1;
        }
        if self.gateway.max_frame_bytes == 0 {
            tracing::warn!(
                default = gw_defaults.max_frame_bytes,
                "maxFrameBytes of 0 is invalid, using default"
            );
            self.gateway.max_frame_bytes = gw_defaults.max_frame_bytes;
        }

        let bus_defaults = BusSettings::default();
        if self.bus.fetch_timeout_ms == 0 {
            tracing::warn!("bus fetchTimeoutMs of 0 would busy-loop, using default");
            self.bus.fetch_timeout_ms = bus_defaults.fetch_timeout_ms;
        }
        if self.bus.memory_capacity == 0 {
            tracing::warn!("bus memoryCapacity must be at least 1, correcting");
            self.bus.memory_capacity = 1;
        }

        if self.blob.timeout_secs == 0 {
            tracing::warn!("blob timeoutSecs of 0 disables the bound, using default");
            self.blob.timeout_secs = BlobSettings::default().timeout_secs;
        }
    }
}

/// TCP listener and per-session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Address the gateway binds, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,
    /// Topic relayed lines are published to and forwarded from.
    pub topic: String,
    /// Outbound units buffered per session before producers wait.
    pub outbound_queue: usize,
    /// Longest accepted command line or upload block, in bytes.
    pub max_frame_bytes: usize,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_grace_secs: u64,
    /// Delay before retrying a failed bus poll or subscribe.
    pub poll_retry_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            topic: "flux_messages".to_string(),
            outbound_queue: 256,
            max_frame_bytes: 16 * 1024 * 1024,
            shutdown_grace_secs: 60,
            poll_retry_ms: 500,
        }
    }
}

/// Which bus implementation to wire in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Redpanda HTTP Proxy (Kafka REST v2 API).
    Pandaproxy,
    /// In-process broadcast bus.
    Memory,
}

impl FromStr for BusKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pandaproxy" => Ok(Self::Pandaproxy),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown bus kind: {other}")),
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pandaproxy => f.write_str("pandaproxy"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Message bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    pub kind: BusKind,
    /// Base URL of the Redpanda HTTP Proxy.
    pub proxy_url: String,
    /// Consumer group prefix; each session joins `<prefix>-<session id>`.
    pub consumer_group: String,
    /// Long-poll timeout for one records fetch.
    pub fetch_timeout_ms: u64,
    /// Upper bound on bytes returned by one records fetch.
    pub fetch_max_bytes: u64,
    /// Per-subscriber buffer of the in-memory bus.
    pub memory_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::Pandaproxy,
            proxy_url: "http://localhost:8082".to_string(),
            consumer_group: "flux".to_string(),
            fetch_timeout_ms: 1000,
            fetch_max_bytes: 1024 * 1024,
            memory_capacity: 1024,
        }
    }
}

/// Which blob store implementation to wire in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// Gard HTTP service.
    Gard,
    /// In-process map.
    Memory,
}

impl FromStr for BlobKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gard" => Ok(Self::Gard),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown blob kind: {other}")),
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gard => f.write_str("gard"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Blob store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlobSettings {
    pub kind: BlobKind,
    pub base_url: String,
    /// Per-request timeout for store/fetch/report calls.
    pub timeout_secs: u64,
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            kind: BlobKind::Gard,
            base_url: "http://localhost:8081".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"flux_bus": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

/// Metrics configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Periodically log a metrics summary.
    pub enabled: bool,
    pub log_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_interval_secs: 60,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
