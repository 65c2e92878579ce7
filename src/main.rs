//! # flux
//!
//! Flux gateway binary: loads settings, initialises telemetry, wires the bus
//! and blob store adapters, and serves TCP clients until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flux_blob::{GardClient, GardConfig, MemoryBlobStore};
use flux_bus::{MemoryBus, PandaproxyBus, PandaproxyConfig};
use flux_core::{BlobPort, BusPort};
use flux_gateway::{GatewayConfig, SessionConfig};
use flux_settings::{
    BlobKind, BlobSettings, BusKind, BusSettings, FluxSettings, GatewaySettings, LoggingSettings,
};
use flux_telemetry::{spawn_metrics_logger, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Flux TCP gateway.
#[derive(Parser, Debug)]
#[command(name = "flux", about = "TCP gateway for bus relay and blob transfer")]
struct Cli {
    /// JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides settings).
    #[arg(long)]
    listen: Option<String>,

    /// Bus topic (overrides settings).
    #[arg(long)]
    topic: Option<String>,

    /// Log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Use the in-process bus and blob store instead of Redpanda and Gard.
    #[arg(long, default_value_t = false)]
    memory: bool,
}

impl Cli {
    fn apply(&self, settings: &mut FluxSettings) {
        if let Some(listen) = &self.listen {
            settings.gateway.listen_addr.clone_from(listen);
        }
        if let Some(topic) = &self.topic {
            settings.gateway.topic.clone_from(topic);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if self.memory {
            settings.bus.kind = BusKind::Memory;
            settings.blob.kind = BlobKind::Memory;
        }
    }
}

/// Map logging settings to a telemetry config, collecting unparseable levels.
fn telemetry_config(logging: &LoggingSettings) -> (TelemetryConfig, Vec<String>) {
    let mut invalid = Vec::new();
    let log_level = logging.level.parse::<Level>().unwrap_or_else(|_| {
        invalid.push(logging.level.clone());
        Level::INFO
    });
    let module_levels = logging
        .module_levels
        .iter()
        .filter_map(|(module, level)| match level.parse::<Level>() {
            Ok(level) => Some((module.clone(), level)),
            Err(_) => {
                invalid.push(format!("{module}={level}"));
                None
            }
        })
        .collect();
    (
        TelemetryConfig {
            log_level,
            module_levels,
            json: logging.json,
        },
        invalid,
    )
}

fn gateway_config(gateway: &GatewaySettings) -> GatewayConfig {
    GatewayConfig {
        listen_addr: gateway.listen_addr.clone(),
        session: SessionConfig {
            topic: gateway.topic.clone(),
            outbound_queue: gateway.outbound_queue,
            max_frame_bytes: gateway.max_frame_bytes,
            poll_retry: Duration::from_millis(gateway.poll_retry_ms),
        },
        shutdown_grace: Duration::from_secs(gateway.shutdown_grace_secs),
    }
}

fn build_bus(bus: &BusSettings) -> Result<Arc<dyn BusPort>> {
    match bus.kind {
        BusKind::Memory => Ok(Arc::new(MemoryBus::new(bus.memory_capacity))),
        BusKind::Pandaproxy => {
            let client = PandaproxyBus::new(PandaproxyConfig {
                base_url: bus.proxy_url.clone(),
                consumer_group: bus.consumer_group.clone(),
                fetch_timeout: Duration::from_millis(bus.fetch_timeout_ms),
                fetch_max_bytes: bus.fetch_max_bytes,
            })
            .context("failed to create Redpanda proxy client")?;
            Ok(Arc::new(client))
        }
    }
}

fn build_blob(blob: &BlobSettings) -> Result<Arc<dyn BlobPort>> {
    match blob.kind {
        BlobKind::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        BlobKind::Gard => {
            let client = GardClient::new(GardConfig {
                base_url: blob.base_url.clone(),
                timeout: Duration::from_secs(blob.timeout_secs),
            })
            .context("failed to create Gard client")?;
            Ok(Arc::new(client))
        }
    }
}

/// Resolve on SIGINT, or SIGTERM where available.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        flux_settings::load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let (telemetry_config, invalid_levels) = telemetry_config(&settings.logging);
    let telemetry = flux_telemetry::init_telemetry(telemetry_config);
    for level in invalid_levels {
        tracing::warn!(level = %level, "ignoring invalid log level");
    }
    let metrics = telemetry.metrics();

    tracing::info!(
        bus = %settings.bus.kind,
        blob = %settings.blob.kind,
        topic = %settings.gateway.topic,
        "Starting flux gateway"
    );

    let bus = build_bus(&settings.bus)?;
    let blob = build_blob(&settings.blob)?;

    let handle = flux_gateway::start(gateway_config(&settings.gateway), bus, blob, metrics.clone())
        .await
        .with_context(|| format!("Failed to listen on {}", settings.gateway.listen_addr))?;

    let metrics_cancel = CancellationToken::new();
    let metrics_task = settings.metrics.enabled.then(|| {
        spawn_metrics_logger(
            metrics.clone(),
            Duration::from_secs(settings.metrics.log_interval_secs.max(1)),
            metrics_cancel.clone(),
        )
    });

    tracing::info!(addr = %handle.local_addr(), "Flux gateway ready");

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let drained = handle.shutdown().await;
    metrics_cancel.cancel();
    if let Some(task) = metrics_task {
        let _ = task.await;
    }

    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
