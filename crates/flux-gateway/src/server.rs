use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flux_core::{BlobPort, BusPort};
use flux_telemetry::MetricsRecorder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::metrics;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionConfig, SessionContext, SessionEnd};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub session: SessionConfig,
    /// How long `shutdown` waits for sessions to finish.
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            session: SessionConfig::default(),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

/// Bind the listener and start accepting. Returns a handle to observe and
/// shut down the gateway.
pub async fn start(
    config: GatewayConfig,
    bus: Arc<dyn BusPort>,
    blob: Arc<dyn BlobPort>,
    metrics: Arc<MetricsRecorder>,
) -> Result<GatewayHandle, std::io::Error> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let registry = Arc::new(SessionRegistry::new());
    let ctx = SessionContext {
        bus,
        blob,
        metrics,
        config: Arc::new(config.session.clone()),
        shutdown: shutdown.clone(),
    };

    let accept = tokio::spawn(accept_loop(
        listener,
        ctx,
        Arc::clone(&registry),
        tracker.clone(),
    ));

    tracing::info!(%local_addr, topic = %config.session.topic, "flux gateway listening");

    Ok(GatewayHandle {
        local_addr,
        registry,
        shutdown,
        tracker,
        grace: config.shutdown_grace,
        accept,
    })
}

/// Handle returned by [`start`].
pub struct GatewayHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    grace: Duration,
    accept: JoinHandle<()>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.count()
    }

    /// Stop accepting, let every session finish its current step, and wait up
    /// to the grace period for them to end.
    ///
    /// Returns `true` if every session drained in time.
    pub async fn shutdown(self) -> bool {
        tracing::info!(sessions = self.registry.count(), "flux gateway shutting down");
        self.shutdown.cancel();
        if let Err(e) = self.accept.await {
            tracing::warn!(error = %e, "accept loop failed");
        }

        self.tracker.close();
        match tokio::time::timeout(self.grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("all sessions drained");
                true
            }
            Err(_) => {
                let remaining = self.registry.sessions();
                tracing::warn!(
                    remaining = remaining.len(),
                    grace_secs = self.grace.as_secs(),
                    "shutdown grace period elapsed with sessions still open"
                );
                let now = Utc::now();
                for (id, info) in remaining {
                    tracing::warn!(
                        session_id = %id,
                        peer = %info.peer,
                        open_secs = (now - info.opened_at).num_seconds(),
                        "session did not drain"
                    );
                }
                false
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: SessionContext,
    registry: Arc<SessionRegistry>,
    tracker: TaskTracker,
) {
    let mut backoff = ACCEPT_BACKOFF_MIN;
    loop {
        let accepted = tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                backoff = ACCEPT_BACKOFF_MIN;
                spawn_session(stream, peer, &ctx, &registry, &tracker);
            }
            Err(e) => {
                ctx.metrics.counter_inc(metrics::ACCEPT_ERRORS, &[], 1);
                tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "accept failed");
                tokio::select! {
                    () = ctx.shutdown.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    registry: &Arc<SessionRegistry>,
    tracker: &TaskTracker,
) {
    let id = registry.register(peer);
    ctx.metrics.counter_inc(metrics::CONNECTIONS_OPENED, &[], 1);
    ctx.metrics.gauge_inc(metrics::SESSIONS_ACTIVE, &[], 1.0);

    let span = tracing::info_span!("session", session_id = %id, %peer);
    let session = Session::new(id.clone(), ctx.clone());
    let registry = Arc::clone(registry);
    let recorder = Arc::clone(&ctx.metrics);

    tracker.spawn(
        async move {
            tracing::info!("client connected");
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "set_nodelay failed");
            }
            let (reader, writer) = stream.into_split();
            let end = session.run(reader, writer).await;

            let open_ms = registry
                .unregister(&id)
                .map(|info| (Utc::now() - info.opened_at).num_milliseconds());
            recorder.gauge_inc(metrics::SESSIONS_ACTIVE, &[], -1.0);
            recorder.counter_inc(metrics::CONNECTIONS_CLOSED, &[("reason", end.reason())], 1);
            match &end {
                SessionEnd::PeerClosed => tracing::info!(?open_ms, "client disconnected"),
                SessionEnd::Shutdown => tracing::info!("session closed for shutdown"),
                SessionEnd::Transport(e) => tracing::warn!(error = %e, "session transport error"),
                SessionEnd::OutboundClosed => tracing::warn!("client stopped accepting writes"),
            }
        }
        .instrument(span),
    );
}
