//! Per-connection session.
//!
//! Three tasks cooperate on one connection:
//!
//! - the foreground loop (this task) reads frames and dispatches commands,
//!   strictly one at a time;
//! - the forwarder polls the bus and queues each message for the client;
//! - the writer owns the outbound half and writes one unit at a time.
//!
//! The session token ties them together: whichever side observes the end of
//! the connection cancels it, and the others stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flux_core::{BlobPort, BusPort, BusSubscription, FrameError, SessionId};
use flux_telemetry::MetricsRecorder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::frame::FrameReader;
use crate::metrics;
use crate::writer::{spawn_writer, Outbound};

/// Settings shared by every session of one gateway.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub topic: String,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    /// Delay before retrying a failed subscribe or poll.
    pub poll_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic: "flux_messages".to_string(),
            outbound_queue: 256,
            max_frame_bytes: 16 * 1024 * 1024,
            poll_retry: Duration::from_millis(500),
        }
    }
}

/// Long-lived handles injected into every session.
#[derive(Clone)]
pub struct SessionContext {
    pub bus: Arc<dyn BusPort>,
    pub blob: Arc<dyn BlobPort>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<SessionConfig>,
    /// Process-wide shutdown. Observed only between dispatch steps.
    pub shutdown: CancellationToken,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed its side of the stream.
    PeerClosed,
    /// The gateway is shutting down.
    Shutdown,
    /// Reading from the client failed.
    Transport(FrameError),
    /// The outbound side is gone (write failure).
    OutboundClosed,
}

impl SessionEnd {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::Shutdown => "shutdown",
            Self::Transport(e) => e.error_kind(),
            Self::OutboundClosed => "outbound_closed",
        }
    }
}

/// Download throughput in MiB/s. Elapsed time is floored at 1 ms.
pub fn download_speed(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.max(Duration::from_millis(1)).as_secs_f64();
    bytes as f64 / (1024.0 * 1024.0) / secs
}

pub struct Session {
    id: SessionId,
    ctx: SessionContext,
}

impl Session {
    pub fn new(id: SessionId, ctx: SessionContext) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Drive the session to completion. Returns once the forwarder and the
    /// writer have both stopped.
    pub async fn run<R, W>(self, reader: R, writer: W) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let token = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel(self.ctx.config.outbound_queue.max(1));

        let writer_task = spawn_writer(
            writer,
            outbound_rx,
            token.clone(),
            self.ctx.metrics.clone(),
        );
        let forwarder_task = tokio::spawn(forward(
            self.id.clone(),
            self.ctx.clone(),
            outbound.clone(),
            token.clone(),
        ));

        let mut frames = FrameReader::new(reader, self.ctx.config.max_frame_bytes);
        let end = self.foreground(&mut frames, &outbound, &token).await;

        token.cancel();
        drop(outbound);
        if let Err(e) = forwarder_task.await {
            warn!(error = %e, "forwarder task failed");
        }
        if let Err(e) = writer_task.await {
            warn!(error = %e, "writer task failed");
        }
        end
    }

    async fn foreground<R>(
        &self,
        frames: &mut FrameReader<R>,
        outbound: &mpsc::Sender<Outbound>,
        token: &CancellationToken,
    ) -> SessionEnd
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let read = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => return SessionEnd::Shutdown,
                () = token.cancelled() => return SessionEnd::OutboundClosed,
                read = frames.read_line() => read,
            };
            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => return SessionEnd::PeerClosed,
                Err(e) => return SessionEnd::Transport(e),
            };

            let step = match Command::parse(&line) {
                Command::Relay(text) => {
                    self.relay(text).await;
                    Ok(())
                }
                Command::Upload { name } => self.upload(name, frames).await,
                Command::Download { name } => self.download(name, outbound).await,
            };
            if let Err(end) = step {
                return end;
            }
        }
    }

    async fn relay(&self, text: String) {
        if text.is_empty() {
            return;
        }
        let bytes = text.len();
        match self
            .ctx
            .bus
            .publish(&self.ctx.config.topic, Bytes::from(text))
            .await
        {
            Ok(()) => {
                self.ctx.metrics.counter_inc(metrics::LINES_RELAYED, &[], 1);
                debug!(bytes, "relayed line");
            }
            Err(e) => {
                self.ctx
                    .metrics
                    .counter_inc(metrics::RELAY_ERRORS, &[("kind", e.error_kind())], 1);
                warn!(error = %e, "relay to bus failed");
            }
        }
    }

    async fn upload<R>(&self, name: String, frames: &mut FrameReader<R>) -> Result<(), SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        // The block is consumed even when the name is unusable so the next
        // line is read as a command.
        let block = match frames.read_block().await {
            Ok(Some(block)) => block,
            Ok(None) => return Err(SessionEnd::PeerClosed),
            Err(e) => return Err(SessionEnd::Transport(e)),
        };

        if name.is_empty() {
            self.ctx
                .metrics
                .counter_inc(metrics::UPLOADS, &[("outcome", "rejected")], 1);
            warn!(bytes = block.len(), "upload without a name, block discarded");
            return Ok(());
        }

        let size = block.len();
        match self.ctx.blob.store(&name, block).await {
            Ok(()) => {
                self.ctx
                    .metrics
                    .counter_inc(metrics::UPLOADS, &[("outcome", "ok")], 1);
                self.ctx
                    .metrics
                    .counter_inc(metrics::UPLOAD_BYTES, &[], size as u64);
                info!(name = %name, bytes = size, "upload stored");
            }
            Err(e) => {
                self.ctx
                    .metrics
                    .counter_inc(metrics::UPLOADS, &[("outcome", "error")], 1);
                warn!(name = %name, error = %e, kind = e.error_kind(), "upload failed");
            }
        }
        Ok(())
    }

    async fn download(
        &self,
        name: String,
        outbound: &mpsc::Sender<Outbound>,
    ) -> Result<(), SessionEnd> {
        if name.is_empty() {
            self.ctx
                .metrics
                .counter_inc(metrics::DOWNLOADS, &[("outcome", "rejected")], 1);
            warn!("download without a name ignored");
            return Ok(());
        }

        let started = Instant::now();
        let payload = match self.ctx.blob.fetch(&name).await {
            Ok(payload) => payload,
            Err(e) => {
                self.ctx
                    .metrics
                    .counter_inc(metrics::DOWNLOADS, &[("outcome", "error")], 1);
                warn!(name = %name, error = %e, kind = e.error_kind(), "download failed");
                return Ok(());
            }
        };

        let size = payload.len();
        let (unit, written) = Outbound::block(payload);
        if outbound.send(unit).await.is_err() || written.await.is_err() {
            return Err(SessionEnd::OutboundClosed);
        }

        let speed = download_speed(size, started.elapsed());
        self.ctx
            .metrics
            .counter_inc(metrics::DOWNLOADS, &[("outcome", "ok")], 1);
        self.ctx
            .metrics
            .histogram_observe(metrics::DOWNLOAD_SPEED, &[], speed);
        info!(name = %name, bytes = size, mib_per_sec = speed, "download served");

        if let Err(e) = self.ctx.blob.report_metric(speed).await {
            self.ctx
                .metrics
                .counter_inc(metrics::METRIC_REPORT_ERRORS, &[], 1);
            warn!(error = %e, "download speed report failed");
        }
        Ok(())
    }
}

/// Sleep for `delay` unless `token` fires first. Returns `false` if cancelled.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Background forwarder: bus messages to the client, one line each.
async fn forward(
    id: SessionId,
    ctx: SessionContext,
    outbound: mpsc::Sender<Outbound>,
    token: CancellationToken,
) {
    let topic = ctx.config.topic.as_str();
    let retry = ctx.config.poll_retry;
    let mut subscription: Option<Box<dyn BusSubscription>> = None;

    loop {
        if subscription.is_none() {
            let subscribed = tokio::select! {
                () = token.cancelled() => break,
                subscribed = ctx.bus.subscribe(topic, &id) => subscribed,
            };
            match subscribed {
                Ok(sub) => {
                    debug!(topic, "subscribed to bus");
                    subscription = Some(sub);
                }
                Err(e) => {
                    ctx.metrics.counter_inc(metrics::SUBSCRIBE_ERRORS, &[], 1);
                    warn!(error = %e, "bus subscribe failed, retrying");
                    if !pause(&token, retry).await {
                        break;
                    }
                    continue;
                }
            }
        }
        let Some(sub) = subscription.as_mut() else {
            continue;
        };

        let polled = tokio::select! {
            () = token.cancelled() => break,
            polled = sub.poll() => polled,
        };

        match polled {
            Ok(payload) => {
                let queued = tokio::select! {
                    () = token.cancelled() => break,
                    queued = outbound.send(Outbound::line(payload)) => queued,
                };
                if queued.is_err() {
                    token.cancel();
                    break;
                }
                ctx.metrics.counter_inc(metrics::MESSAGES_FORWARDED, &[], 1);
            }
            Err(e) => {
                ctx.metrics
                    .counter_inc(metrics::POLL_ERRORS, &[("kind", e.error_kind())], 1);
                if e.is_recoverable() {
                    warn!(error = %e, "bus poll failed");
                } else {
                    // The subscription is dead; the next pass subscribes again.
                    warn!(error = %e, "bus subscription lost, resubscribing");
                    if let Some(dead) = subscription.take() {
                        dead.close().await;
                    }
                }
                if !pause(&token, retry).await {
                    break;
                }
            }
        }
    }

    if let Some(sub) = subscription {
        sub.close().await;
    }
}
