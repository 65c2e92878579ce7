//! Single-owner writer for a session's outbound half.
//!
//! The foreground loop and the bus forwarder never touch the socket. They
//! queue [`Outbound`] units here and one task writes each unit in full before
//! taking the next, so two units never interleave on the wire.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use flux_telemetry::MetricsRecorder;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics;

/// One logical unit of outbound bytes.
#[derive(Debug)]
pub struct Outbound {
    payload: Bytes,
    written: Option<oneshot::Sender<()>>,
}

impl Outbound {
    /// A forwarded bus message, newline-terminated.
    pub fn line(payload: Bytes) -> Self {
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.extend_from_slice(&payload);
        buf.put_u8(b'\n');
        Self {
            payload: buf.freeze(),
            written: None,
        }
    }

    /// A download payload, written verbatim. The receiver resolves once every
    /// byte has been flushed, and errors if the write never happened.
    pub fn block(payload: Bytes) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                written: Some(tx),
            },
            rx,
        )
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Spawn the writer task.
///
/// Runs until the queue closes or `cancel` fires. A failed write cancels
/// `cancel` so the rest of the session tears down.
pub fn spawn_writer<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    recorder: Arc<MetricsRecorder>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let unit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                unit = rx.recv() => match unit {
                    Some(unit) => unit,
                    None => break,
                },
            };

            let size = unit.payload.len();
            let result = async {
                sink.write_all(&unit.payload).await?;
                sink.flush().await
            }
            .await;

            if let Err(e) = result {
                tracing::warn!(error = %e, bytes = size, "outbound write failed");
                cancel.cancel();
                break;
            }

            recorder.counter_inc(metrics::OUTBOUND_BYTES, &[], size as u64);
            if let Some(written) = unit.written {
                let _ = written.send(());
            }
        }

        if let Err(e) = sink.shutdown().await {
            tracing::debug!(error = %e, "outbound shutdown failed");
        }
    })
}
