//! Boundaries to the two external services the gateway depends on.
//!
//! Implementations are shared by every session behind an `Arc`, so they must
//! tolerate concurrent callers. Any lock an implementation takes is held for
//! one call at most.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{BlobError, BusError};
use crate::ids::SessionId;

/// Publish/subscribe message bus.
#[async_trait]
pub trait BusPort: Send + Sync {
    /// Publish one opaque payload to `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Open a subscription to `topic` on behalf of one session.
    async fn subscribe(
        &self,
        topic: &str,
        session: &SessionId,
    ) -> Result<Box<dyn BusSubscription>, BusError>;
}

/// A per-session cursor over a topic.
#[async_trait]
pub trait BusSubscription: Send {
    /// Block until the next message is available.
    ///
    /// Errors are reported per call; callers retry unless the error is
    /// [`BusError::Closed`].
    async fn poll(&mut self) -> Result<Bytes, BusError>;

    /// Release any server-side resources held by the subscription.
    async fn close(self: Box<Self>);
}

/// Named blob storage plus the download-speed telemetry sink.
#[async_trait]
pub trait BlobPort: Send + Sync {
    async fn store(&self, name: &str, payload: Bytes) -> Result<(), BlobError>;

    async fn fetch(&self, name: &str) -> Result<Bytes, BlobError>;

    /// Report a client download speed (MiB/s).
    async fn report_metric(&self, value: f64) -> Result<(), BlobError>;
}
