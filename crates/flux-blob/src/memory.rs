//! In-process blob store for local runs and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use flux_core::{BlobError, BlobPort};
use parking_lot::Mutex;

/// Metric reports kept; older ones are evicted.
pub const METRIC_LOG_LIMIT: usize = 1024;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    metrics: Mutex<VecDeque<f64>>,
    store_failures: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob directly.
    pub fn insert(&self, name: impl Into<String>, payload: impl Into<Bytes>) {
        let _ = self.blobs.lock().insert(name.into(), payload.into());
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.blobs.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    /// The most recent values passed to `report_metric`, oldest first. At
    /// most [`METRIC_LOG_LIMIT`] are kept.
    pub fn reported_metrics(&self) -> Vec<f64> {
        self.metrics.lock().iter().copied().collect()
    }

    /// Make the next `n` store calls fail.
    pub fn inject_store_failures(&self, n: usize) {
        self.store_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobPort for MemoryBlobStore {
    async fn store(&self, name: &str, payload: Bytes) -> Result<(), BlobError> {
        if name.is_empty() {
            return Err(BlobError::InvalidName(String::new()));
        }
        let injected = self
            .store_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BlobError::Status {
                status: 500,
                body: "injected store failure".into(),
            });
        }
        let _ = self.blobs.lock().insert(name.to_string(), payload);
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Bytes, BlobError> {
        self.get(name)
            .ok_or_else(|| BlobError::NotFound(name.to_string()))
    }

    async fn report_metric(&self, value: f64) -> Result<(), BlobError> {
        let mut log = self.metrics.lock();
        if log.len() == METRIC_LOG_LIMIT {
            let _ = log.pop_front();
        }
        log.push_back(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_fetch() {
        let store = MemoryBlobStore::new();
        store.store("a.txt", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(store.fetch("a.txt").await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn store_overwrites() {
        let store = MemoryBlobStore::new();
        store.insert("a", "one");
        store.store("a", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(store.get("a").unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn fetch_unknown_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.fetch("missing").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(ref n) if n == "missing"));
    }

    #[tokio::test]
    async fn injected_store_failure_is_consumed() {
        let store = MemoryBlobStore::new();
        store.inject_store_failures(1);
        assert!(store.store("a", Bytes::from_static(b"x")).await.is_err());
        assert!(store.is_empty());
        store.store("a", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn metrics_are_recorded_in_order() {
        let store = MemoryBlobStore::new();
        store.report_metric(0.5).await.unwrap();
        store.report_metric(2.0).await.unwrap();
        assert_eq!(store.reported_metrics(), vec![0.5, 2.0]);
    }

    #[tokio::test]
    async fn metric_log_is_bounded() {
        let store = MemoryBlobStore::new();
        for i in 0..METRIC_LOG_LIMIT + 5 {
            store.report_metric(i as f64).await.unwrap();
        }
        let reported = store.reported_metrics();
        assert_eq!(reported.len(), METRIC_LOG_LIMIT);
        assert_eq!(reported[0], 5.0);
    }
}
