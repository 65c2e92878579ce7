//! In-process bus built on `tokio::sync::broadcast`.
//!
//! Every subscription sees every message published after it subscribed,
//! matching the per-session consumer groups used against Redpanda.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use flux_core::{BusError, BusPort, BusSubscription, SessionId};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Entries kept in the publish log; older ones are evicted.
pub const PUBLISH_LOG_LIMIT: usize = 1024;

/// Broadcast bus keyed by topic.
pub struct MemoryBus {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    published: Mutex<VecDeque<(String, Bytes)>>,
    publish_failures: AtomicUsize,
    poll_failures: Arc<AtomicUsize>,
}

impl MemoryBus {
    /// `capacity` is the per-subscriber backlog before it reports lag.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
            published: Mutex::new(VecDeque::new()),
            publish_failures: AtomicUsize::new(0),
            poll_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// The most recent payloads accepted by `publish`, oldest first, across
    /// all topics. At most [`PUBLISH_LOG_LIMIT`] are kept.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().iter().cloned().collect()
    }

    /// Payloads accepted on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<Bytes> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |s| s.receiver_count())
    }

    /// Make the next `n` publish calls fail.
    pub fn inject_publish_failures(&self, n: usize) {
        self.publish_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` polls (across all subscriptions) fail.
    pub fn inject_poll_failures(&self, n: usize) {
        self.poll_failures.store(n, Ordering::SeqCst);
    }

    pub fn pending_poll_failures(&self) -> usize {
        self.poll_failures.load(Ordering::SeqCst)
    }

    /// Drop the topic's sender so its subscriptions observe `Closed`.
    pub fn close_topic(&self, topic: &str) {
        let _ = self.topics.remove(topic);
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BusPort for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        if take_one(&self.publish_failures) {
            return Err(BusError::Network("injected publish failure".into()));
        }
        {
            let mut log = self.published.lock();
            if log.len() == PUBLISH_LOG_LIMIT {
                let _ = log.pop_front();
            }
            log.push_back((topic.to_string(), payload.clone()));
        }
        // No subscribers is not an error; the message is simply unseen.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        session: &SessionId,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        tracing::debug!(topic, session_id = %session, "memory bus subscribe");
        Ok(Box::new(MemorySubscription {
            rx: self.sender(topic).subscribe(),
            poll_failures: self.poll_failures.clone(),
        }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<Bytes>,
    poll_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn poll(&mut self) -> Result<Bytes, BusError> {
        if take_one(&self.poll_failures) {
            return Err(BusError::Network("injected poll failure".into()));
        }
        match self.rx.recv().await {
            Ok(payload) => Ok(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(BusError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(BusError::Closed),
        }
    }

    async fn close(self: Box<Self>) {}
}
