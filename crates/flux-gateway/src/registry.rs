use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flux_core::SessionId;

/// What the supervisor knows about a live session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub opened_at: DateTime<Utc>,
}

/// Registry of live client sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection and return its id.
    pub fn register(&self, peer: SocketAddr) -> SessionId {
        let id = SessionId::new();
        let _ = self.sessions.insert(
            id.clone(),
            SessionInfo {
                peer,
                opened_at: Utc::now(),
            },
        );
        id
    }

    pub fn unregister(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.remove(id).map(|(_, info)| info)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// All live sessions, oldest first.
    pub fn sessions(&self) -> Vec<(SessionId, SessionInfo)> {
        let mut entries: Vec<(SessionId, SessionInfo)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| {
            a.1.opened_at
                .cmp(&b.1.opened_at)
                .then_with(|| a.0.as_str().cmp(b.0.as_str()))
        });
        entries
    }
}
