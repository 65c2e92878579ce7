use std::time::Duration;

/// Failures talking to the message bus.
///
/// None of these end a client session: relay and forward paths log them and
/// carry on.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BusError {
    #[error("network error: {0}")]
    Network(String),
    #[error("bus returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("bus rejected record: {0}")]
    Rejected(String),
    #[error("malformed bus response: {0}")]
    Decode(String),
    #[error("subscription lagged, {0} messages skipped")]
    Lagged(u64),
    #[error("subscription closed")]
    Closed,
}

impl BusError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Rejected(_) => "rejected",
            Self::Decode(_) => "decode",
            Self::Lagged(_) => "lagged",
            Self::Closed => "closed",
        }
    }

    /// Whether another `poll` on the same subscription can ever succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Failures talking to the blob store.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob name: {0:?}")]
    InvalidName(String),
    #[error("blob store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl BlobError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidName(_) => "invalid_name",
            Self::Status { .. } => "status",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a non-success HTTP status for the named blob.
    pub fn from_status(status: u16, body: String, name: &str) -> Self {
        match status {
            404 => Self::NotFound(name.to_string()),
            _ => Self::Status { status, body },
        }
    }
}

/// Transport-level failures reading client frames. Always terminal for the
/// session; a clean end of stream is not an error and is reported as `None`
/// by the reader instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeds {limit} bytes")]
    TooLong { limit: usize },
}

impl FrameError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::TooLong { .. } => "too_long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_closed_is_the_only_unrecoverable_error() {
        assert!(!BusError::Closed.is_recoverable());
        assert!(BusError::Network("refused".into()).is_recoverable());
        assert!(BusError::Lagged(3).is_recoverable());
        assert!(BusError::Status {
            status: 500,
            body: "boom".into()
        }
        .is_recoverable());
    }

    #[test]
    fn blob_from_status_mapping() {
        assert!(matches!(
            BlobError::from_status(404, String::new(), "a.txt"),
            BlobError::NotFound(name) if name == "a.txt"
        ));
        assert!(matches!(
            BlobError::from_status(500, "internal".into(), "a.txt"),
            BlobError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BusError::Lagged(1).error_kind(), "lagged");
        assert_eq!(BusError::Decode("x".into()).error_kind(), "decode");
        assert_eq!(
            BlobError::Timeout(Duration::from_secs(30)).error_kind(),
            "timeout"
        );
        assert_eq!(BlobError::NotFound("x".into()).error_kind(), "not_found");
        assert_eq!(FrameError::TooLong { limit: 8 }.error_kind(), "too_long");
    }

    #[test]
    fn frame_error_from_io() {
        let err: FrameError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(err.error_kind(), "io");
        assert!(err.to_string().contains("reset"));
    }
}
