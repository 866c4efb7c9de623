//! Error types for the broker transport.

use thiserror::Error;

use crate::broker::BrokerError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by the connection pool, consumer clients and publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached, or a session/receive call failed.
    /// Fatal to the current operation: the caller recreates the client or session.
    #[error("broker connection failed: {0}")]
    BrokerConnection(#[source] BrokerError),

    /// A publish was refused by the broker.
    #[error("publish failed: {0}")]
    PublishFailed(#[source] BrokerError),

    /// Caller supplied input that can never succeed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A lock guarding shared pool state was poisoned by a panicking thread.
    #[error("lock poisoned during {0}")]
    Poisoned(&'static str),

    /// Listening was started before any subscription.
    #[error("consumer for group {0} is not subscribed")]
    NotSubscribed(String),

    /// The pool or client has been disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// A background listener thread panicked instead of returning.
    #[error("listener for group {group} panicked: {message}")]
    ListenerPanicked { group: String, message: String },
}

impl TransportError {
    /// Wrap a native failure as a connectivity error.
    pub fn broker_connection(err: BrokerError) -> Self {
        Self::BrokerConnection(err)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Error code suitable for a failed publish result.
    ///
    /// Native failures keep the broker's code; local failures get a stable
    /// code of their own.
    pub fn code(&self) -> &str {
        match self {
            TransportError::BrokerConnection(err) | TransportError::PublishFailed(err) => {
                &err.code
            }
            TransportError::InvalidArgument(_) => "INVALID_ARGUMENT",
            TransportError::Poisoned(_) => "POISONED",
            TransportError::NotSubscribed(_) => "NOT_SUBSCRIBED",
            TransportError::Disposed(_) => "DISPOSED",
            TransportError::ListenerPanicked { .. } => "LISTENER_PANICKED",
        }
    }

    /// Human readable description without the variant prefix.
    pub fn description(&self) -> String {
        match self {
            TransportError::BrokerConnection(err) | TransportError::PublishFailed(err) => {
                err.description.clone()
            }
            other => other.to_string(),
        }
    }

    /// Whether this error means the connection is gone and the client must be rebuilt.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::BrokerConnection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_is_preserved() {
        let err = TransportError::PublishFailed(BrokerError::new("-2146233088", "send refused"));
        assert_eq!(err.code(), "-2146233088");
        assert_eq!(err.description(), "send refused");
        assert!(!err.is_connectivity());
    }

    #[test]
    fn local_errors_have_stable_codes() {
        assert_eq!(TransportError::Disposed("pool").code(), "DISPOSED");
        let panicked = TransportError::ListenerPanicked {
            group: "billing".into(),
            message: "boom".into(),
        };
        assert_eq!(panicked.code(), "LISTENER_PANICKED");
        assert!(!panicked.is_connectivity());
        assert_eq!(
            TransportError::invalid_argument("topics").to_string(),
            "invalid argument: topics"
        );
    }
}
