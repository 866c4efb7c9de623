use thiserror::Error;

/// Failure reported by the native broker client.
///
/// Carries the client's error code and description verbatim so they can be
/// handed back to the relay as structured failure data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {description}")]
pub struct BrokerError {
    pub code: String,
    pub description: String,
}

impl BrokerError {
    pub const TRANSPORT_FAILED: &'static str = "TRANSPORT_FAILED";
    pub const CONNECTION_REFUSED: &'static str = "CONNECTION_REFUSED";
    pub const CLOSED: &'static str = "CLOSED";
    pub const NOT_TRANSACTED: &'static str = "NOT_TRANSACTED";

    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn transport_failed(description: impl Into<String>) -> Self {
        Self::new(Self::TRANSPORT_FAILED, description)
    }

    pub fn closed(what: &str) -> Self {
        Self::new(Self::CLOSED, format!("{} is closed", what))
    }
}
