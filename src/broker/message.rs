use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A broker-addressable topic, or a merged composite of topic patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    name: String,
}

impl Destination {
    pub fn topic(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A text message as seen by producers and consumers.
#[derive(Debug, Clone)]
pub struct TextMessage {
    /// Broker assigned id; empty until sent.
    pub message_id: String,
    /// Topic the message was published to (never a pattern).
    pub destination: Option<Destination>,
    pub text: String,
    /// Set when the message is delivered again after a rollback.
    pub redelivered: bool,
    pub expires_at: Option<Instant>,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            destination: None,
            text: text.into(),
            redelivered: false,
            expires_at: None,
        }
    }

    /// Name of the topic this message was published to, or `""` if unsent.
    pub fn topic_name(&self) -> &str {
        self.destination.as_ref().map(Destination::name).unwrap_or("")
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
