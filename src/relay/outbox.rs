use std::fmt;

use crate::broker::Connector;
use crate::error::TransportError;
use crate::publisher::TopicPublishSender;

/// Trait for publishing outbox records to external systems.
pub trait OutboxPublisher {
    type Error: fmt::Display;

    /// Publish an event with the given type and payload bytes.
    fn publish(&mut self, event_type: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Outbox records are published to the topic named by their event type,
/// with the payload sent as text.
impl<C: Connector> OutboxPublisher for TopicPublishSender<C> {
    type Error = TransportError;

    fn publish(&mut self, event_type: &str, payload: &[u8]) -> Result<(), TransportError> {
        let content = std::str::from_utf8(payload).map_err(|e| {
            TransportError::invalid_argument(format!(
                "payload for {} is not UTF-8: {}",
                event_type, e
            ))
        })?;
        TopicPublishSender::publish(self, event_type, content).into_result()
    }
}
