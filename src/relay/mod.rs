//! Glue between the transport and an outbox relay.

mod outbox;
mod thread;

pub use outbox::OutboxPublisher;
pub use thread::{ConsumerExit, ConsumerStats, ConsumerThread};
