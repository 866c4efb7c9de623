//! Subscriber-group consumption.

mod client;
mod context;
mod destination;
mod factory;

pub use client::TopicConsumerClient;
pub use context::MessageContext;
pub use destination::{merge_topics, BROKER_WILDCARD, MULTI_LEVEL_WILDCARD};
pub use factory::TopicConsumerClientFactory;
