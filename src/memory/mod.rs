//! In-memory broker implementing the native client traits.

mod broker;
mod pattern;

pub use broker::{InMemoryBroker, MemoryConnection, MemoryConsumer, MemoryProducer, MemorySession};
pub use pattern::{destination_matches, pattern_matches, SINGLE_SEGMENT, TRAILING_SEGMENTS};
