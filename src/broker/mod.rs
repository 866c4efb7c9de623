//! Native broker client abstraction.
//!
//! The adapter never talks to a concrete client library directly. It is
//! written against this family of traits, each naming the next object in
//! the chain through an associated type:
//!
//! ```text
//! Connector ──connect──▶ Connection ──create_session──▶ Session
//!                                                         │
//!                                     ┌───────────────────┴────────────────┐
//!                                     ▼                                    ▼
//!                              MessageConsumer                      MessageProducer
//! ```
//!
//! `InMemoryBroker` (see `crate::memory`) implements the whole chain.

mod error;
mod message;

use std::collections::BTreeMap;
use std::time::Duration;

pub use error::BrokerError;
pub use message::{Destination, TextMessage};

/// Acknowledgement mode a session is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgementMode {
    /// Messages are acknowledged on receive and sends are immediate.
    AutoAcknowledge,
    /// Receives and sends form one unit of work settled by commit or rollback.
    Transactional,
}

/// Everything the connector needs to open a connection.
///
/// The options customization hook receives this before the first connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectSettings {
    pub uri: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// Callback fired by a connection when its transport is interrupted.
pub type InterruptedListener = Box<dyn Fn() + Send + Sync>;

/// Native connection factory.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Open a new (not yet started) connection.
    fn connect(&self, settings: &ConnectSettings) -> Result<Self::Connection, BrokerError>;
}

/// One physical link to the broker, shared by every session created on it.
pub trait Connection: Send + Sync {
    type Session: Session;

    fn start(&self) -> Result<(), BrokerError>;

    fn create_session(&self, mode: AcknowledgementMode) -> Result<Self::Session, BrokerError>;

    /// True once the underlying transport has failed; the connection is unusable.
    fn is_transport_failed(&self) -> bool;

    fn add_interrupted_listener(&self, listener: InterruptedListener);

    /// Close the connection and every session created on it. Idempotent.
    fn close(&self);
}

/// A unit of work bound to one connection.
pub trait Session: Send + Sync {
    type Consumer: MessageConsumer;
    type Producer: MessageProducer;

    fn session_id(&self) -> &str;

    fn is_transacted(&self) -> bool;

    /// Resolve a topic destination by name.
    fn topic(&self, name: &str) -> Destination {
        Destination::topic(name)
    }

    fn create_consumer(&self, destination: &Destination) -> Result<Self::Consumer, BrokerError>;

    fn create_producer(&self, destination: &Destination) -> Result<Self::Producer, BrokerError>;

    fn commit(&self) -> Result<(), BrokerError>;

    fn rollback(&self) -> Result<(), BrokerError>;

    /// Close the session. Uncommitted work is rolled back. Idempotent.
    fn close(&self);
}

/// Subscription handle bound to one destination.
pub trait MessageConsumer: Send + Sync {
    /// Block up to `timeout` for the next message.
    fn receive(&self, timeout: Duration) -> Result<Option<TextMessage>, BrokerError>;

    fn close(&self);
}

pub trait MessageProducer: Send {
    /// Lifetime stamped on every message sent after this call.
    fn set_time_to_live(&mut self, ttl: Duration);

    fn send(&self, message: TextMessage) -> Result<(), BrokerError>;

    fn close(&self);
}

/// Session type produced by a connector's connections.
pub type SessionOf<C> = <<C as Connector>::Connection as Connection>::Session;

/// Consumer type produced by a connector's sessions.
pub type ConsumerOf<C> = <SessionOf<C> as Session>::Consumer;
