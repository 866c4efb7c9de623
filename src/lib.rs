//! Topic broker transport for outbox relays.
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │ TopicPublishSender       │      │ TopicConsumerClientFactory    │
//! │  publish / publish_async │      │  create(group) ─▶ client      │
//! └────────────┬─────────────┘      └──────────────┬───────────────┘
//!              │ rent / return                      │ transactional session
//!              ▼                                    ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ ConnectionPool  (idle sessions, soft capacity)                   │
//! │   └─ ConnectionManager  (one shared connection, rebuilt on fail) │
//! └──────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                     broker::Connector (native client)
//! ```
//!
//! The pool is built once by the application and shared by handle:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sourced_broker::memory::InMemoryBroker;
//! use sourced_broker::{
//!     BrokerOptions, CancellationToken, ConnectionPool, ConsumerClient, ConsumerClientFactory,
//!     TopicConsumerClientFactory, TopicPublishSender,
//! };
//!
//! let broker = InMemoryBroker::new();
//! let options = BrokerOptions::new("localhost");
//! let pool = Arc::new(ConnectionPool::new(broker, &options));
//!
//! let factory = TopicConsumerClientFactory::new(Arc::clone(&pool), &options);
//! let client = factory.create("billing").unwrap();
//! client.subscribe(["orders.#"]).unwrap();
//! client.on_message_received(|context| println!("{} {}", context.name, context.content));
//!
//! let sender = TopicPublishSender::new(pool, &options);
//! assert!(sender.publish("orders.created", "{}").is_success());
//!
//! let token = CancellationToken::new();
//! token.cancel();
//! client.listening(Duration::from_millis(10), &token).unwrap();
//! client.commit().unwrap();
//! ```

pub mod broker;
mod connection;
mod consumer;
#[cfg(feature = "emitter")]
pub mod emitter;
mod error;
mod host;
pub mod memory;
mod notify;
mod options;
mod publisher;
mod relay;

pub use connection::{ConnectionManager, ConnectionPool, PooledSession};
pub use consumer::{
    merge_topics, MessageContext, TopicConsumerClient, TopicConsumerClientFactory,
    BROKER_WILDCARD, MULTI_LEVEL_WILDCARD,
};
pub use error::{Result, TransportError};
pub use host::{ConsumerClient, ConsumerClientFactory, PublishExecutor};
pub use notify::{HandlerId, Handlers, LogMessage, LogType};
pub use options::{BrokerOptions, ConnectSettingsHook};
pub use publisher::{OperateError, PublishResult, TopicPublishSender};
pub use relay::{ConsumerExit, ConsumerStats, ConsumerThread, OutboxPublisher};

// Re-export the cancellation token Listening polls
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
