//! Interfaces the hosting relay framework consumes.
//!
//! The relay drives consumption through `ConsumerClientFactory` and
//! `ConsumerClient`, and publication through `PublishExecutor`. Anything
//! implementing these can stand in for the broker transport.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::consumer::MessageContext;
use crate::error::Result;
use crate::notify::{HandlerId, LogMessage};
use crate::publisher::PublishResult;

/// A subscriber group's connection to the broker.
pub trait ConsumerClient: Send + Sync {
    /// Address of the broker this client reads from.
    fn servers_address(&self) -> &str;

    /// Subscribe to a set of topics, replacing any previous subscription.
    fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>;

    /// Receive and dispatch messages on the calling thread until cancelled.
    ///
    /// Cancellation is checked between receive attempts, so stopping takes
    /// at most one more `timeout`. A receive failure ends the loop with a
    /// connectivity error; the client must then be recreated.
    fn listening(&self, timeout: Duration, cancellation: &CancellationToken) -> Result<()>;

    /// Acknowledge every message received since the last commit or reject.
    fn commit(&self) -> Result<()>;

    /// Roll back every message received since the last commit or reject,
    /// making them eligible for redelivery.
    fn reject(&self) -> Result<()>;

    fn dispose(&self);

    fn on_message_received<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&MessageContext) + Send + Sync + 'static;

    fn on_log<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LogMessage) + Send + Sync + 'static;
}

/// Creates consumer clients on demand, one per subscriber group.
pub trait ConsumerClientFactory: Send + Sync {
    type Client: ConsumerClient;

    /// Fails with a connectivity error if the broker cannot be reached.
    fn create(&self, group_id: &str) -> Result<Self::Client>;
}

/// Publishes relay messages to a topic.
///
/// Failures are reported in the returned `PublishResult`, never as a panic
/// or error, so the relay can inspect and retry uniformly.
#[allow(async_fn_in_trait)]
pub trait PublishExecutor: Send + Sync {
    async fn publish_async(&self, topic_name: &str, content: &str) -> PublishResult;
}
