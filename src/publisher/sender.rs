use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::broker::{BrokerError, Connector, MessageProducer, Session, SessionOf, TextMessage};
use crate::connection::ConnectionPool;
use crate::error::TransportError;
use crate::host::PublishExecutor;
use crate::options::BrokerOptions;

use super::result::PublishResult;

/// Publishes text messages to topics using sessions rented from the pool.
///
/// A session that sent successfully goes back to the pool (or is closed if
/// the pool declines it). A session that failed is always closed, never
/// returned.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use sourced_broker::memory::InMemoryBroker;
/// use sourced_broker::{BrokerOptions, ConnectionPool, TopicPublishSender};
///
/// let broker = InMemoryBroker::new();
/// let options = BrokerOptions::default();
/// let pool = Arc::new(ConnectionPool::new(broker.clone(), &options));
/// let sender = TopicPublishSender::new(pool, &options);
///
/// assert!(sender.publish("orders.created", r#"{"id":"1"}"#).is_success());
/// assert_eq!(broker.published_count(), 1);
/// ```
pub struct TopicPublishSender<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    time_to_live: Duration,
}

impl<C: Connector> TopicPublishSender<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, options: &BrokerOptions) -> Self {
        Self {
            pool,
            time_to_live: options.message_expiry(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    /// Publish `content` to `topic_name`. Failures come back as data.
    pub fn publish(&self, topic_name: &str, content: &str) -> PublishResult {
        let session = match self.pool.rent() {
            Ok(session) => session,
            Err(err) => {
                warn!(topic = topic_name, error = %err, "no broker session available for publish");
                return PublishResult::failed(err);
            }
        };

        match self.send_text(&session, topic_name, content) {
            Ok(()) => {
                if let Err(declined) = self.pool.return_session(session) {
                    declined.close();
                }
                debug!(topic = topic_name, body = content, "topic message published");
                PublishResult::Success
            }
            Err(err) => {
                session.close();
                warn!(
                    topic = topic_name,
                    code = %err.code,
                    error = %err.description,
                    "topic message publish failed"
                );
                PublishResult::failed(TransportError::PublishFailed(err))
            }
        }
    }

    fn send_text(
        &self,
        session: &SessionOf<C>,
        topic_name: &str,
        content: &str,
    ) -> Result<(), BrokerError> {
        let destination = session.topic(topic_name);
        let mut producer = session.create_producer(&destination)?;
        producer.set_time_to_live(self.time_to_live);
        let sent = producer.send(TextMessage::new(content));
        producer.close();
        sent
    }
}

impl<C: Connector> PublishExecutor for TopicPublishSender<C> {
    async fn publish_async(&self, topic_name: &str, content: &str) -> PublishResult {
        self.publish(topic_name, content)
    }
}
