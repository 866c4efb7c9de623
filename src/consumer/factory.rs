use std::sync::Arc;

use tracing::{error, info};

use super::client::TopicConsumerClient;
use crate::broker::{AcknowledgementMode, Connector};
use crate::connection::ConnectionPool;
use crate::error::Result;
use crate::host::ConsumerClientFactory;
use crate::options::BrokerOptions;

/// Creates a `TopicConsumerClient` per subscriber group.
///
/// Each client gets its own transactional session on the pool's shared
/// connection. Native failures while opening it surface as
/// `TransportError::BrokerConnection`.
pub struct TopicConsumerClientFactory<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    servers_address: String,
}

impl<C: Connector> TopicConsumerClientFactory<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, options: &BrokerOptions) -> Self {
        Self {
            pool,
            servers_address: options.host_name.clone(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }
}

impl<C: Connector> ConsumerClientFactory for TopicConsumerClientFactory<C> {
    type Client = TopicConsumerClient<C>;

    fn create(&self, group_id: &str) -> Result<TopicConsumerClient<C>> {
        let session = self
            .pool
            .create_session(AcknowledgementMode::Transactional)
            .inspect_err(|err| {
                error!(group = group_id, error = %err, "consumer client create failed")
            })?;
        info!(group = group_id, "consumer client created");
        Ok(TopicConsumerClient::new(
            group_id,
            self.servers_address.clone(),
            session,
        ))
    }
}
