use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::context::MessageContext;
use super::destination::merge_topics;
use crate::broker::{
    BrokerError, Connector, ConsumerOf, Destination, MessageConsumer, Session, SessionOf,
};
use crate::error::{Result, TransportError};
use crate::host::ConsumerClient;
use crate::notify::{HandlerId, Handlers, LogMessage, LogType};

/// Consumer client for one subscriber group.
///
/// Owns a transactional session (never pooled) and at most one consumer on
/// a merged topic destination. Everything received between two calls to
/// `commit`/`reject` is settled as one unit.
pub struct TopicConsumerClient<C: Connector> {
    group_id: String,
    servers_address: String,
    session: SessionOf<C>,
    subscription: Mutex<Option<(Destination, ConsumerOf<C>)>>,
    message_received: Handlers<MessageContext>,
    log: Handlers<LogMessage>,
    disposed: AtomicBool,
}

impl<C: Connector> TopicConsumerClient<C> {
    pub(crate) fn new(
        group_id: impl Into<String>,
        servers_address: impl Into<String>,
        session: SessionOf<C>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            servers_address: servers_address.into(),
            session,
            subscription: Mutex::new(None),
            message_received: Handlers::new(),
            log: Handlers::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The merged destination currently subscribed to.
    pub fn destination(&self) -> Option<Destination> {
        self.subscription
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|(destination, _)| destination.clone()))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TransportError::Disposed("consumer client"));
        }
        Ok(())
    }

    fn subscription(&self) -> Result<MutexGuard<'_, Option<(Destination, ConsumerOf<C>)>>> {
        self.subscription
            .lock()
            .map_err(|_| TransportError::Poisoned("consumer subscription"))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<MessageContext>> {
        let subscription = self.subscription()?;
        let (_, consumer) = subscription
            .as_ref()
            .ok_or_else(|| TransportError::NotSubscribed(self.group_id.clone()))?;

        match consumer.receive(timeout) {
            Ok(Some(message)) => Ok(Some(MessageContext {
                group: self.group_id.clone(),
                name: message.topic_name().to_string(),
                content: message.text,
            })),
            Ok(None) => Ok(None),
            Err(err) => {
                error!(
                    group = %self.group_id,
                    code = %err.code,
                    error = %err.description,
                    "broker receive failed"
                );
                self.log.emit(&LogMessage::new(LogType::ServerConnError, err.to_string()));
                Err(TransportError::broker_connection(err))
            }
        }
    }
}

impl<C: Connector> TopicConsumerClient<C> {
    fn settle(&self, action: &str, outcome: std::result::Result<(), BrokerError>) -> Result<()> {
        outcome.map_err(|err| {
            error!(
                group = %self.group_id,
                action,
                code = %err.code,
                error = %err.description,
                "broker transaction failed"
            );
            self.log.emit(&LogMessage::new(
                LogType::ConsumeError,
                format!("{} failed: {}", action, err),
            ));
            TransportError::broker_connection(err)
        })
    }
}

impl<C: Connector> ConsumerClient for TopicConsumerClient<C> {
    fn servers_address(&self) -> &str {
        &self.servers_address
    }

    fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        let name = merge_topics(topics)?;
        let destination = self.session.topic(&name);
        let consumer = self
            .session
            .create_consumer(&destination)
            .map_err(TransportError::broker_connection)?;

        if let Some((_, previous)) = self.subscription()?.replace((destination, consumer)) {
            previous.close();
        }

        info!(group = %self.group_id, destination = %name, "subscribed to broker topics");
        self.log.emit(&LogMessage::new(
            LogType::ConsumerRegistered,
            format!("group {} subscribed to {}", self.group_id, name),
        ));
        Ok(())
    }

    fn listening(&self, timeout: Duration, cancellation: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        loop {
            if let Some(context) = self.receive(timeout)? {
                self.message_received.emit(&context);
            }
            if cancellation.is_cancelled() {
                debug!(group = %self.group_id, "listening cancelled");
                return Ok(());
            }
        }
    }

    fn commit(&self) -> Result<()> {
        self.settle("commit", self.session.commit())
    }

    fn reject(&self) -> Result<()> {
        self.settle("rollback", self.session.rollback())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = match self.subscription.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((_, consumer)) = subscription {
            consumer.close();
        }
        // The connection belongs to the pool and stays open.
        self.session.close();
        self.log.emit(&LogMessage::new(
            LogType::ConsumerShutdown,
            format!("group {} consumer disposed", self.group_id),
        ));
    }

    fn on_message_received<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&MessageContext) + Send + Sync + 'static,
    {
        self.message_received.register(handler)
    }

    fn on_log<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        self.log.register(handler)
    }
}

impl<C: Connector> Drop for TopicConsumerClient<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AcknowledgementMode, ConnectSettings};
    use crate::connection::ConnectionPool;
    use crate::memory::InMemoryBroker;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn client(
        broker: &InMemoryBroker,
    ) -> (ConnectionPool<InMemoryBroker>, TopicConsumerClient<InMemoryBroker>) {
        let pool = ConnectionPool::with_capacity(broker.clone(), ConnectSettings::default(), 4);
        let session = pool.create_session(AcknowledgementMode::Transactional).unwrap();
        (pool, TopicConsumerClient::new("group-a", "localhost", session))
    }

    fn collect(client: &TopicConsumerClient<InMemoryBroker>) -> Arc<Mutex<Vec<MessageContext>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_message_received(move |context| sink.lock().unwrap().push(context.clone()));
        seen
    }

    #[test]
    fn listening_without_subscription_fails() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        let err = client
            .listening(Duration::from_millis(5), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err, TransportError::NotSubscribed("group-a".into()));
    }

    #[test]
    fn subscribe_merges_topics_into_one_destination() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);

        client.subscribe(["a.c", "a.b", "a.b"]).unwrap();

        assert_eq!(client.destination().unwrap().name(), "a.b,a.c");
        assert_eq!(broker.open_consumers(), 1);
    }

    #[test]
    fn resubscribe_replaces_consumer() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);

        client.subscribe(["first"]).unwrap();
        client.subscribe(["second"]).unwrap();

        assert_eq!(client.destination().unwrap().name(), "second");
        assert_eq!(broker.open_consumers(), 1);
    }

    #[test]
    fn delivers_context_then_stops_on_cancel() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        client.subscribe(["orders.#"]).unwrap();
        let seen = collect(&client);

        broker.publish("orders.created", r#"{"id":1}"#);
        let token = CancellationToken::new();
        token.cancel();
        client.listening(Duration::from_millis(20), &token).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![MessageContext {
                group: "group-a".into(),
                name: "orders.created".into(),
                content: r#"{"id":1}"#.into(),
            }]
        );
    }

    #[test]
    fn receive_failure_ends_loop_with_connectivity_error() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        client.subscribe(["t"]).unwrap();
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        client.on_log(move |log| sink.lock().unwrap().push(log.log_type));

        broker.fail_receives(true);
        let err = client
            .listening(Duration::from_millis(5), &CancellationToken::new())
            .unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(*logs.lock().unwrap(), vec![LogType::ServerConnError]);
    }

    #[test]
    fn reject_redelivers_and_commit_acknowledges() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        client.subscribe(["t"]).unwrap();
        let seen = collect(&client);
        let token = CancellationToken::new();
        token.cancel();

        broker.publish("t", "1");
        broker.publish("t", "2");
        client.listening(Duration::from_millis(5), &token).unwrap();
        client.listening(Duration::from_millis(5), &token).unwrap();
        client.reject().unwrap();

        client.listening(Duration::from_millis(5), &token).unwrap();
        client.listening(Duration::from_millis(5), &token).unwrap();
        client.commit().unwrap();
        client.reject().unwrap();
        client.listening(Duration::from_millis(5), &token).unwrap();

        let contents: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.content.clone())
            .collect();
        assert_eq!(contents, vec!["1", "2", "1", "2"]);
        assert_eq!(broker.queued_messages(), 0);
    }

    #[test]
    fn failed_commit_is_reported_as_consume_error() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        client.subscribe(["t"]).unwrap();
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        client.on_log(move |log| sink.lock().unwrap().push(log.log_type));

        broker.interrupt_connections();
        let err = client.commit().unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(*logs.lock().unwrap(), vec![LogType::ConsumeError]);
    }

    #[test]
    fn cancellation_waits_for_receive_timeout() {
        let broker = InMemoryBroker::new();
        let (_pool, client) = client(&broker);
        client.subscribe(["quiet"]).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let started = Instant::now();
        client.listening(Duration::from_millis(40), &token).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn dispose_closes_consumer_and_session_only() {
        let broker = InMemoryBroker::new();
        let (pool, client) = client(&broker);
        client.subscribe(["t"]).unwrap();
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        client.on_log(move |log| sink.lock().unwrap().push(log.log_type));

        client.dispose();
        client.dispose();

        assert_eq!(broker.open_consumers(), 0);
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(broker.open_connections(), 1);
        assert!(pool.get_connection().is_ok());
        assert_eq!(*logs.lock().unwrap(), vec![LogType::ConsumerShutdown]);
        assert!(matches!(
            client.subscribe(["t"]),
            Err(TransportError::Disposed(_))
        ));
    }
}
