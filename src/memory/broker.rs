use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::pattern::destination_matches;
use crate::broker::{
    AcknowledgementMode, BrokerError, ConnectSettings, Connection, Connector, Destination,
    InterruptedListener, MessageConsumer, MessageProducer, Session, TextMessage,
};

/// In-process topic broker for testing and single-process deployments.
///
/// Features:
/// - Thread-safe (clones are handles onto the same broker)
/// - Topic fan-out to every live consumer whose destination matches
/// - Transactional sessions: sends are buffered and receives held until
///   commit; rollback puts received messages back for redelivery
/// - Fault injection for exercising reconnect and failure paths
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use sourced_broker::broker::{
///     AcknowledgementMode, Connection, Connector, ConnectSettings, MessageConsumer, Session,
/// };
/// use sourced_broker::memory::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// let connection = broker.connect(&ConnectSettings::default()).unwrap();
/// connection.start().unwrap();
///
/// let session = connection.create_session(AcknowledgementMode::AutoAcknowledge).unwrap();
/// let consumer = session.create_consumer(&session.topic("orders.*")).unwrap();
///
/// broker.publish("orders.created", r#"{"id":"1"}"#);
///
/// let message = consumer.receive(Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(message.topic_name(), "orders.created");
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    arrived: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    connections: HashMap<u64, ConnectionState>,
    sessions: HashMap<u64, SessionState>,
    consumers: HashMap<u64, ConsumerState>,
    faults: Faults,
    connections_opened: usize,
    published: usize,
}

#[derive(Default)]
struct ConnectionState {
    started: bool,
    failed: bool,
    listeners: Vec<Arc<dyn Fn() + Send + Sync>>,
}

struct SessionState {
    connection: u64,
    mode: AcknowledgementMode,
    /// Sends buffered until commit (transactional only).
    pending: Vec<TextMessage>,
    /// Messages received since the last commit/rollback, with their consumer.
    delivered: Vec<(u64, TextMessage)>,
}

struct ConsumerState {
    session: u64,
    destination: String,
    queue: VecDeque<TextMessage>,
}

#[derive(Default)]
struct Faults {
    refuse_connections: bool,
    fail_session_creation: bool,
    fail_receives: bool,
    reject_sends: Option<BrokerError>,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_connection(&self, id: u64) -> Result<&ConnectionState, BrokerError> {
        let connection = self
            .connections
            .get(&id)
            .ok_or_else(|| BrokerError::closed("connection"))?;
        if connection.failed {
            return Err(BrokerError::transport_failed("connection transport has failed"));
        }
        Ok(connection)
    }

    fn ensure_session(&self, id: u64) -> Result<&SessionState, BrokerError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| BrokerError::closed("session"))?;
        self.ensure_connection(session.connection)?;
        Ok(session)
    }

    fn is_live_consumer(&self, consumer: &ConsumerState) -> bool {
        self.sessions
            .get(&consumer.session)
            .and_then(|session| self.connections.get(&session.connection))
            .is_some_and(|connection| !connection.failed)
    }

    /// Fan a message out to every live consumer whose destination matches.
    fn deliver(&mut self, message: TextMessage) {
        self.published += 1;
        let topic = message.topic_name().to_string();
        let targets: Vec<u64> = self
            .consumers
            .iter()
            .filter(|(_, consumer)| destination_matches(&consumer.destination, &topic))
            .filter(|(_, consumer)| self.is_live_consumer(consumer))
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            if let Some(consumer) = self.consumers.get_mut(&id) {
                consumer.queue.push_back(message.clone());
            }
        }
    }

    /// Put delivered messages back at the head of their consumers' queues,
    /// preserving their delivery order.
    fn requeue(&mut self, delivered: Vec<(u64, TextMessage)>) {
        for (consumer_id, mut message) in delivered.into_iter().rev() {
            if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
                message.redelivered = true;
                consumer.queue.push_front(message);
            }
        }
    }

    fn remove_session(&mut self, id: u64) {
        if self.sessions.remove(&id).is_some() {
            self.consumers.retain(|_, consumer| consumer.session != id);
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a text message to a topic without going through a session.
    pub fn publish(&self, topic: &str, text: impl Into<String>) {
        let mut state = self.shared.lock();
        let mut message = TextMessage::new(text);
        message.message_id = format!("ID:memory-message-{}", state.next_id());
        message.destination = Some(Destination::topic(topic));
        state.deliver(message);
        self.shared.arrived.notify_all();
    }

    /// Mark every open connection transport-failed and fire its interrupted listeners.
    pub fn interrupt_connections(&self) {
        let listeners: Vec<Arc<dyn Fn() + Send + Sync>> = {
            let mut state = self.shared.lock();
            state
                .connections
                .values_mut()
                .flat_map(|connection| {
                    connection.failed = true;
                    connection.listeners.clone()
                })
                .collect()
        };
        self.shared.arrived.notify_all();
        for listener in listeners {
            listener();
        }
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.lock().faults.refuse_connections = refuse;
    }

    pub fn fail_session_creation(&self, fail: bool) {
        self.shared.lock().faults.fail_session_creation = fail;
    }

    pub fn fail_receives(&self, fail: bool) {
        self.shared.lock().faults.fail_receives = fail;
        self.shared.arrived.notify_all();
    }

    /// Reject every send with the given native error until `accept_sends`.
    pub fn reject_sends(&self, code: impl Into<String>, description: impl Into<String>) {
        self.shared.lock().faults.reject_sends = Some(BrokerError::new(code, description));
    }

    pub fn accept_sends(&self) {
        self.shared.lock().faults.reject_sends = None;
    }

    /// Number of connections ever opened on this broker.
    pub fn connections_opened(&self) -> usize {
        self.shared.lock().connections_opened
    }

    pub fn open_connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.lock().sessions.len()
    }

    pub fn open_consumers(&self) -> usize {
        self.shared.lock().consumers.len()
    }

    /// Number of messages fanned out (committed sends and direct publishes).
    pub fn published_count(&self) -> usize {
        self.shared.lock().published
    }

    /// Messages published to `topic` still waiting in consumer queues.
    ///
    /// A message fanned out to several consumers counts once per queue.
    pub fn pending_for(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .consumers
            .values()
            .flat_map(|consumer| consumer.queue.iter())
            .filter(|message| message.topic_name() == topic)
            .count()
    }

    /// Messages waiting in consumer queues, not yet received.
    pub fn queued_messages(&self) -> usize {
        self.shared
            .lock()
            .consumers
            .values()
            .map(|consumer| consumer.queue.len())
            .sum()
    }
}

impl Connector for InMemoryBroker {
    type Connection = MemoryConnection;

    fn connect(&self, settings: &ConnectSettings) -> Result<MemoryConnection, BrokerError> {
        let mut state = self.shared.lock();
        if state.faults.refuse_connections {
            return Err(BrokerError::new(
                BrokerError::CONNECTION_REFUSED,
                format!("connection to {} refused", settings.uri),
            ));
        }
        let id = state.next_id();
        state.connections.insert(id, ConnectionState::default());
        state.connections_opened += 1;
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
        })
    }
}

/// Connection handle onto an `InMemoryBroker`.
pub struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection").field("id", &self.id).finish()
    }
}

impl MemoryConnection {
    pub fn is_started(&self) -> bool {
        self.shared
            .lock()
            .connections
            .get(&self.id)
            .is_some_and(|connection| connection.started)
    }
}

impl Connection for MemoryConnection {
    type Session = MemorySession;

    fn start(&self) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_connection(self.id)?;
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.started = true;
        }
        Ok(())
    }

    fn create_session(&self, mode: AcknowledgementMode) -> Result<MemorySession, BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_connection(self.id)?;
        if state.faults.fail_session_creation {
            return Err(BrokerError::new("SESSION_REFUSED", "broker refused to open a session"));
        }
        let id = state.next_id();
        state.sessions.insert(
            id,
            SessionState {
                connection: self.id,
                mode,
                pending: Vec::new(),
                delivered: Vec::new(),
            },
        );
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            id,
            name: format!("ID:memory-session-{}", id),
            mode,
        })
    }

    fn is_transport_failed(&self) -> bool {
        self.shared
            .lock()
            .connections
            .get(&self.id)
            .is_some_and(|connection| connection.failed)
    }

    fn add_interrupted_listener(&self, listener: InterruptedListener) {
        if let Some(connection) = self.shared.lock().connections.get_mut(&self.id) {
            connection.listeners.push(Arc::from(listener));
        }
    }

    fn close(&self) {
        let mut state = self.shared.lock();
        if state.connections.remove(&self.id).is_none() {
            return;
        }
        let sessions: Vec<u64> = state
            .sessions
            .iter()
            .filter(|(_, session)| session.connection == self.id)
            .map(|(id, _)| *id)
            .collect();
        for id in sessions {
            state.remove_session(id);
        }
        self.shared.arrived.notify_all();
    }
}

/// Session handle onto an `InMemoryBroker`. Closed on drop.
pub struct MemorySession {
    shared: Arc<Shared>,
    id: u64,
    name: String,
    mode: AcknowledgementMode,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl MemorySession {
    fn settle(&self, commit: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session(self.id)?;
        if self.mode != AcknowledgementMode::Transactional {
            return Err(BrokerError::new(
                BrokerError::NOT_TRANSACTED,
                "session is not transacted",
            ));
        }
        let (pending, delivered) = match state.sessions.get_mut(&self.id) {
            Some(session) => (
                std::mem::take(&mut session.pending),
                std::mem::take(&mut session.delivered),
            ),
            None => return Err(BrokerError::closed("session")),
        };
        if commit {
            for message in pending {
                state.deliver(message);
            }
        } else {
            state.requeue(delivered);
        }
        self.shared.arrived.notify_all();
        Ok(())
    }
}

impl Session for MemorySession {
    type Consumer = MemoryConsumer;
    type Producer = MemoryProducer;

    fn session_id(&self) -> &str {
        &self.name
    }

    fn is_transacted(&self) -> bool {
        self.mode == AcknowledgementMode::Transactional
    }

    fn create_consumer(&self, destination: &Destination) -> Result<MemoryConsumer, BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session(self.id)?;
        let id = state.next_id();
        state.consumers.insert(
            id,
            ConsumerState {
                session: self.id,
                destination: destination.name().to_string(),
                queue: VecDeque::new(),
            },
        );
        Ok(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            id,
            session: self.id,
            transacted: self.is_transacted(),
        })
    }

    fn create_producer(&self, destination: &Destination) -> Result<MemoryProducer, BrokerError> {
        self.shared.lock().ensure_session(self.id)?;
        Ok(MemoryProducer {
            shared: Arc::clone(&self.shared),
            session: self.id,
            transacted: self.is_transacted(),
            destination: destination.clone(),
            time_to_live: None,
        })
    }

    fn commit(&self) -> Result<(), BrokerError> {
        self.settle(true)
    }

    fn rollback(&self) -> Result<(), BrokerError> {
        self.settle(false)
    }

    fn close(&self) {
        let mut state = self.shared.lock();
        state.remove_session(self.id);
        self.shared.arrived.notify_all();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer handle onto an `InMemoryBroker`. Closed on drop.
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    id: u64,
    session: u64,
    transacted: bool,
}

impl MessageConsumer for MemoryConsumer {
    fn receive(&self, timeout: Duration) -> Result<Option<TextMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.lock();

        loop {
            guard.ensure_session(self.session)?;
            if guard.faults.fail_receives {
                return Err(BrokerError::transport_failed("receive failed"));
            }

            let now = Instant::now();
            let state = &mut *guard;
            let consumer = state
                .consumers
                .get_mut(&self.id)
                .ok_or_else(|| BrokerError::closed("consumer"))?;

            while let Some(message) = consumer.queue.pop_front() {
                if message.is_expired(now) {
                    continue;
                }
                if self.transacted {
                    if let Some(session) = state.sessions.get_mut(&self.session) {
                        session.delivered.push((self.id, message.clone()));
                    }
                }
                return Ok(Some(message));
            }

            if now >= deadline {
                return Ok(None);
            }

            guard = self
                .shared
                .arrived
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn close(&self) {
        self.shared.lock().consumers.remove(&self.id);
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

/// One-shot producer bound to a destination.
pub struct MemoryProducer {
    shared: Arc<Shared>,
    session: u64,
    transacted: bool,
    destination: Destination,
    time_to_live: Option<Duration>,
}

impl MessageProducer for MemoryProducer {
    fn set_time_to_live(&mut self, ttl: Duration) {
        self.time_to_live = Some(ttl);
    }

    fn send(&self, mut message: TextMessage) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session(self.session)?;
        if let Some(err) = &state.faults.reject_sends {
            return Err(err.clone());
        }

        message.message_id = format!("ID:memory-message-{}", state.next_id());
        message.destination = Some(self.destination.clone());
        message.expires_at = self.time_to_live.map(|ttl| Instant::now() + ttl);

        if self.transacted {
            if let Some(session) = state.sessions.get_mut(&self.session) {
                session.pending.push(message);
            }
        } else {
            state.deliver(message);
            self.shared.arrived.notify_all();
        }
        Ok(())
    }

    fn close(&self) {}
}
