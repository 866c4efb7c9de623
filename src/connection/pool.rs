use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use super::admission::AdmissionGate;
use super::manager::ConnectionManager;
use crate::broker::{
    AcknowledgementMode, ConnectSettings, Connection, Connector, Session, SessionOf,
};
use crate::error::{Result, TransportError};
use crate::options::BrokerOptions;

/// A session rented from the pool, tagged with the connection it was opened on.
pub struct PooledSession<S> {
    session: S,
    generation: u64,
}

impl<S: Session> PooledSession<S> {
    /// Generation of the connection this session is bound to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Dispose the session instead of handing it back.
    pub fn close(self) {
        self.session.close();
    }

    pub fn into_inner(self) -> S {
        self.session
    }
}

impl<S> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: fmt::Debug> fmt::Debug for PooledSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Bounded cache of reusable publisher sessions over one shared connection.
///
/// Capacity is soft: renting never waits for a session to come back. When
/// no idle session is available a new one is created, and `return_session`
/// declines anything beyond capacity, leaving disposal to the caller.
///
/// ## Example
///
/// ```
/// use sourced_broker::memory::InMemoryBroker;
/// use sourced_broker::{BrokerOptions, ConnectionPool};
///
/// let pool = ConnectionPool::new(InMemoryBroker::new(), &BrokerOptions::default());
///
/// let session = pool.rent().unwrap();
/// // ... produce on the session ...
/// if let Err(declined) = pool.return_session(session) {
///     declined.close();
/// }
/// assert_eq!(pool.idle_count(), 1);
/// ```
pub struct ConnectionPool<C: Connector> {
    manager: ConnectionManager<C>,
    idle: Mutex<VecDeque<PooledSession<SessionOf<C>>>>,
    /// Idle sessions plus returns in flight.
    count: AtomicUsize,
    capacity: AtomicUsize,
    gate: AdmissionGate,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, options: &BrokerOptions) -> Self {
        Self::with_capacity(connector, options.connect_settings(), options.pool_size)
    }

    pub fn with_capacity(connector: C, settings: ConnectSettings, capacity: usize) -> Self {
        Self {
            manager: ConnectionManager::new(connector, settings),
            idle: Mutex::new(VecDeque::new()),
            count: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            gate: AdmissionGate::new(),
        }
    }

    pub fn manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    /// Get the shared connection. Rebuilding it discards every idle session,
    /// since they are bound to the connection being replaced.
    pub fn get_connection(&self) -> Result<Arc<C::Connection>> {
        self.manager
            .acquire(|| self.drain_idle())
            .map(|live| live.connection)
    }

    /// Open a session on the shared connection that is never pooled.
    pub fn create_session(&self, mode: AcknowledgementMode) -> Result<SessionOf<C>> {
        let live = self.manager.acquire(|| self.drain_idle())?;
        live.connection.create_session(mode).map_err(|err| {
            error!(code = %err.code, error = %err.description, "broker session create failed");
            TransportError::broker_connection(err)
        })
    }

    /// Rent a session: an idle one if available, otherwise a new one.
    pub fn rent(&self) -> Result<PooledSession<SessionOf<C>>> {
        let live = self.manager.acquire(|| self.drain_idle())?;

        loop {
            let pooled = {
                let _admitted = self.gate.admit(|| self.over_capacity())?;
                let pooled = self.idle_sessions().pop_front();
                if pooled.is_some() {
                    self.count.fetch_sub(1, Ordering::AcqRel);
                }
                pooled
            };

            match pooled {
                Some(session) if session.generation == live.generation => return Ok(session),
                // Returned against a connection that has since been replaced.
                Some(stale) => stale.close(),
                None => break,
            }
        }

        let session = live
            .connection
            .create_session(AcknowledgementMode::AutoAcknowledge)
            .map_err(|err| {
                error!(code = %err.code, error = %err.description, "broker session create failed");
                TransportError::broker_connection(err)
            })?;
        debug!(session = session.session_id(), "created pooled broker session");

        Ok(PooledSession {
            session,
            generation: live.generation,
        })
    }

    /// Hand a session back to the pool.
    ///
    /// Declined sessions (pool full, disposed, or bound to a replaced
    /// connection) are given back in `Err` and must be closed by the caller.
    #[allow(clippy::result_large_err)]
    pub fn return_session(
        &self,
        session: PooledSession<SessionOf<C>>,
    ) -> std::result::Result<(), PooledSession<SessionOf<C>>> {
        if self.manager.current_generation() != Some(session.generation) {
            return Err(session);
        }

        if self.count.fetch_add(1, Ordering::AcqRel) < self.capacity.load(Ordering::Acquire) {
            let mut idle = self.idle_sessions();
            // Dispose may have drained the pool since the capacity check.
            if self.capacity.load(Ordering::Acquire) > 0 {
                idle.push_back(session);
                return Ok(());
            }
        }

        self.count.fetch_sub(1, Ordering::AcqRel);
        self.gate.release_waiters();
        Err(session)
    }

    /// Stop pooling, close every idle session, then close the shared connection.
    pub fn dispose(&self) {
        self.capacity.store(0, Ordering::Release);
        self.drain_idle();
        self.manager.dispose();
        self.gate.release_waiters();
    }

    pub fn idle_count(&self) -> usize {
        self.idle_sessions().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    fn over_capacity(&self) -> bool {
        self.count.load(Ordering::Acquire) > self.capacity.load(Ordering::Acquire)
    }

    fn idle_sessions(&self) -> MutexGuard<'_, VecDeque<PooledSession<SessionOf<C>>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_idle(&self) {
        let drained: Vec<_> = self.idle_sessions().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        self.count.fetch_sub(drained.len(), Ordering::AcqRel);
        debug!(sessions = drained.len(), "discarding idle broker sessions");
        for session in drained {
            session.close();
        }
        self.gate.release_waiters();
    }
}

impl<C: Connector> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use std::collections::HashSet;
    use std::thread;

    fn pool(broker: &InMemoryBroker, capacity: usize) -> ConnectionPool<InMemoryBroker> {
        ConnectionPool::with_capacity(broker.clone(), ConnectSettings::default(), capacity)
    }

    #[test]
    fn rent_creates_then_reuses() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 2);

        let session = pool.rent().unwrap();
        let id = session.session_id().to_string();
        assert!(!session.is_transacted());
        assert!(pool.return_session(session).is_ok());
        assert_eq!(pool.idle_count(), 1);

        let again = pool.rent().unwrap();
        assert_eq!(again.session_id(), id);
        // A rented session is no longer recorded as idle.
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(broker.open_sessions(), 1);
    }

    #[test]
    fn return_beyond_capacity_is_declined() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 2);

        let sessions: Vec<_> = (0..3).map(|_| pool.rent().unwrap()).collect();
        let mut declined = Vec::new();
        for session in sessions {
            if let Err(session) = pool.return_session(session) {
                declined.push(session);
            }
        }

        assert_eq!(declined.len(), 1);
        assert_eq!(pool.idle_count(), 2);
        for session in declined {
            session.close();
        }
        assert_eq!(broker.open_sessions(), 2);
    }

    #[test]
    fn rebuild_discards_idle_sessions() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 4);

        let session = pool.rent().unwrap();
        let stale_id = session.session_id().to_string();
        pool.return_session(session).unwrap();

        broker.interrupt_connections();
        let fresh = pool.rent().unwrap();

        assert_ne!(fresh.session_id(), stale_id);
        assert_eq!(fresh.generation(), 2);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(broker.connections_opened(), 2);
        assert_eq!(broker.open_sessions(), 1);
    }

    #[test]
    fn session_from_replaced_connection_is_declined() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 4);

        let old = pool.rent().unwrap();
        broker.interrupt_connections();
        let _fresh = pool.rent().unwrap();

        let declined = pool.return_session(old).unwrap_err();
        declined.close();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn session_create_failure_is_connectivity_error() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 2);
        broker.fail_session_creation(true);

        let err = pool.rent().err().unwrap();
        assert!(err.is_connectivity());
        assert_eq!(err.code(), "SESSION_REFUSED");
    }

    #[test]
    fn create_session_is_not_pooled() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 2);

        let session = pool.create_session(AcknowledgementMode::Transactional).unwrap();
        assert!(session.is_transacted());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn dispose_closes_everything() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, 2);
        let session = pool.rent().unwrap();
        let kept = pool.rent().unwrap();
        pool.return_session(session).unwrap();

        pool.dispose();

        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(broker.open_connections(), 0);
        assert!(matches!(pool.rent(), Err(TransportError::Disposed(_))));
        assert!(pool.return_session(kept).is_err());
    }

    #[test]
    fn return_racing_dispose_is_declined() {
        let broker = InMemoryBroker::new();
        let pool = Arc::new(pool(&broker, 2));
        let session = pool.rent().unwrap();

        // Stall the returner between its capacity check and the push.
        let idle = pool.idle_sessions();
        let returner = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.return_session(session).map_err(PooledSession::close))
        };
        while pool.count.load(Ordering::Acquire) == 0 {
            thread::yield_now();
        }
        pool.capacity.store(0, Ordering::Release);
        drop(idle);

        assert!(returner.join().unwrap().is_err());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.count.load(Ordering::Acquire), 0);
        assert_eq!(broker.open_sessions(), 0);
    }

    #[test]
    fn concurrent_renters_never_share_a_session() {
        let broker = InMemoryBroker::new();
        let pool = Arc::new(pool(&broker, 3));
        let held = Arc::new(Mutex::new(HashSet::new()));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let held = Arc::clone(&held);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let session = pool.rent().unwrap();
                        let id = session.session_id().to_string();
                        let fresh = held.lock().unwrap().insert(id.clone());
                        assert!(fresh, "session {} rented twice", id);
                        held.lock().unwrap().remove(&id);
                        if let Err(declined) = pool.return_session(session) {
                            declined.close();
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(pool.idle_count() <= pool.capacity());
        assert_eq!(broker.connections_opened(), 1);
    }
}
