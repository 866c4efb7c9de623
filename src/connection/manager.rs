use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::broker::{ConnectSettings, Connection, Connector};
use crate::error::{Result, TransportError};
use crate::notify::{Handlers, LogMessage, LogType};

/// The connection currently in service, with its rebuild bookkeeping.
pub(crate) struct Live<T> {
    pub(crate) connection: Arc<T>,
    pub(crate) generation: u64,
    pub(crate) interrupted: Arc<AtomicBool>,
}

impl<T: Connection> Live<T> {
    fn is_failed(&self) -> bool {
        self.interrupted.load(Ordering::Acquire) || self.connection.is_transport_failed()
    }
}

impl<T> Clone for Live<T> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            generation: self.generation,
            interrupted: Arc::clone(&self.interrupted),
        }
    }
}

/// Owns the single shared broker connection.
///
/// The connection is never repaired in place: once it is found missing or
/// failed it is replaced wholesale. Replacement happens under `rebuild`
/// after re-checking the condition, so concurrent callers that all observe
/// the failure still produce exactly one new connection.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    settings: ConnectSettings,
    current: RwLock<Option<Live<C::Connection>>>,
    rebuild: Mutex<()>,
    generation: AtomicU64,
    disposed: AtomicBool,
    log: Handlers<LogMessage>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, settings: ConnectSettings) -> Self {
        Self {
            connector,
            settings,
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
            generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            log: Handlers::new(),
        }
    }

    /// Get the shared connection, rebuilding it if it is missing or failed.
    pub fn get_connection(&self) -> Result<Arc<C::Connection>> {
        self.acquire(|| {}).map(|live| live.connection)
    }

    /// Notifications raised when the live connection is interrupted.
    pub fn log_handlers(&self) -> &Handlers<LogMessage> {
        &self.log
    }

    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    /// Number of connections built so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn current_generation(&self) -> Option<u64> {
        self.healthy().ok().flatten().map(|live| live.generation)
    }

    /// Get the live connection, running `before_rebuild` (inside the rebuild
    /// lock) only when a new connection is about to be built.
    pub(crate) fn acquire(&self, before_rebuild: impl FnOnce()) -> Result<Live<C::Connection>> {
        if let Some(live) = self.healthy()? {
            return Ok(live);
        }

        let _guard = self
            .rebuild
            .lock()
            .map_err(|_| TransportError::Poisoned("connection rebuild"))?;

        if let Some(live) = self.healthy()? {
            return Ok(live);
        }
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed("connection manager"));
        }

        before_rebuild();

        let stale = self
            .current
            .write()
            .map_err(|_| TransportError::Poisoned("connection swap"))?
            .take();
        if let Some(stale) = stale {
            stale.connection.close();
        }

        let live = self.connect()?;
        *self
            .current
            .write()
            .map_err(|_| TransportError::Poisoned("connection swap"))? = Some(live.clone());
        Ok(live)
    }

    fn healthy(&self) -> Result<Option<Live<C::Connection>>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed("connection manager"));
        }
        let current = self
            .current
            .read()
            .map_err(|_| TransportError::Poisoned("connection read"))?;
        Ok(current.as_ref().filter(|live| !live.is_failed()).cloned())
    }

    fn connect(&self) -> Result<Live<C::Connection>> {
        let connection = self
            .connector
            .connect(&self.settings)
            .map_err(TransportError::broker_connection)?;
        connection.start().map_err(|err| {
            connection.close();
            TransportError::broker_connection(err)
        })?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let interrupted = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&interrupted);
        let log = self.log.clone();
        let uri = self.settings.uri.clone();
        connection.add_interrupted_listener(Box::new(move || {
            warn!(uri = %uri, generation, "broker client connection interrupted");
            flag.store(true, Ordering::Release);
            log.emit(&LogMessage::new(
                LogType::ServerConnError,
                format!("connection to {} interrupted", uri),
            ));
        }));

        info!(uri = %self.settings.uri, generation, "broker connection established");

        Ok(Live {
            connection: Arc::new(connection),
            generation,
            interrupted,
        })
    }

    /// Close the shared connection. Later calls to `get_connection` fail.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let _guard = self.rebuild.lock();
        let stale = match self.current.write() {
            Ok(mut current) => current.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stale) = stale {
            stale.connection.close();
        }
    }
}
