//! Handler registration lists for delivery and log notifications.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Multi-subscriber notification point.
///
/// `emit` invokes every handler synchronously, in registration order, on the
/// calling thread. Clones share the same handler list.
pub struct Handlers<T> {
    handlers: Arc<RwLock<Vec<(HandlerId, Handler<T>)>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Handlers<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        handlers.len() != before
    }

    pub fn emit(&self, value: &T) {
        // Snapshot so handlers may register or unregister while running.
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Handlers<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Category of an operational log notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    ConsumerRegistered,
    ConsumeError,
    ServerConnError,
    ConsumerShutdown,
}

/// Operational diagnostics raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub log_type: LogType,
    pub reason: String,
}

impl LogMessage {
    pub fn new(log_type: LogType, reason: impl Into<String>) -> Self {
        Self {
            log_type,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.log_type, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emits_in_registration_order() {
        let handlers: Handlers<u32> = Handlers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        handlers.register(move |v| first.lock().unwrap().push(("first", *v)));
        let second = Arc::clone(&seen);
        handlers.register(move |v| second.lock().unwrap().push(("second", *v)));

        handlers.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unregister_removes_handler() {
        let handlers: Handlers<u32> = Handlers::new();
        let id = handlers.register(|_| {});
        assert_eq!(handlers.len(), 1);
        assert!(handlers.unregister(id));
        assert!(!handlers.unregister(id));
        assert!(handlers.is_empty());
    }

    #[test]
    fn clones_share_handlers() {
        let handlers: Handlers<LogMessage> = Handlers::new();
        let clone = handlers.clone();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        clone.register(move |_| *counter.lock().unwrap() += 1);

        handlers.emit(&LogMessage::new(LogType::ServerConnError, "down"));

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
