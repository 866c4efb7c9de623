//! Background thread running one subscriber group's Listening loop.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::consumer::MessageContext;
use crate::error::{Result, TransportError};
use crate::host::{ConsumerClient, ConsumerClientFactory};

/// Statistics from a consumer thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub committed: usize,
    pub rejected: usize,
}

/// How a consumer thread ended.
#[derive(Debug, Default, Clone)]
pub struct ConsumerExit {
    pub stats: ConsumerStats,
    /// Set when the loop ended on a fatal error or a panic rather than cancellation.
    pub error: Option<TransportError>,
}

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    committed: AtomicUsize,
    rejected: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Acquire),
            committed: self.committed.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}

/// A background thread that listens for one subscriber group and settles
/// each delivery: handler success commits, handler failure rejects.
///
/// ## Example
///
/// ```ignore
/// let thread = ConsumerThread::spawn(
///     &factory,
///     "billing",
///     ["orders.#"],
///     Duration::from_millis(50),
///     |context| {
///         println!("{} -> {}", context.name, context.content);
///         Ok(())
///     },
/// )?;
///
/// // ... publish ...
///
/// let exit = thread.stop();
/// println!("received {} messages", exit.stats.received);
/// ```
pub struct ConsumerThread {
    group_id: String,
    cancellation: CancellationToken,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<Option<TransportError>>>,
}

impl ConsumerThread {
    /// Create and subscribe the group's client on the calling thread, then
    /// run its Listening loop on a new one.
    ///
    /// Creation and subscription errors are returned here; errors that end
    /// the loop later are reported by `stop`.
    pub fn spawn<F, I, S, H>(
        factory: &F,
        group_id: &str,
        topics: I,
        timeout: Duration,
        handler: H,
    ) -> Result<Self>
    where
        F: ConsumerClientFactory,
        F::Client: 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        H: Fn(&MessageContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let client = Arc::new(factory.create(group_id)?);
        client.subscribe(topics)?;

        let counters = Arc::new(Counters::default());
        let weak: Weak<F::Client> = Arc::downgrade(&client);
        let dispatch_counters = Arc::clone(&counters);
        client.on_message_received(move |context| {
            let Some(client) = weak.upgrade() else {
                return;
            };
            dispatch_counters.received.fetch_add(1, Ordering::AcqRel);
            let settled = match handler(context) {
                Ok(()) => client.commit().map(|()| &dispatch_counters.committed),
                Err(reason) => {
                    warn!(
                        group = %context.group,
                        topic = %context.name,
                        reason = %reason,
                        "message handler failed, rejecting"
                    );
                    client.reject().map(|()| &dispatch_counters.rejected)
                }
            };
            match settled {
                Ok(counter) => {
                    counter.fetch_add(1, Ordering::AcqRel);
                }
                Err(err) => warn!(group = %context.group, error = %err, "settling delivery failed"),
            }
        });

        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let group = group_id.to_string();
        let handle = thread::spawn(move || {
            info!(group = %group, "consumer thread started");
            let outcome = client.listening(timeout, &token);
            client.dispose();
            if let Err(err) = &outcome {
                warn!(group = %group, error = %err, "consumer thread stopped on error");
            }
            outcome.err()
        });

        Ok(Self {
            group_id: group_id.to_string(),
            cancellation,
            counters,
            handle: Some(handle),
        })
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop to stop and wait for it to finish.
    pub fn stop(mut self) -> ConsumerExit {
        self.cancellation.cancel();
        match self.handle.take() {
            Some(handle) => ConsumerExit {
                error: handle.join().unwrap_or_else(|payload| {
                    let message = panic_message(&*payload);
                    error!(group = %self.group_id, panic = %message, "consumer thread panicked");
                    Some(TransportError::ListenerPanicked {
                        group: self.group_id.clone(),
                        message,
                    })
                }),
                stats: self.counters.snapshot(),
            },
            None => ConsumerExit {
                stats: self.counters.snapshot(),
                error: None,
            },
        }
    }

    /// Signal the loop to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancellation.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
