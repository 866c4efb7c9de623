//! Forward transport log notifications onto an `EventEmitter`.

use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;

use crate::notify::LogMessage;

/// Event name log notifications are emitted under.
pub const LOG_EVENT: &str = "broker.log";

/// Build a log handler that re-emits every `LogMessage` on `emitter`.
///
/// ```ignore
/// let emitter = Arc::new(Mutex::new(EventEmitter::new()));
/// emitter.lock().unwrap().on(LOG_EVENT, |message: LogMessage| println!("{}", message));
/// client.on_log(forward_logs(Arc::clone(&emitter)));
/// ```
pub fn forward_logs(
    emitter: Arc<Mutex<EventEmitter>>,
) -> impl Fn(&LogMessage) + Send + Sync + 'static {
    move |message| {
        if let Ok(mut emitter) = emitter.lock() {
            emitter.emit(LOG_EVENT, message.clone());
        }
    }
}
