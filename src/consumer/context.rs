use serde::{Deserialize, Serialize};

/// One delivered message as handed to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    /// Subscriber group that received the message.
    pub group: String,
    /// Topic the message was published to.
    pub name: String,
    pub content: String,
}
