//! Topic publishing over pooled sessions.

mod result;
mod sender;

pub use result::{OperateError, PublishResult};
pub use sender::TopicPublishSender;
