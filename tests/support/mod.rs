//! Shared fixtures: one in-memory broker wired to a pool, factory and sender.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sourced_broker::memory::InMemoryBroker;
use sourced_broker::{BrokerOptions, ConnectionPool, TopicConsumerClientFactory, TopicPublishSender};

pub struct Stack {
    pub broker: InMemoryBroker,
    pub pool: Arc<ConnectionPool<InMemoryBroker>>,
    pub factory: TopicConsumerClientFactory<InMemoryBroker>,
    pub sender: TopicPublishSender<InMemoryBroker>,
}

pub fn stack(pool_size: usize) -> Stack {
    let broker = InMemoryBroker::new();
    let options = BrokerOptions::new("localhost").with_pool_size(pool_size);
    let pool = Arc::new(ConnectionPool::new(broker.clone(), &options));
    Stack {
        factory: TopicConsumerClientFactory::new(Arc::clone(&pool), &options),
        sender: TopicPublishSender::new(Arc::clone(&pool), &options),
        broker,
        pool,
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
