//! Shared connection management and the publisher session pool.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ConnectionPool                                │
//! │  rent() / return_session() / dispose()        │
//! │  idle queue + pooled count + admission gate   │
//! └──────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │ ConnectionManager                             │
//! │  one live connection, rebuilt under a lock    │
//! │  when missing or transport-failed             │
//! └──────────────────────────────────────────────┘
//! ```

mod admission;
mod manager;
mod pool;

pub use manager::ConnectionManager;
pub use pool::{ConnectionPool, PooledSession};
