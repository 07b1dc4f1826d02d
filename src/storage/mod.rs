//! Storage layer: keyspace, streams and snapshot loading

pub mod rdb;
pub mod store;
pub mod stream;

pub use store::{Expiry, Store, Value, ValueKind};
pub use stream::{Stream, StreamEntry, StreamId};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX timestamp in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}
