//! Storage backends for decay scores and audit streams.
//!
//! Both backends implement [`KeyValueStore`](decay_core::KeyValueStore) and
//! [`AppendLog`](decay_core::AppendLog), so either can back the scorer and the
//! event bus.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
