//! Redis backend: hashes with TTL for score records, streams for audit logs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use decay_core::{AppendLog, DecayError, KeyValueStore, StreamEntry};
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamRangeReply};
use redis::AsyncCommands;

fn storage_err(e: redis::RedisError) -> DecayError {
    DecayError::Storage(e.to_string())
}

/// Redis-backed store. Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis://host:port/db`.
    pub async fn connect(url: &str) -> Result<Self, DecayError> {
        let client = redis::Client::open(url).map_err(storage_err)?;
        let conn = ConnectionManager::new(client).await.map_err(storage_err)?;
        tracing::info!("Connected to Redis decay store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), DecayError> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(storage_err)
    }

    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>, DecayError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(storage_err)?;
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DecayError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64)
            .await
            .map_err(storage_err)
    }
}

#[async_trait]
impl AppendLog for RedisStore {
    async fn append(&self, stream: &str, entry: &StreamEntry) -> Result<String, DecayError> {
        let mut conn = self.conn.clone();
        let items = [
            ("type", entry.event_type.as_str()),
            ("data", entry.data.as_str()),
            ("timestamp", entry.timestamp.as_str()),
        ];
        conn.xadd(stream, "*", &items).await.map_err(storage_err)
    }

    async fn trim(&self, stream: &str, max_len: usize) -> Result<(), DecayError> {
        let mut conn = self.conn.clone();
        conn.xtrim::<_, i64>(stream, StreamMaxlen::Equals(max_len))
            .await
            .map(|_| ())
            .map_err(storage_err)
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, DecayError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrevrange_count(stream, "+", "-", count)
            .await
            .map_err(storage_err)?;

        reply
            .ids
            .into_iter()
            .map(|item| {
                let field = |name: &str| {
                    item.get::<String>(name).ok_or_else(|| {
                        DecayError::malformed(
                            format!("{}/{}", stream, item.id),
                            format!("missing stream field '{}'", name),
                        )
                    })
                };
                Ok(StreamEntry {
                    event_type: field("type")?,
                    data: field("data")?,
                    timestamp: field("timestamp")?,
                    id: item.id.clone(),
                })
            })
            .collect()
    }
}
