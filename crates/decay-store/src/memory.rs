//! In-process storage backend.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use decay_core::{AppendLog, DecayError, KeyValueStore, StreamEntry};

struct Record {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct StreamLog {
    next_seq: u64,
    entries: VecDeque<StreamEntry>,
}

/// Hash records with lazy expiry plus bounded in-memory streams.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<String, Record>,
    streams: DashMap<String, StreamLog>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held for a stream.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams
            .get(stream)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), DecayError> {
        let mut record = self.records.entry(key.to_string()).or_insert_with(|| Record {
            fields: HashMap::new(),
            expires_at: None,
        });
        if record.is_expired() {
            record.fields.clear();
            record.expires_at = None;
        }
        for (field, value) in fields {
            record.fields.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>, DecayError> {
        match self.records.get(key) {
            None => return Ok(None),
            Some(record) if !record.is_expired() => return Ok(Some(record.fields.clone())),
            Some(_) => {}
        }
        self.records.remove_if(key, |_, record| record.is_expired());
        Ok(None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DecayError> {
        if let Some(mut record) = self.records.get_mut(key) {
            record.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[async_trait]
impl AppendLog for InMemoryStore {
    async fn append(&self, stream: &str, entry: &StreamEntry) -> Result<String, DecayError> {
        let mut log = self.streams.entry(stream.to_string()).or_default();
        log.next_seq += 1;
        let id = format!("{}-0", log.next_seq);
        let mut stored = entry.clone();
        stored.id = id.clone();
        log.entries.push_back(stored);
        Ok(id)
    }

    async fn trim(&self, stream: &str, max_len: usize) -> Result<(), DecayError> {
        if let Some(mut log) = self.streams.get_mut(stream) {
            while log.entries.len() > max_len {
                log.entries.pop_front();
            }
        }
        Ok(())
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, DecayError> {
        Ok(self
            .streams
            .get(stream)
            .map(|log| log.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }
}
