use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;

use crate::{AttributionAnalysis, DecayError, DecayEvent, StrategyMetrics, StreamEntry};

/// Hash-style record storage with expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Replace the fields of the record at `key`.
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), DecayError>;

    /// Read every field of a record. `None` when the key is absent or expired.
    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>, DecayError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DecayError>;
}

/// Ordered, append-only log keyed by stream name.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append an entry and return its backend-assigned id.
    async fn append(&self, stream: &str, entry: &StreamEntry) -> Result<String, DecayError>;

    /// Drop the oldest entries until at most `max_len` remain.
    async fn trim(&self, stream: &str, max_len: usize) -> Result<(), DecayError>;

    /// Newest `count` entries, newest first.
    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, DecayError>;
}

/// Source of periodic strategy health snapshots.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_metrics(&self, strategy_id: &str) -> Result<Option<StrategyMetrics>, DecayError>;

    async fn list_strategies(&self) -> Result<Vec<String>, DecayError>;
}

/// External feature-attribution analyzer.
#[async_trait]
pub trait AttributionProvider: Send + Sync {
    async fn analyze(&self, strategy_id: &str) -> Result<AttributionAnalysis, DecayError>;
}

/// Executors for remediation commands. Commands are fire-and-forget; an
/// error only means the command could not be handed off.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn replace_strategy(&self, strategy_id: &str, replacement_id: &str)
        -> Result<(), DecayError>;

    async fn retrain(&self, strategy_id: &str) -> Result<(), DecayError>;

    async fn inject_fallback(&self, strategy_id: &str, fallback_id: &str)
        -> Result<(), DecayError>;

    async fn adjust_weights(
        &self,
        strategy_id: &str,
        weights: &BTreeMap<String, f64>,
    ) -> Result<(), DecayError>;

    async fn disable(&self, strategy_id: &str, reason: &str) -> Result<(), DecayError>;
}

/// Optional out-of-process push channel for emitted events.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn push(&self, event: &DecayEvent) -> Result<(), DecayError>;

    fn name(&self) -> &str;
}
