//! Decay Event Bus
//!
//! Fans decay events out to in-process subscribers and appends them to a
//! bounded per-strategy audit stream.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use decay_core::{
    AppendLog, DecayError, DecayEvent, DecayEventKind, DecayEventPayload, DecayFlag, PushNotifier,
    StreamEntry,
};
use tokio::sync::broadcast;

use crate::config::EventBusConfig;

pub fn event_stream_key(strategy_id: &str) -> String {
    format!("strategy:decay:events:{}", strategy_id)
}

pub struct EventBus {
    log: Arc<dyn AppendLog>,
    notifier: Option<Arc<dyn PushNotifier>>,
    channels: HashMap<DecayEventKind, broadcast::Sender<DecayEvent>>,
    firehose: broadcast::Sender<DecayEvent>,
    /// Last score seen per strategy, for the score-increase hysteresis
    last_scores: DashMap<String, f64>,
    score_increase_factor: f64,
    max_stream_events: usize,
}

impl EventBus {
    pub fn new(config: &EventBusConfig, log: Arc<dyn AppendLog>) -> Self {
        let capacity = config.channel_capacity.max(1);
        let channels = DecayEventKind::ALL
            .into_iter()
            .map(|kind| (kind, broadcast::channel(capacity).0))
            .collect();

        Self {
            log,
            notifier: None,
            channels,
            firehose: broadcast::channel(capacity).0,
            last_scores: DashMap::new(),
            score_increase_factor: config.score_increase_factor,
            max_stream_events: config.max_stream_events,
        }
    }

    /// Forward every emitted event to an external push channel as well.
    pub fn with_notifier(mut self, notifier: Arc<dyn PushNotifier>) -> Self {
        tracing::info!("Decay events will be pushed via {}", notifier.name());
        self.notifier = Some(notifier);
        self
    }

    /// Receive events of a single kind.
    pub fn subscribe(&self, kind: DecayEventKind) -> broadcast::Receiver<DecayEvent> {
        match self.channels.get(&kind) {
            Some(sender) => sender.subscribe(),
            // Every kind gets a channel in `new`
            None => self.firehose.subscribe(),
        }
    }

    /// Receive every event regardless of kind.
    pub fn subscribe_all(&self) -> broadcast::Receiver<DecayEvent> {
        self.firehose.subscribe()
    }

    /// Dispatch locally, push, then append to the strategy's audit stream.
    ///
    /// Returns the stream id of the appended entry. Persistence errors are
    /// logged and returned; local delivery has already happened by then.
    pub async fn emit(&self, event: DecayEvent) -> Result<String, DecayError> {
        self.dispatch_local(&event);
        self.forward(&event);

        let stream = event_stream_key(&event.strategy_id);
        let entry = StreamEntry {
            id: String::new(),
            event_type: event.kind().as_str().to_string(),
            data: serde_json::to_string(&event)?,
            timestamp: Utc::now().timestamp_millis().to_string(),
        };

        let id = match self.log.append(&stream, &entry).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    "Failed to append {} for {}: {}",
                    entry.event_type,
                    event.strategy_id,
                    e
                );
                return Err(e);
            }
        };

        if let Err(e) = self.log.trim(&stream, self.max_stream_events).await {
            tracing::error!("Failed to trim decay stream {}: {}", stream, e);
            return Err(e);
        }

        tracing::debug!("Emitted {} for {} ({})", entry.event_type, event.strategy_id, id);
        Ok(id)
    }

    fn dispatch_local(&self, event: &DecayEvent) {
        if let Some(sender) = self.channels.get(&event.kind()) {
            // No receivers is fine: nobody subscribed to this kind
            let _ = sender.send(event.clone());
        }
        let _ = self.firehose.send(event.clone());
    }

    fn forward(&self, event: &DecayEvent) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.push(&event).await {
                tracing::warn!(
                    "Failed to push {} for {} via {}: {}",
                    event.kind(),
                    event.strategy_id,
                    notifier.name(),
                    e
                );
            }
        });
    }

    /// Emit `DECAY_SCORE_INCREASED` when the score rose by more than the
    /// configured factor since the last call for this strategy.
    ///
    /// The baseline is updated on every call, emitted or not.
    pub async fn check_and_emit_score_increased(
        &self,
        strategy_id: &str,
        current_score: f64,
        flags: &BTreeSet<DecayFlag>,
    ) -> Result<bool, DecayError> {
        let previous = {
            let mut last = self
                .last_scores
                .entry(strategy_id.to_string())
                .or_insert(0.0);
            let previous = *last;
            *last = current_score;
            previous
        };

        if current_score <= previous * self.score_increase_factor {
            return Ok(false);
        }

        tracing::info!(
            "Decay score for {} rose from {:.2} to {:.2}",
            strategy_id,
            previous,
            current_score
        );
        let event = DecayEvent::new(
            strategy_id,
            current_score,
            flags.clone(),
            DecayEventPayload::DecayScoreIncreased {
                previous_score: previous,
            },
        );
        self.emit(event).await?;
        Ok(true)
    }

    pub fn last_score(&self, strategy_id: &str) -> Option<f64> {
        self.last_scores.get(strategy_id).map(|score| *score)
    }

    /// Drop the hysteresis baseline so the next score re-baselines from zero.
    pub fn forget(&self, strategy_id: &str) {
        self.last_scores.remove(strategy_id);
    }

    /// Newest raw stream entries for a strategy, newest first.
    pub async fn recent_entries(
        &self,
        strategy_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, DecayError> {
        self.log.range(&event_stream_key(strategy_id), count).await
    }

    /// Newest decoded events for a strategy, newest first.
    pub async fn recent_events(
        &self,
        strategy_id: &str,
        count: usize,
    ) -> Result<Vec<DecayEvent>, DecayError> {
        self.recent_entries(strategy_id, count)
            .await?
            .iter()
            .map(|entry| serde_json::from_str(&entry.data).map_err(DecayError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use decay_core::{AlertSeverity, RotationAction};
    use decay_store::InMemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bus_with_store(max_stream_events: usize) -> (EventBus, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let config = EventBusConfig {
            max_stream_events,
            ..EventBusConfig::default()
        };
        (EventBus::new(&config, store.clone()), store)
    }

    fn alert(strategy_id: &str, message: &str) -> DecayEvent {
        DecayEvent::new(
            strategy_id,
            0.5,
            BTreeSet::new(),
            DecayEventPayload::DecayAlert {
                severity: AlertSeverity::Info,
                action: RotationAction::None,
                message: message.to_string(),
            },
        )
    }

    struct FailingLog;

    #[async_trait]
    impl AppendLog for FailingLog {
        async fn append(&self, _: &str, _: &StreamEntry) -> Result<String, DecayError> {
            Err(DecayError::Storage("connection refused".to_string()))
        }

        async fn trim(&self, _: &str, _: usize) -> Result<(), DecayError> {
            Ok(())
        }

        async fn range(&self, _: &str, _: usize) -> Result<Vec<StreamEntry>, DecayError> {
            Ok(Vec::new())
        }
    }

    struct ChannelNotifier {
        tx: mpsc::UnboundedSender<DecayEvent>,
    }

    #[async_trait]
    impl PushNotifier for ChannelNotifier {
        async fn push(&self, event: &DecayEvent) -> Result<(), DecayError> {
            let _ = self.tx.send(event.clone());
            Err(DecayError::Notification("webhook returned 500".to_string()))
        }

        fn name(&self) -> &str {
            "test-channel"
        }
    }

    #[tokio::test]
    async fn test_emit_appends_typed_entry() {
        let (bus, _store) = bus_with_store(1000);
        bus.emit(alert("mr_v1", "hello")).await.unwrap();

        let entries = bus.recent_entries("mr_v1", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "DECAY_ALERT");
        assert!(entries[0].timestamp.parse::<i64>().is_ok());

        let events = bus.recent_events("mr_v1", 10).await.unwrap();
        assert_eq!(events[0].kind(), DecayEventKind::DecayAlert);
    }

    #[tokio::test]
    async fn test_stream_trimmed_to_max_length() {
        let (bus, store) = bus_with_store(3);
        for i in 0..7 {
            bus.emit(alert("mr_v1", &format!("event {}", i))).await.unwrap();
        }
        assert_eq!(store.stream_len(&event_stream_key("mr_v1")), 3);

        let newest = bus.recent_events("mr_v1", 10).await.unwrap();
        match &newest[0].payload {
            DecayEventPayload::DecayAlert { message, .. } => assert_eq!(message, "event 6"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_by_kind() {
        let (bus, _store) = bus_with_store(1000);
        let mut alerts = bus.subscribe(DecayEventKind::DecayAlert);
        let mut rotations = bus.subscribe(DecayEventKind::StrategyRotated);
        let mut all = bus.subscribe_all();

        bus.emit(alert("mr_v1", "watch")).await.unwrap();

        assert_eq!(alerts.try_recv().unwrap().strategy_id, "mr_v1");
        assert!(rotations.try_recv().is_err());
        assert_eq!(all.try_recv().unwrap().kind(), DecayEventKind::DecayAlert);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_dispatches_locally() {
        let bus = EventBus::new(&EventBusConfig::default(), Arc::new(FailingLog));
        let mut all = bus.subscribe_all();

        let result = bus.emit(alert("mr_v1", "lost")).await;
        assert!(matches!(result, Err(DecayError::Storage(_))));
        assert!(all.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_push_failure_does_not_block_emit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(&EventBusConfig::default(), store)
            .with_notifier(Arc::new(ChannelNotifier { tx }));

        bus.emit(alert("mr_v1", "pushed")).await.unwrap();

        let pushed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.strategy_id, "mr_v1");
        assert_eq!(bus.recent_entries("mr_v1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_score_increase_hysteresis() {
        let (bus, _store) = bus_with_store(1000);
        let flags = BTreeSet::from([DecayFlag::LowSharpe]);

        // First sighting: baseline 0, any positive score is an increase
        assert!(bus.check_and_emit_score_increased("a", 0.3, &flags).await.unwrap());
        // Unchanged score
        assert!(!bus.check_and_emit_score_increased("a", 0.3, &flags).await.unwrap());
        // +10% stays under the 1.2 factor
        assert!(!bus.check_and_emit_score_increased("a", 0.33, &flags).await.unwrap());
        // 0.33 * 1.2 = 0.396
        assert!(bus.check_and_emit_score_increased("a", 0.40, &flags).await.unwrap());
        // Decrease re-baselines downward
        assert!(!bus.check_and_emit_score_increased("a", 0.1, &flags).await.unwrap());
        assert_eq!(bus.last_score("a"), Some(0.1));
        assert!(bus.check_and_emit_score_increased("a", 0.2, &flags).await.unwrap());

        let events = bus.recent_events("a", 10).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| e.kind() == DecayEventKind::DecayScoreIncreased));
    }

    #[tokio::test]
    async fn test_zero_score_on_first_call_is_not_an_increase() {
        let (bus, _store) = bus_with_store(1000);
        assert!(!bus
            .check_and_emit_score_increased("a", 0.0, &BTreeSet::new())
            .await
            .unwrap());
        bus.forget("a");
        assert_eq!(bus.last_score("a"), None);
    }
}
