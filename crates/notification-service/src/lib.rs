mod templates;

pub use templates::EventTemplate;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use decay_core::{DecayError, DecayEvent, DecayEventKind, PushNotifier};

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, event: &DecayEvent) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Discord webhook error: {0}")]
    Discord(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub discord_webhook_url: Option<String>,
    /// Event kinds to push; empty means every kind
    pub event_kinds: HashSet<DecayEventKind>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            event_kinds: HashSet::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, NotificationError> {
        let event_kinds = parse_event_kinds(&std::env::var("NOTIFY_EVENT_KINDS").unwrap_or_default())?;

        Ok(Self {
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            event_kinds,
            timeout_secs: match std::env::var("NOTIFY_TIMEOUT_SECS") {
                Ok(raw) if !raw.trim().is_empty() => parse_timeout_secs(&raw)?,
                _ => DEFAULT_TIMEOUT_SECS,
            },
        })
    }

    pub fn wants(&self, kind: DecayEventKind) -> bool {
        self.event_kinds.is_empty() || self.event_kinds.contains(&kind)
    }
}

/// Parse a webhook timeout in whole seconds. Zero is rejected since it would
/// fail every delivery.
pub fn parse_timeout_secs(raw: &str) -> Result<u64, NotificationError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(NotificationError::Config(format!(
            "NOTIFY_TIMEOUT_SECS must be a positive number of seconds, got '{}'",
            raw
        ))),
    }
}

/// Parse `DECAY_ALERT,STRATEGY_ROTATED` into event kinds.
pub fn parse_event_kinds(raw: &str) -> Result<HashSet<DecayEventKind>, NotificationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            DecayEventKind::ALL
                .into_iter()
                .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
                .ok_or_else(|| NotificationError::Config(format!("unknown event kind '{}'", name)))
        })
        .collect()
}

/// The main notification service. Dispatches decay events to all configured channels.
pub struct NotificationService {
    channels: Arc<Vec<Box<dyn NotificationChannel>>>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        // Add Discord webhook channel if configured
        if let Some(ref webhook_url) = config.discord_webhook_url {
            match DiscordWebhookNotifier::new(webhook_url, config.timeout_secs) {
                Ok(notifier) => {
                    channels.push(Box::new(notifier));
                    tracing::info!("Discord webhook notifications enabled");
                }
                Err(e) => tracing::warn!("Failed to initialize Discord notifier: {}", e),
            }
        }

        if channels.is_empty() {
            tracing::info!("No notification channels configured (set DISCORD_WEBHOOK_URL)");
        }

        Self::with_channels(config, channels)
    }

    pub fn with_channels(config: &NotificationConfig, channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            channels: Arc::new(channels),
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Send an event to all channels, awaiting completion. Returns the
    /// names of channels that failed.
    pub async fn send_event_async(&self, event: &DecayEvent) -> Vec<String> {
        let mut failed = Vec::new();
        if !self.config.wants(event.kind()) {
            return failed;
        }
        for channel in self.channels.iter() {
            match channel.send(event).await {
                Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                Err(e) => {
                    tracing::warn!("Failed to send notification via {}: {}", channel.name(), e);
                    failed.push(channel.name().to_string());
                }
            }
        }
        failed
    }
}

#[async_trait]
impl PushNotifier for NotificationService {
    async fn push(&self, event: &DecayEvent) -> Result<(), DecayError> {
        let failed = self.send_event_async(event).await;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DecayError::Notification(format!(
                "delivery failed via {}",
                failed.join(", ")
            )))
        }
    }

    fn name(&self) -> &str {
        "notification-service"
    }
}

/// Discord webhook notifier.
struct DiscordWebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordWebhookNotifier {
    fn new(webhook_url: &str, timeout_secs: u64) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NotificationError::Config(e.to_string()))?;
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for DiscordWebhookNotifier {
    async fn send(&self, event: &DecayEvent) -> Result<(), NotificationError> {
        let payload = serde_json::json!({
            "embeds": [EventTemplate::render_embed(event)]
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Discord(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotificationError::Discord(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decay_core::{AlertSeverity, DecayEventPayload, RotationAction};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct RecordingChannel {
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, event: &DecayEvent) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(event.strategy_id.clone());
            if self.fail {
                return Err(NotificationError::Discord("429 Too Many Requests".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            if self.fail {
                "flaky"
            } else {
                "recording"
            }
        }
    }

    fn alert() -> DecayEvent {
        DecayEvent::new(
            "breakout_v4",
            0.91,
            BTreeSet::new(),
            DecayEventPayload::DecayAlert {
                severity: AlertSeverity::Warning,
                action: RotationAction::ReplaceWithSibling,
                message: "cooldown active".to_string(),
            },
        )
    }

    #[test]
    fn test_parse_event_kinds() {
        let kinds = parse_event_kinds("decay_alert, STRATEGY_ROTATED").unwrap();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&DecayEventKind::DecayAlert));
        assert!(parse_event_kinds("").unwrap().is_empty());
        assert!(parse_event_kinds("NOT_A_KIND").is_err());
    }

    #[test]
    fn test_parse_timeout_secs() {
        assert_eq!(parse_timeout_secs("30").unwrap(), 30);
        assert_eq!(parse_timeout_secs(" 5 ").unwrap(), 5);
        for bad in ["abc", "0", "-3", "2.5"] {
            let err = parse_timeout_secs(bad).unwrap_err();
            assert!(matches!(err, NotificationError::Config(_)));
            assert!(err.to_string().contains(bad));
        }
    }

    #[tokio::test]
    async fn test_push_reports_failed_channels() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let service = NotificationService::with_channels(
            &NotificationConfig::default(),
            vec![
                Box::new(RecordingChannel {
                    sent: sent.clone(),
                    fail: false,
                }),
                Box::new(RecordingChannel {
                    sent: sent.clone(),
                    fail: true,
                }),
            ],
        );

        let err = service.push(&alert()).await.unwrap_err();
        assert!(err.to_string().contains("flaky"));
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unwanted_kinds_are_skipped() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let config = NotificationConfig {
            event_kinds: HashSet::from([DecayEventKind::StrategyDisabled]),
            ..NotificationConfig::default()
        };
        let service = NotificationService::with_channels(
            &config,
            vec![Box::new(RecordingChannel {
                sent: sent.clone(),
                fail: true,
            })],
        );

        assert!(service.push(&alert()).await.is_ok());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_service_without_webhook_has_no_channels() {
        let service = NotificationService::new(&NotificationConfig::default());
        assert!(!service.is_enabled());
    }
}
