use decay_core::{format_flags, AlertSeverity, DecayEvent, DecayEventPayload};

const GREEN: u32 = 0x22c55e;
const BLUE: u32 = 0x3b82f6;
const ORANGE: u32 = 0xf97316;
const RED: u32 = 0xef4444;
const GREY: u32 = 0x64748b;

pub struct EventTemplate;

impl EventTemplate {
    pub fn title(event: &DecayEvent) -> String {
        let headline = match &event.payload {
            DecayEventPayload::DecayScoreIncreased { .. } => "Decay score increased",
            DecayEventPayload::DecayThresholdCrossed { .. } => "Decay band changed",
            DecayEventPayload::StrategyDisabled { .. } => "Strategy disabled",
            DecayEventPayload::StrategyRotated { .. } => "Strategy rotated",
            DecayEventPayload::AlphaWeightsAdjusted { .. } => "Alpha weights adjusted",
            DecayEventPayload::RetrainingTriggered { .. } => "Retraining triggered",
            DecayEventPayload::FeatureBalanceAdjusted { .. } => "Feature balance adjusted",
            DecayEventPayload::DecayAlert { severity, .. } => match severity {
                AlertSeverity::Critical => "CRITICAL decay alert",
                AlertSeverity::Warning => "Decay warning",
                AlertSeverity::Info => "Decay notice",
            },
        };
        format!("{} | {}", headline, event.strategy_id)
    }

    pub fn description(event: &DecayEvent) -> String {
        match &event.payload {
            DecayEventPayload::DecayScoreIncreased { previous_score } => format!(
                "Score rose from {:.2} to {:.2}",
                previous_score, event.decay_score
            ),
            DecayEventPayload::DecayThresholdCrossed {
                previous_band,
                band,
            } => format!("Moved from {} to {}", previous_band, band),
            DecayEventPayload::StrategyDisabled { reason } => reason.clone(),
            DecayEventPayload::StrategyRotated {
                action,
                replacement_id,
                rotation_count,
            } => format!(
                "{} to {} (rotation #{})",
                action, replacement_id, rotation_count
            ),
            DecayEventPayload::AlphaWeightsAdjusted { weights } => weights
                .iter()
                .map(|(feature, weight)| format!("{}: {:.3}", feature, weight))
                .collect::<Vec<_>>()
                .join("\n"),
            DecayEventPayload::RetrainingTriggered { reason } => reason.clone(),
            DecayEventPayload::FeatureBalanceAdjusted {
                decaying_features,
                improving_features,
            } => format!(
                "Decaying: {}\nImproving: {}",
                list_or_none(decaying_features),
                list_or_none(improving_features)
            ),
            DecayEventPayload::DecayAlert {
                action, message, ..
            } => format!("{} ({})", message, action),
        }
    }

    pub fn color(event: &DecayEvent) -> u32 {
        match &event.payload {
            DecayEventPayload::DecayScoreIncreased { .. } => ORANGE,
            DecayEventPayload::DecayThresholdCrossed {
                previous_band,
                band,
            } => {
                if band > previous_band {
                    ORANGE
                } else {
                    GREEN
                }
            }
            DecayEventPayload::StrategyDisabled { .. } => RED,
            DecayEventPayload::StrategyRotated { .. }
            | DecayEventPayload::AlphaWeightsAdjusted { .. }
            | DecayEventPayload::RetrainingTriggered { .. }
            | DecayEventPayload::FeatureBalanceAdjusted { .. } => BLUE,
            DecayEventPayload::DecayAlert { severity, .. } => match severity {
                AlertSeverity::Critical => RED,
                AlertSeverity::Warning => ORANGE,
                AlertSeverity::Info => GREY,
            },
        }
    }

    /// Discord embed for `event`.
    pub fn render_embed(event: &DecayEvent) -> serde_json::Value {
        serde_json::json!({
            "title": Self::title(event),
            "description": Self::description(event),
            "color": Self::color(event),
            "timestamp": event.timestamp.to_rfc3339(),
            "fields": [
                { "name": "Decay score", "value": format!("{:.2}", event.decay_score), "inline": true },
                { "name": "Flags", "value": format_flags(&event.decay_flags), "inline": true },
            ],
            "footer": { "text": event.kind().as_str() },
        })
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decay_core::{DecayBand, DecayFlag, RotationAction};
    use std::collections::BTreeSet;

    fn event(payload: DecayEventPayload) -> DecayEvent {
        DecayEvent::new(
            "momentum_v1",
            0.83,
            BTreeSet::from([DecayFlag::LowSharpe, DecayFlag::WinRateDrop]),
            payload,
        )
    }

    #[test]
    fn test_alert_severity_drives_title_and_color() {
        let critical = event(DecayEventPayload::DecayAlert {
            severity: AlertSeverity::Critical,
            action: RotationAction::ReplaceWithSibling,
            message: "dispatch failed".to_string(),
        });
        assert_eq!(EventTemplate::title(&critical), "CRITICAL decay alert | momentum_v1");
        assert_eq!(EventTemplate::color(&critical), RED);
        assert!(EventTemplate::description(&critical).contains("REPLACE_WITH_SIBLING"));
    }

    #[test]
    fn test_band_direction_colors() {
        let worse = event(DecayEventPayload::DecayThresholdCrossed {
            previous_band: DecayBand::Low,
            band: DecayBand::High,
        });
        let better = event(DecayEventPayload::DecayThresholdCrossed {
            previous_band: DecayBand::Moderate,
            band: DecayBand::Healthy,
        });
        assert_eq!(EventTemplate::color(&worse), ORANGE);
        assert_eq!(EventTemplate::color(&better), GREEN);
        assert_eq!(EventTemplate::description(&better), "Moved from MODERATE to HEALTHY");
    }

    #[test]
    fn test_embed_fields() {
        let embed = EventTemplate::render_embed(&event(DecayEventPayload::StrategyRotated {
            action: RotationAction::ReplaceWithSibling,
            replacement_id: "momentum_v2".to_string(),
            rotation_count: 2,
        }));
        assert_eq!(embed["fields"][0]["value"], "0.83");
        assert_eq!(embed["fields"][1]["value"], "WIN_RATE_DROP, LOW_SHARPE");
        assert_eq!(embed["footer"]["text"], "STRATEGY_ROTATED");
        assert_eq!(
            embed["description"],
            "REPLACE_WITH_SIBLING to momentum_v2 (rotation #2)"
        );
    }
}
