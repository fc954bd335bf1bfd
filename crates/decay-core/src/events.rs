//! Audit events emitted by the decay lifecycle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DecayBand, DecayFlag, RotationAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecayEventKind {
    DecayScoreIncreased,
    DecayThresholdCrossed,
    StrategyDisabled,
    StrategyRotated,
    AlphaWeightsAdjusted,
    RetrainingTriggered,
    FeatureBalanceAdjusted,
    DecayAlert,
}

impl DecayEventKind {
    pub const ALL: [DecayEventKind; 8] = [
        DecayEventKind::DecayScoreIncreased,
        DecayEventKind::DecayThresholdCrossed,
        DecayEventKind::StrategyDisabled,
        DecayEventKind::StrategyRotated,
        DecayEventKind::AlphaWeightsAdjusted,
        DecayEventKind::RetrainingTriggered,
        DecayEventKind::FeatureBalanceAdjusted,
        DecayEventKind::DecayAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecayEventKind::DecayScoreIncreased => "DECAY_SCORE_INCREASED",
            DecayEventKind::DecayThresholdCrossed => "DECAY_THRESHOLD_CROSSED",
            DecayEventKind::StrategyDisabled => "STRATEGY_DISABLED",
            DecayEventKind::StrategyRotated => "STRATEGY_ROTATED",
            DecayEventKind::AlphaWeightsAdjusted => "ALPHA_WEIGHTS_ADJUSTED",
            DecayEventKind::RetrainingTriggered => "RETRAINING_TRIGGERED",
            DecayEventKind::FeatureBalanceAdjusted => "FEATURE_BALANCE_ADJUSTED",
            DecayEventKind::DecayAlert => "DECAY_ALERT",
        }
    }
}

impl fmt::Display for DecayEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Kind-specific part of a [`DecayEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecayEventPayload {
    DecayScoreIncreased {
        previous_score: f64,
    },
    DecayThresholdCrossed {
        previous_band: DecayBand,
        band: DecayBand,
    },
    StrategyDisabled {
        reason: String,
    },
    StrategyRotated {
        action: RotationAction,
        replacement_id: String,
        rotation_count: u32,
    },
    AlphaWeightsAdjusted {
        weights: BTreeMap<String, f64>,
    },
    RetrainingTriggered {
        reason: String,
    },
    FeatureBalanceAdjusted {
        decaying_features: Vec<String>,
        improving_features: Vec<String>,
    },
    DecayAlert {
        severity: AlertSeverity,
        action: RotationAction,
        message: String,
    },
}

/// One entry of a strategy's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayEvent {
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    pub decay_score: f64,
    pub decay_flags: BTreeSet<DecayFlag>,
    pub payload: DecayEventPayload,
}

impl DecayEvent {
    pub fn new(
        strategy_id: impl Into<String>,
        decay_score: f64,
        decay_flags: BTreeSet<DecayFlag>,
        payload: DecayEventPayload,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            timestamp: Utc::now(),
            decay_score,
            decay_flags,
            payload,
        }
    }

    pub fn kind(&self) -> DecayEventKind {
        match &self.payload {
            DecayEventPayload::DecayScoreIncreased { .. } => DecayEventKind::DecayScoreIncreased,
            DecayEventPayload::DecayThresholdCrossed { .. } => {
                DecayEventKind::DecayThresholdCrossed
            }
            DecayEventPayload::StrategyDisabled { .. } => DecayEventKind::StrategyDisabled,
            DecayEventPayload::StrategyRotated { .. } => DecayEventKind::StrategyRotated,
            DecayEventPayload::AlphaWeightsAdjusted { .. } => DecayEventKind::AlphaWeightsAdjusted,
            DecayEventPayload::RetrainingTriggered { .. } => DecayEventKind::RetrainingTriggered,
            DecayEventPayload::FeatureBalanceAdjusted { .. } => {
                DecayEventKind::FeatureBalanceAdjusted
            }
            DecayEventPayload::DecayAlert { .. } => DecayEventKind::DecayAlert,
        }
    }
}

/// Raw stream entry as stored in the append log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Backend-assigned position (e.g. a Redis stream id)
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON-serialized [`DecayEvent`]
    pub data: String,
    /// Epoch milliseconds
    pub timestamp: String,
}
