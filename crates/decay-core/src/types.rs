use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Periodic health snapshot for one strategy, supplied by the metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy_id: String,
    /// Win rate over the last 7 days (0-100)
    pub win_rate_7d: f64,
    /// Win rate over the last 30 days (0-100)
    pub win_rate_30d: f64,
    pub sharpe_ratio_3d: f64,
    pub sharpe_ratio_7d: f64,
    pub alpha_7d: f64,
    pub alpha_previous_7d: f64,
    #[serde(default)]
    pub beta_btc: f64,
    #[serde(default)]
    pub beta_eth: f64,
    pub trade_frequency_7d: f64,
    pub avg_trade_frequency_30d: f64,
    pub std_dev_trade_frequency_30d: f64,
    pub signal_contribution: f64,
    pub prev_signal_contribution: f64,
    /// Peak-to-trough drawdown in percent
    pub max_drawdown: f64,
    /// Mean signal confidence (0.0 to 1.0)
    pub avg_confidence: f64,
    /// Fill quality score (0-100)
    pub execution_quality: f64,
    pub last_rotation_timestamp: DateTime<Utc>,
}

/// Boolean degradation indicators derived from [`StrategyMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecayFlag {
    WinRateDrop,
    LowSharpe,
    DecliningAlpha,
    AbnormalTradeFrequency,
    WeakAttribution,
    HighDrawdown,
    ConfidenceDecline,
    ExecutionQualityDrop,
}

impl DecayFlag {
    pub const ALL: [DecayFlag; 8] = [
        DecayFlag::WinRateDrop,
        DecayFlag::LowSharpe,
        DecayFlag::DecliningAlpha,
        DecayFlag::AbnormalTradeFrequency,
        DecayFlag::WeakAttribution,
        DecayFlag::HighDrawdown,
        DecayFlag::ConfidenceDecline,
        DecayFlag::ExecutionQualityDrop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecayFlag::WinRateDrop => "WIN_RATE_DROP",
            DecayFlag::LowSharpe => "LOW_SHARPE",
            DecayFlag::DecliningAlpha => "DECLINING_ALPHA",
            DecayFlag::AbnormalTradeFrequency => "ABNORMAL_TRADE_FREQUENCY",
            DecayFlag::WeakAttribution => "WEAK_ATTRIBUTION",
            DecayFlag::HighDrawdown => "HIGH_DRAWDOWN",
            DecayFlag::ConfidenceDecline => "CONFIDENCE_DECLINE",
            DecayFlag::ExecutionQualityDrop => "EXECUTION_QUALITY_DROP",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.as_str() == name)
    }
}

impl fmt::Display for DecayFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a flag set as `A, B, C` for log lines and explanations.
pub fn format_flags(flags: &BTreeSet<DecayFlag>) -> String {
    if flags.is_empty() {
        return "none".to_string();
    }
    flags.iter().map(DecayFlag::as_str).collect::<Vec<_>>().join(", ")
}

/// Output of one scoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayResult {
    pub strategy_id: String,
    /// Composite decay score (0.0 to 1.0, higher is worse)
    pub decay_score: f64,
    pub flags: BTreeSet<DecayFlag>,
    pub last_rotation: DateTime<Utc>,
    pub recent_alpha: f64,
    pub win_rate_7d: f64,
    pub win_rate_30d: f64,
    pub rotation_recommended: bool,
    pub timestamp: DateTime<Utc>,
}

/// Remediation the lifecycle controller can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationAction {
    ReplaceWithSibling,
    Retrain,
    InjectFallback,
    AdjustAlphaWeights,
    Disable,
    None,
}

impl RotationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationAction::ReplaceWithSibling => "REPLACE_WITH_SIBLING",
            RotationAction::Retrain => "RETRAIN",
            RotationAction::InjectFallback => "INJECT_FALLBACK",
            RotationAction::AdjustAlphaWeights => "ADJUST_ALPHA_WEIGHTS",
            RotationAction::Disable => "DISABLE",
            RotationAction::None => "NONE",
        }
    }

    /// Sibling and fallback swaps count against the rotation budget.
    pub fn is_rotation(&self) -> bool {
        matches!(
            self,
            RotationAction::ReplaceWithSibling | RotationAction::InjectFallback
        )
    }
}

impl fmt::Display for RotationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health band a decay score falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecayBand {
    Healthy,
    Low,
    Moderate,
    High,
}

impl DecayBand {
    pub fn from_score(score: f64, low: f64, moderate: f64, high: f64) -> Self {
        if score >= high {
            DecayBand::High
        } else if score >= moderate {
            DecayBand::Moderate
        } else if score >= low {
            DecayBand::Low
        } else {
            DecayBand::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecayBand::Healthy => "HEALTHY",
            DecayBand::Low => "LOW",
            DecayBand::Moderate => "MODERATE",
            DecayBand::High => "HIGH",
        }
    }
}

impl fmt::Display for DecayBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-feature verdict from the attribution analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub feature: String,
    pub is_decaying: bool,
}

/// Which input features are losing or gaining predictive power.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionAnalysis {
    #[serde(default)]
    pub decaying_features: Vec<String>,
    #[serde(default)]
    pub improving_features: Vec<String>,
    #[serde(default)]
    pub feature_results: Vec<FeatureResult>,
}

impl AttributionAnalysis {
    pub fn has_decaying_features(&self) -> bool {
        !self.decaying_features.is_empty()
    }
}

/// Decision produced by the lifecycle controller for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationAnalysis {
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    pub decay_score: f64,
    pub decay_flags: BTreeSet<DecayFlag>,
    pub recommended_action: RotationAction,
    pub explanation: String,
    pub suggested_replacement_id: Option<String>,
    pub suggested_weight_adjustments: Option<BTreeMap<String, f64>>,
    /// Whether every safety constraint held when the analysis was built
    pub can_auto_apply: bool,
    pub auto_applied: bool,
    #[serde(default)]
    pub decaying_features: Vec<String>,
    #[serde(default)]
    pub improving_features: Vec<String>,
}
