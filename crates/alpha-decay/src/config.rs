use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

use decay_core::{DecayBand, DecayError, DecayFlag};
use serde::{Deserialize, Serialize};

/// Ceiling for every day-denominated setting (ten years).
pub const MAX_CONFIG_DAYS: i64 = 3650;

/// Thresholds each decay flag is evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagThresholds {
    pub win_rate_drop_threshold: f64,       // 15 percentage points (7d vs 30d)
    pub low_sharpe_threshold: f64,          // 0.5 (3d Sharpe)
    pub alpha_decline_threshold: f64,       // 30% decline week over week
    pub freq_deviation_threshold: f64,      // 2.0 standard deviations
    pub attribution_decline_threshold: f64, // 25% decline in signal contribution
    pub max_drawdown_threshold: f64,        // 15% drawdown
    pub confidence_decline_threshold: f64,  // 20 => confidence below 0.8
    pub execution_quality_threshold: f64,   // 70 (0-100 scale)
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            win_rate_drop_threshold: 15.0,
            low_sharpe_threshold: 0.5,
            alpha_decline_threshold: 30.0,
            freq_deviation_threshold: 2.0,
            attribution_decline_threshold: 25.0,
            max_drawdown_threshold: 15.0,
            confidence_decline_threshold: 20.0,
            execution_quality_threshold: 70.0,
        }
    }
}

/// Contribution of each flag to the weighted component of the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagWeights {
    pub win_rate_drop: f64,
    pub low_sharpe: f64,
    pub declining_alpha: f64,
    pub abnormal_trade_frequency: f64,
    pub weak_attribution: f64,
    pub high_drawdown: f64,
    pub confidence_decline: f64,
    pub execution_quality_drop: f64,
}

impl Default for FlagWeights {
    fn default() -> Self {
        Self {
            win_rate_drop: 0.25,
            low_sharpe: 0.25,
            declining_alpha: 0.20,
            abnormal_trade_frequency: 0.10,
            weak_attribution: 0.20,
            high_drawdown: 0.20,
            confidence_decline: 0.15,
            execution_quality_drop: 0.15,
        }
    }
}

impl FlagWeights {
    pub fn weight(&self, flag: DecayFlag) -> f64 {
        match flag {
            DecayFlag::WinRateDrop => self.win_rate_drop,
            DecayFlag::LowSharpe => self.low_sharpe,
            DecayFlag::DecliningAlpha => self.declining_alpha,
            DecayFlag::AbnormalTradeFrequency => self.abnormal_trade_frequency,
            DecayFlag::WeakAttribution => self.weak_attribution,
            DecayFlag::HighDrawdown => self.high_drawdown,
            DecayFlag::ConfidenceDecline => self.confidence_decline,
            DecayFlag::ExecutionQualityDrop => self.execution_quality_drop,
        }
    }

    pub fn total(&self) -> f64 {
        DecayFlag::ALL.iter().map(|flag| self.weight(*flag)).sum()
    }
}

/// Score edges separating the health bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayBands {
    pub high_decay_threshold: f64,     // 0.8
    pub moderate_decay_threshold: f64, // 0.6
    pub low_decay_threshold: f64,      // 0.4
}

impl Default for DecayBands {
    fn default() -> Self {
        Self {
            high_decay_threshold: 0.8,
            moderate_decay_threshold: 0.6,
            low_decay_threshold: 0.4,
        }
    }
}

impl DecayBands {
    pub fn band_for(&self, score: f64) -> DecayBand {
        DecayBand::from_score(
            score,
            self.low_decay_threshold,
            self.moderate_decay_threshold,
            self.high_decay_threshold,
        )
    }
}

/// Safety constraints and family data for the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub min_days_between_rotations: i64,
    pub max_auto_rotations: u32,
    pub auto_apply_actions: bool,
    pub auto_disable_high_decay: bool,
    pub enable_fallbacks: bool,
    pub default_fallback_strategy_id: Option<String>,
    /// Family name -> ordered member ids (oldest first)
    pub strategy_families: BTreeMap<String, Vec<String>>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            min_days_between_rotations: 7,
            max_auto_rotations: 3,
            auto_apply_actions: true,
            auto_disable_high_decay: false,
            enable_fallbacks: true,
            default_fallback_strategy_id: None,
            strategy_families: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub score_increase_factor: f64, // 1.2
    pub max_stream_events: usize,   // 1000
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            score_increase_factor: 1.2,
            max_stream_events: 1000,
            channel_capacity: 256,
        }
    }
}

/// Complete configuration for the decay lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    pub thresholds: FlagThresholds,
    pub weights: FlagWeights,
    pub bands: DecayBands,
    pub rotation: RotationConfig,
    pub events: EventBusConfig,
    pub score_ttl_days: i64,
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, DecayError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| DecayError::Config(format!("{} has invalid value '{}'", name, raw))),
        _ => Ok(default),
    }
}

/// Parse `name:a,b,c;other:d,e` into family definitions.
pub fn parse_families(raw: &str) -> Result<BTreeMap<String, Vec<String>>, DecayError> {
    let mut families = BTreeMap::new();
    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, members) = entry.split_once(':').ok_or_else(|| {
            DecayError::Config(format!("family '{}' must look like name:id1,id2", entry))
        })?;
        let members: Vec<String> = members
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        families.insert(name.trim().to_string(), members);
    }
    Ok(families)
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            thresholds: FlagThresholds::default(),
            weights: FlagWeights::default(),
            bands: DecayBands::default(),
            rotation: RotationConfig::default(),
            events: EventBusConfig::default(),
            score_ttl_days: 30,
        }
    }
}

impl DecayConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, DecayError> {
        let defaults = Self::default();
        let t = &defaults.thresholds;
        let b = &defaults.bands;
        let r = &defaults.rotation;
        let e = &defaults.events;

        let config = Self {
            thresholds: FlagThresholds {
                win_rate_drop_threshold: env_or("DECAY_WIN_RATE_DROP", t.win_rate_drop_threshold)?,
                low_sharpe_threshold: env_or("DECAY_LOW_SHARPE", t.low_sharpe_threshold)?,
                alpha_decline_threshold: env_or("DECAY_ALPHA_DECLINE", t.alpha_decline_threshold)?,
                freq_deviation_threshold: env_or(
                    "DECAY_FREQ_DEVIATION",
                    t.freq_deviation_threshold,
                )?,
                attribution_decline_threshold: env_or(
                    "DECAY_ATTRIBUTION_DECLINE",
                    t.attribution_decline_threshold,
                )?,
                max_drawdown_threshold: env_or("DECAY_MAX_DRAWDOWN", t.max_drawdown_threshold)?,
                confidence_decline_threshold: env_or(
                    "DECAY_CONFIDENCE_DECLINE",
                    t.confidence_decline_threshold,
                )?,
                execution_quality_threshold: env_or(
                    "DECAY_EXECUTION_QUALITY",
                    t.execution_quality_threshold,
                )?,
            },
            weights: FlagWeights::default(),
            bands: DecayBands {
                high_decay_threshold: env_or("DECAY_HIGH_THRESHOLD", b.high_decay_threshold)?,
                moderate_decay_threshold: env_or(
                    "DECAY_MODERATE_THRESHOLD",
                    b.moderate_decay_threshold,
                )?,
                low_decay_threshold: env_or("DECAY_LOW_THRESHOLD", b.low_decay_threshold)?,
            },
            rotation: RotationConfig {
                min_days_between_rotations: env_or(
                    "MIN_DAYS_BETWEEN_ROTATIONS",
                    r.min_days_between_rotations,
                )?,
                max_auto_rotations: env_or("MAX_AUTO_ROTATIONS", r.max_auto_rotations)?,
                auto_apply_actions: env_or("AUTO_APPLY_ACTIONS", r.auto_apply_actions)?,
                auto_disable_high_decay: env_or(
                    "AUTO_DISABLE_HIGH_DECAY",
                    r.auto_disable_high_decay,
                )?,
                enable_fallbacks: env_or("ENABLE_FALLBACKS", r.enable_fallbacks)?,
                default_fallback_strategy_id: env::var("DEFAULT_FALLBACK_STRATEGY_ID")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                strategy_families: parse_families(
                    &env::var("STRATEGY_FAMILIES").unwrap_or_default(),
                )?,
            },
            events: EventBusConfig {
                score_increase_factor: env_or(
                    "DECAY_SCORE_INCREASE_FACTOR",
                    e.score_increase_factor,
                )?,
                max_stream_events: env_or("DECAY_MAX_STREAM_EVENTS", e.max_stream_events)?,
                channel_capacity: e.channel_capacity,
            },
            score_ttl_days: env_or("DECAY_SCORE_TTL_DAYS", defaults.score_ttl_days)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DecayError> {
        let b = &self.bands;
        let ordered = 0.0 <= b.low_decay_threshold
            && b.low_decay_threshold <= b.moderate_decay_threshold
            && b.moderate_decay_threshold <= b.high_decay_threshold
            && b.high_decay_threshold <= 1.0;
        if !ordered {
            return Err(DecayError::Config(format!(
                "decay thresholds must satisfy 0 <= low ({}) <= moderate ({}) <= high ({}) <= 1",
                b.low_decay_threshold, b.moderate_decay_threshold, b.high_decay_threshold
            )));
        }
        if self.events.score_increase_factor < 1.0 {
            return Err(DecayError::Config(
                "score increase factor must be at least 1.0".to_string(),
            ));
        }
        if self.events.max_stream_events == 0 || self.events.channel_capacity == 0 {
            return Err(DecayError::Config(
                "stream length and channel capacity must be positive".to_string(),
            ));
        }
        if !(1..=MAX_CONFIG_DAYS).contains(&self.score_ttl_days) {
            return Err(DecayError::Config(format!(
                "score TTL must be between 1 and {} days, got {}",
                MAX_CONFIG_DAYS, self.score_ttl_days
            )));
        }
        let cooldown = self.rotation.min_days_between_rotations;
        if !(0..=MAX_CONFIG_DAYS).contains(&cooldown) {
            return Err(DecayError::Config(format!(
                "rotation cooldown must be between 0 and {} days, got {}",
                MAX_CONFIG_DAYS, cooldown
            )));
        }
        Ok(())
    }
}
