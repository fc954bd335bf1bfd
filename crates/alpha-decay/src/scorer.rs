//! Strategy Health Scoring
//!
//! Turns a periodic metrics snapshot into a composite decay score and the set
//! of degradation flags behind it, and keeps the latest result per strategy.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use decay_core::{DecayError, DecayFlag, DecayResult, KeyValueStore, StrategyMetrics};

use crate::config::{DecayBands, DecayConfig, FlagThresholds, FlagWeights, MAX_CONFIG_DAYS};

/// Upper bound on the weight normalizer so a handful of heavy flags saturate the score.
const MAX_WEIGHT_NORMALIZER: f64 = 1.4;
const BASE_SHARE: f64 = 0.4;
const WEIGHTED_SHARE: f64 = 0.6;
/// Days without rotation at which the age amplification is fully applied.
const AGE_SATURATION_DAYS: f64 = 90.0;
const MAX_AGE_AMPLIFICATION: f64 = 0.2;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
const SECS_PER_DAY: u64 = 86_400;

/// Scores are stored with two decimals; every consumer sees the stored value.
pub fn round_score(score: f64) -> f64 {
    ((score * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

pub fn score_key(strategy_id: &str) -> String {
    format!("strategy:decay:{}", strategy_id)
}

/// Computes decay scores and persists the latest result per strategy.
pub struct HealthScorer {
    thresholds: FlagThresholds,
    weights: FlagWeights,
    bands: DecayBands,
    score_ttl: Duration,
    store: Arc<dyn KeyValueStore>,
}

impl HealthScorer {
    pub fn new(config: &DecayConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            weights: config.weights.clone(),
            bands: config.bands.clone(),
            score_ttl: Duration::from_secs(
                config.score_ttl_days.clamp(1, MAX_CONFIG_DAYS) as u64 * SECS_PER_DAY,
            ),
            store,
        }
    }

    /// Evaluate every decay flag against the configured thresholds.
    pub fn evaluate_flags(&self, m: &StrategyMetrics) -> BTreeSet<DecayFlag> {
        let t = &self.thresholds;
        let mut flags = BTreeSet::new();

        if m.win_rate_30d - m.win_rate_7d >= t.win_rate_drop_threshold {
            flags.insert(DecayFlag::WinRateDrop);
        }

        if m.sharpe_ratio_3d < t.low_sharpe_threshold {
            flags.insert(DecayFlag::LowSharpe);
        }

        let alpha_drop = m.alpha_previous_7d - m.alpha_7d;
        if let Some(decline) = percent_decline(m.alpha_previous_7d.abs(), alpha_drop) {
            if decline >= t.alpha_decline_threshold {
                flags.insert(DecayFlag::DecliningAlpha);
            }
        }

        let band = t.freq_deviation_threshold * m.std_dev_trade_frequency_30d;
        if m.trade_frequency_7d < m.avg_trade_frequency_30d - band
            || m.trade_frequency_7d > m.avg_trade_frequency_30d + band
        {
            flags.insert(DecayFlag::AbnormalTradeFrequency);
        }

        if m.prev_signal_contribution > 0.0 {
            let drop = m.prev_signal_contribution - m.signal_contribution;
            if let Some(decline) = percent_decline(m.prev_signal_contribution, drop) {
                if decline >= t.attribution_decline_threshold {
                    flags.insert(DecayFlag::WeakAttribution);
                }
            }
        }

        if m.max_drawdown >= t.max_drawdown_threshold {
            flags.insert(DecayFlag::HighDrawdown);
        }

        if m.avg_confidence < 1.0 - t.confidence_decline_threshold / 100.0 {
            flags.insert(DecayFlag::ConfidenceDecline);
        }

        if m.execution_quality < t.execution_quality_threshold {
            flags.insert(DecayFlag::ExecutionQualityDrop);
        }

        flags
    }

    pub fn calculate_decay_score(&self, metrics: &StrategyMetrics) -> DecayResult {
        self.calculate_decay_score_at(metrics, Utc::now())
    }

    /// Score `metrics` as of `now`. Pure: same inputs always give the same result.
    pub fn calculate_decay_score_at(
        &self,
        metrics: &StrategyMetrics,
        now: DateTime<Utc>,
    ) -> DecayResult {
        let flags = self.evaluate_flags(metrics);

        let base = (flags.len() as f64 / DecayFlag::ALL.len() as f64).min(1.0);

        let present: f64 = flags.iter().map(|flag| self.weights.weight(*flag)).sum();
        let normalizer = self.weights.total().min(MAX_WEIGHT_NORMALIZER);
        let weighted = if normalizer > 0.0 {
            (present / normalizer).min(1.0)
        } else {
            0.0
        };

        let combined = BASE_SHARE * base + WEIGHTED_SHARE * weighted;

        let days_since_rotation = ((now - metrics.last_rotation_timestamp).num_milliseconds()
            as f64
            / MILLIS_PER_DAY)
            .max(0.0);
        let age_factor = (days_since_rotation / AGE_SATURATION_DAYS).min(1.0);
        let decay_score = round_score(combined * (1.0 + MAX_AGE_AMPLIFICATION * age_factor));

        DecayResult {
            strategy_id: metrics.strategy_id.clone(),
            decay_score,
            rotation_recommended: decay_score >= self.bands.moderate_decay_threshold,
            flags,
            last_rotation: metrics.last_rotation_timestamp,
            recent_alpha: metrics.alpha_7d,
            win_rate_7d: metrics.win_rate_7d,
            win_rate_30d: metrics.win_rate_30d,
            timestamp: now,
        }
    }

    /// Store the result under its strategy key with the configured TTL.
    pub async fn persist_decay_result(&self, result: &DecayResult) -> Result<(), DecayError> {
        let key = score_key(&result.strategy_id);
        let fields = encode_record(result)?;

        self.store.set_fields(&key, &fields).await?;
        self.store.expire(&key, self.score_ttl).await?;

        tracing::debug!(
            "Persisted decay score {:.2} for {}",
            result.decay_score,
            result.strategy_id
        );
        Ok(())
    }

    /// Latest persisted result; `None` when absent or expired.
    pub async fn get_decay_result(
        &self,
        strategy_id: &str,
    ) -> Result<Option<DecayResult>, DecayError> {
        let key = score_key(strategy_id);
        match self.store.get_fields(&key).await? {
            Some(fields) => decode_record(strategy_id, &key, &fields).map(Some),
            None => Ok(None),
        }
    }
}

/// `drop / reference` as a percentage, undefined for a zero reference.
fn percent_decline(reference: f64, drop: f64) -> Option<f64> {
    if reference.abs() < f64::EPSILON {
        None
    } else {
        Some(drop / reference * 100.0)
    }
}

fn encode_record(result: &DecayResult) -> Result<Vec<(String, String)>, DecayError> {
    let flag_names: Vec<&str> = result.flags.iter().map(DecayFlag::as_str).collect();
    Ok(vec![
        ("decayScore".to_string(), format!("{:.2}", result.decay_score)),
        ("flags".to_string(), serde_json::to_string(&flag_names)?),
        (
            "lastRotation".to_string(),
            result.last_rotation.timestamp_millis().to_string(),
        ),
        ("recentAlpha".to_string(), format!("{:.4}", result.recent_alpha)),
        ("winRate7d".to_string(), format!("{:.1}", result.win_rate_7d)),
        ("winRate30d".to_string(), format!("{:.1}", result.win_rate_30d)),
        (
            "rotationRecommended".to_string(),
            if result.rotation_recommended { "1" } else { "0" }.to_string(),
        ),
        (
            "timestamp".to_string(),
            result.timestamp.timestamp_millis().to_string(),
        ),
    ])
}

fn decode_record(
    strategy_id: &str,
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<DecayResult, DecayError> {
    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DecayError::malformed(key, format!("missing field '{}'", name)))
    };
    let number = |name: &str| -> Result<f64, DecayError> {
        field(name)?
            .parse::<f64>()
            .map_err(|_| DecayError::malformed(key, format!("field '{}' is not a number", name)))
    };
    let millis = |name: &str| -> Result<DateTime<Utc>, DecayError> {
        field(name)?
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| DecayError::malformed(key, format!("field '{}' is not epoch ms", name)))
    };

    let flag_names: Vec<String> = serde_json::from_str(field("flags")?)
        .map_err(|e| DecayError::malformed(key, format!("flags: {}", e)))?;
    let flags = flag_names
        .iter()
        .map(|name| {
            DecayFlag::parse(name)
                .ok_or_else(|| DecayError::malformed(key, format!("unknown flag '{}'", name)))
        })
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(DecayResult {
        strategy_id: strategy_id.to_string(),
        decay_score: number("decayScore")?.clamp(0.0, 1.0),
        flags,
        last_rotation: millis("lastRotation")?,
        recent_alpha: number("recentAlpha")?,
        win_rate_7d: number("winRate7d")?,
        win_rate_30d: number("winRate30d")?,
        rotation_recommended: field("rotationRecommended")? == "1",
        timestamp: millis("timestamp")?,
    })
}
