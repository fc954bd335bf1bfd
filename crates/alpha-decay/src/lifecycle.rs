//! Strategy Lifecycle Controller
//!
//! Maps decay scores and attribution results to a single remediation action
//! per cycle, enforces the rotation safety limits, and dispatches approved
//! actions to the external executors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use decay_core::{
    format_flags, ActionExecutor, AlertSeverity, AttributionAnalysis, AttributionProvider,
    DecayError, DecayEvent, DecayEventPayload, DecayResult, RotationAction, RotationAnalysis,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{DecayBands, DecayConfig, RotationConfig};
use crate::event_bus::EventBus;
use crate::families::FamilyRegistry;
use crate::scorer::HealthScorer;

const DECAYING_MULTIPLIER: f64 = 0.5;
const IMPROVING_MULTIPLIER: f64 = 1.5;

/// Rotation bookkeeping for one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub rotation_count: u32,
    pub last_rotation_time: Option<DateTime<Utc>>,
}

/// Rebalance feature weights away from decaying features.
///
/// Every known feature starts at `1/n`; decaying features get half that,
/// improving ones one and a half times, and the result is normalized to sum
/// to 1. Returns `None` when the attribution names no features.
pub fn redistribute_weights(attribution: &AttributionAnalysis) -> Option<BTreeMap<String, f64>> {
    let mut features: BTreeSet<&str> = BTreeSet::new();
    features.extend(attribution.feature_results.iter().map(|r| r.feature.as_str()));
    features.extend(attribution.decaying_features.iter().map(String::as_str));
    features.extend(attribution.improving_features.iter().map(String::as_str));

    if features.is_empty() {
        return None;
    }

    let decaying: BTreeSet<&str> = attribution
        .decaying_features
        .iter()
        .map(String::as_str)
        .chain(
            attribution
                .feature_results
                .iter()
                .filter(|r| r.is_decaying)
                .map(|r| r.feature.as_str()),
        )
        .collect();
    let improving: BTreeSet<&str> = attribution
        .improving_features
        .iter()
        .map(String::as_str)
        .collect();

    let base = 1.0 / features.len() as f64;
    let raw: BTreeMap<String, f64> = features
        .iter()
        .map(|feature| {
            let weight = if decaying.contains(feature) {
                base * DECAYING_MULTIPLIER
            } else if improving.contains(feature) {
                base * IMPROVING_MULTIPLIER
            } else {
                base
            };
            (feature.to_string(), weight)
        })
        .collect();

    let total: f64 = raw.values().sum();
    Some(raw.into_iter().map(|(f, w)| (f, w / total)).collect())
}

pub struct LifecycleController {
    rotation: RotationConfig,
    bands: DecayBands,
    scorer: Arc<HealthScorer>,
    attribution: Arc<dyn AttributionProvider>,
    executor: Arc<dyn ActionExecutor>,
    bus: Arc<EventBus>,
    families: FamilyRegistry,
    /// One lock per strategy; held across check, dispatch and bookkeeping
    registers: DashMap<String, Arc<Mutex<RotationRecord>>>,
}

impl LifecycleController {
    pub fn new(
        config: &DecayConfig,
        scorer: Arc<HealthScorer>,
        attribution: Arc<dyn AttributionProvider>,
        executor: Arc<dyn ActionExecutor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rotation: config.rotation.clone(),
            bands: config.bands.clone(),
            scorer,
            attribution,
            executor,
            bus,
            families: FamilyRegistry::new(config.rotation.strategy_families.clone()),
            registers: DashMap::new(),
        }
    }

    /// Decision matrix, first match wins.
    pub fn decide_action(&self, decay_score: f64, has_decaying_features: bool) -> RotationAction {
        let b = &self.bands;
        if decay_score >= b.high_decay_threshold && self.rotation.auto_disable_high_decay {
            RotationAction::Disable
        } else if decay_score >= b.high_decay_threshold {
            RotationAction::ReplaceWithSibling
        } else if decay_score >= b.moderate_decay_threshold && has_decaying_features {
            RotationAction::AdjustAlphaWeights
        } else if decay_score >= b.moderate_decay_threshold {
            RotationAction::Retrain
        } else if decay_score >= b.low_decay_threshold && has_decaying_features {
            RotationAction::AdjustAlphaWeights
        } else {
            RotationAction::None
        }
    }

    pub async fn analyze_rotation_needs(
        &self,
        strategy_id: &str,
    ) -> Result<Option<RotationAnalysis>, DecayError> {
        self.analyze_rotation_needs_at(strategy_id, Utc::now()).await
    }

    /// Build a rotation analysis from the latest persisted score.
    ///
    /// Returns `None` when no score is on record. Never mutates rotation
    /// bookkeeping.
    pub async fn analyze_rotation_needs_at(
        &self,
        strategy_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RotationAnalysis>, DecayError> {
        let Some(result) = self.scorer.get_decay_result(strategy_id).await? else {
            tracing::debug!("No decay score on record for {}, skipping analysis", strategy_id);
            return Ok(None);
        };

        let attribution = match self.attribution.analyze(strategy_id).await {
            Ok(attribution) => attribution,
            Err(e) => {
                tracing::warn!(
                    "Attribution unavailable for {}, deciding without it: {}",
                    strategy_id,
                    e
                );
                AttributionAnalysis::default()
            }
        };

        Ok(Some(self.build_analysis(&result, &attribution, now).await))
    }

    async fn build_analysis(
        &self,
        result: &DecayResult,
        attribution: &AttributionAnalysis,
        now: DateTime<Utc>,
    ) -> RotationAnalysis {
        let strategy_id = result.strategy_id.as_str();
        let mut action = self.decide_action(result.decay_score, attribution.has_decaying_features());

        let mut replacement = None;
        if action == RotationAction::ReplaceWithSibling {
            replacement = self
                .families
                .resolve_sibling(strategy_id)
                .await
                .filter(|sibling| sibling != strategy_id);

            if replacement.is_none() && self.rotation.enable_fallbacks {
                if let Some(fallback) = self.rotation.default_fallback_strategy_id.clone() {
                    action = RotationAction::InjectFallback;
                    replacement = Some(fallback);
                }
            }
        }

        let weights = if action == RotationAction::AdjustAlphaWeights {
            redistribute_weights(attribution)
        } else {
            None
        };

        let record = self.rotation_state(strategy_id).await;
        let violation = self
            .constraint_violation(action, strategy_id, replacement.as_deref(), &record, now)
            .await;
        let can_auto_apply = violation.is_none()
            && (action != RotationAction::AdjustAlphaWeights || weights.is_some());

        let explanation = self.explain(result, action, replacement.as_deref(), attribution);

        RotationAnalysis {
            strategy_id: strategy_id.to_string(),
            timestamp: now,
            decay_score: result.decay_score,
            decay_flags: result.flags.clone(),
            recommended_action: action,
            explanation,
            suggested_replacement_id: replacement,
            suggested_weight_adjustments: weights,
            can_auto_apply,
            auto_applied: false,
            decaying_features: attribution.decaying_features.clone(),
            improving_features: attribution.improving_features.clone(),
        }
    }

    fn explain(
        &self,
        result: &DecayResult,
        action: RotationAction,
        replacement: Option<&str>,
        attribution: &AttributionAnalysis,
    ) -> String {
        let reason = match action {
            RotationAction::Disable => {
                "high decay with auto-disable enabled, disabling strategy".to_string()
            }
            RotationAction::ReplaceWithSibling => match replacement {
                Some(sibling) => format!("high decay, replacing with sibling {}", sibling),
                None => "high decay but no sibling is available".to_string(),
            },
            RotationAction::InjectFallback => format!(
                "high decay with no usable sibling, injecting fallback {}",
                replacement.unwrap_or("<unset>")
            ),
            RotationAction::AdjustAlphaWeights => format!(
                "{} decaying feature(s) [{}], rebalancing alpha weights",
                attribution.decaying_features.len(),
                attribution.decaying_features.join(", ")
            ),
            RotationAction::Retrain => {
                "moderate decay without decaying features, retraining".to_string()
            }
            RotationAction::None => "no remediation needed".to_string(),
        };

        format!(
            "Decay score {:.2} ({} band) with flags [{}]: {}",
            result.decay_score,
            self.bands.band_for(result.decay_score),
            format_flags(&result.flags),
            reason
        )
    }

    /// First safety constraint `action` violates, if any.
    async fn constraint_violation(
        &self,
        action: RotationAction,
        strategy_id: &str,
        replacement: Option<&str>,
        record: &RotationRecord,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if action == RotationAction::None {
            return None;
        }
        if !self.rotation.auto_apply_actions {
            return Some("automatic actions are disabled".to_string());
        }

        match action {
            RotationAction::Disable if !self.rotation.auto_disable_high_decay => {
                Some("auto-disable of high decay strategies is off".to_string())
            }
            RotationAction::ReplaceWithSibling | RotationAction::InjectFallback => {
                if record.rotation_count >= self.rotation.max_auto_rotations {
                    return Some(format!(
                        "rotation limit reached ({}/{})",
                        record.rotation_count, self.rotation.max_auto_rotations
                    ));
                }
                if let Some(last) = record.last_rotation_time {
                    let days = self.rotation.min_days_between_rotations;
                    let Some(cooldown) = Duration::try_days(days) else {
                        return Some(format!("rotation cooldown of {} days is out of range", days));
                    };
                    if now - last < cooldown {
                        return Some(format!(
                            "last rotation {} is within the {} day cooldown",
                            last.to_rfc3339(),
                            self.rotation.min_days_between_rotations
                        ));
                    }
                }

                if action == RotationAction::ReplaceWithSibling {
                    let family_size = self
                        .families
                        .family_of(strategy_id)
                        .await
                        .map(|(_, members)| members.len())
                        .unwrap_or(0);
                    if family_size < 2 {
                        return Some(format!("{} has no family with siblings", strategy_id));
                    }
                    match replacement {
                        Some(sibling) if sibling != strategy_id => None,
                        _ => Some("no distinct sibling to rotate to".to_string()),
                    }
                } else if !self.rotation.enable_fallbacks {
                    Some("fallback strategies are disabled".to_string())
                } else if replacement.is_none() {
                    Some("no fallback strategy configured".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Whether `action` could be applied to `strategy_id` right now.
    pub async fn can_auto_apply(&self, action: RotationAction, strategy_id: &str) -> bool {
        let replacement = match action {
            RotationAction::ReplaceWithSibling => self.families.resolve_sibling(strategy_id).await,
            RotationAction::InjectFallback => self.rotation.default_fallback_strategy_id.clone(),
            _ => None,
        };
        let record = self.rotation_state(strategy_id).await;
        self.constraint_violation(action, strategy_id, replacement.as_deref(), &record, Utc::now())
            .await
            .is_none()
    }

    pub async fn apply_rotation_action(&self, analysis: &RotationAnalysis) -> Result<bool, DecayError> {
        self.apply_rotation_action_at(analysis, Utc::now()).await
    }

    /// Re-validate constraints and dispatch the analysis' action.
    ///
    /// Returns `Ok(false)` when nothing was applied: NONE, a constraint
    /// failure (alert emitted) or an executor failure (alert emitted).
    pub async fn apply_rotation_action_at(
        &self,
        analysis: &RotationAnalysis,
        now: DateTime<Utc>,
    ) -> Result<bool, DecayError> {
        let strategy_id = analysis.strategy_id.as_str();
        let action = analysis.recommended_action;

        if action == RotationAction::None {
            tracing::debug!("No rotation action for {}", strategy_id);
            return Ok(false);
        }

        let register = self.register(strategy_id);
        let mut record = register.lock().await;

        let replacement = analysis.suggested_replacement_id.as_deref();
        let violation = match self
            .constraint_violation(action, strategy_id, replacement, &record, now)
            .await
        {
            Some(reason) => Some(reason),
            None if action == RotationAction::AdjustAlphaWeights
                && analysis.suggested_weight_adjustments.is_none() =>
            {
                Some("no feature weights to apply".to_string())
            }
            None => None,
        };
        if let Some(reason) = violation {
            tracing::warn!("Blocked {} for {}: {}", action, strategy_id, reason);
            self.alert(
                analysis,
                AlertSeverity::Warning,
                format!("{} blocked by safety constraints: {}", action, reason),
            )
            .await?;
            return Ok(false);
        }

        let empty = BTreeMap::new();
        let weights = analysis.suggested_weight_adjustments.as_ref().unwrap_or(&empty);
        let target = replacement.unwrap_or_default();
        let dispatched = match action {
            RotationAction::ReplaceWithSibling => {
                self.executor.replace_strategy(strategy_id, target).await
            }
            RotationAction::InjectFallback => self.executor.inject_fallback(strategy_id, target).await,
            RotationAction::Retrain => self.executor.retrain(strategy_id).await,
            RotationAction::AdjustAlphaWeights => {
                self.executor.adjust_weights(strategy_id, weights).await
            }
            RotationAction::Disable => self.executor.disable(strategy_id, &analysis.explanation).await,
            RotationAction::None => return Ok(false),
        };

        if let Err(e) = dispatched {
            tracing::error!("Failed to dispatch {} for {}: {}", action, strategy_id, e);
            self.alert(
                analysis,
                AlertSeverity::Critical,
                format!("{} dispatch failed: {}", action, e),
            )
            .await?;
            return Ok(false);
        }

        if action.is_rotation() {
            record.rotation_count += 1;
            record.last_rotation_time = Some(now);
        }
        let payload = match action {
            RotationAction::ReplaceWithSibling | RotationAction::InjectFallback => {
                DecayEventPayload::StrategyRotated {
                    action,
                    replacement_id: target.to_string(),
                    rotation_count: record.rotation_count,
                }
            }
            RotationAction::Retrain => DecayEventPayload::RetrainingTriggered {
                reason: analysis.explanation.clone(),
            },
            RotationAction::AdjustAlphaWeights => DecayEventPayload::AlphaWeightsAdjusted {
                weights: weights.clone(),
            },
            RotationAction::Disable => DecayEventPayload::StrategyDisabled {
                reason: analysis.explanation.clone(),
            },
            RotationAction::None => return Ok(false),
        };
        drop(record);

        tracing::info!("Applied {} to {}", action, strategy_id);
        self.emit_for(analysis, payload).await?;

        if action == RotationAction::AdjustAlphaWeights {
            self.emit_for(
                analysis,
                DecayEventPayload::FeatureBalanceAdjusted {
                    decaying_features: analysis.decaying_features.clone(),
                    improving_features: analysis.improving_features.clone(),
                },
            )
            .await?;
        }

        Ok(true)
    }

    /// Emit a `DECAY_ALERT` carrying the analysis' score and flags.
    pub async fn alert(
        &self,
        analysis: &RotationAnalysis,
        severity: AlertSeverity,
        message: String,
    ) -> Result<(), DecayError> {
        self.emit_for(
            analysis,
            DecayEventPayload::DecayAlert {
                severity,
                action: analysis.recommended_action,
                message,
            },
        )
        .await
    }

    async fn emit_for(
        &self,
        analysis: &RotationAnalysis,
        payload: DecayEventPayload,
    ) -> Result<(), DecayError> {
        let event = DecayEvent::new(
            analysis.strategy_id.clone(),
            analysis.decay_score,
            analysis.decay_flags.clone(),
            payload,
        );
        self.bus.emit(event).await.map(|_| ())
    }

    fn register(&self, strategy_id: &str) -> Arc<Mutex<RotationRecord>> {
        self.registers
            .entry(strategy_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub async fn rotation_state(&self, strategy_id: &str) -> RotationRecord {
        match self.registers.get(strategy_id).map(|r| r.value().clone()) {
            Some(register) => register.lock().await.clone(),
            None => RotationRecord::default(),
        }
    }

    /// Restore bookkeeping, e.g. from an operator's records after a restart.
    pub async fn set_rotation_state(&self, strategy_id: &str, state: RotationRecord) {
        let register = self.register(strategy_id);
        *register.lock().await = state;
    }

    /// Operator reset of the rotation budget. Keeps the cooldown clock.
    pub async fn reset_rotation_count(&self, strategy_id: &str) {
        let register = self.register(strategy_id);
        register.lock().await.rotation_count = 0;
        tracing::info!("Rotation count reset for {}", strategy_id);
    }

    pub async fn register_family(&self, name: &str, members: Vec<String>) {
        self.families.register(name, members).await;
    }

    pub async fn remove_family(&self, name: &str) -> Option<Vec<String>> {
        self.families.remove(name).await
    }

    pub async fn families(&self) -> BTreeMap<String, Vec<String>> {
        self.families.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decay_core::FeatureResult;

    fn attribution(decaying: &[&str], improving: &[&str], neutral: &[&str]) -> AttributionAnalysis {
        let mut feature_results: Vec<FeatureResult> = decaying
            .iter()
            .map(|f| FeatureResult {
                feature: f.to_string(),
                is_decaying: true,
            })
            .collect();
        feature_results.extend(improving.iter().chain(neutral).map(|f| FeatureResult {
            feature: f.to_string(),
            is_decaying: false,
        }));

        AttributionAnalysis {
            decaying_features: decaying.iter().map(|s| s.to_string()).collect(),
            improving_features: improving.iter().map(|s| s.to_string()).collect(),
            feature_results,
        }
    }

    #[test]
    fn test_redistribution_three_features() {
        let weights = redistribute_weights(&attribution(&["A"], &["B"], &["C"])).unwrap();
        assert!((weights["A"] - 1.0 / 6.0).abs() < 1e-9);
        assert!((weights["B"] - 0.5).abs() < 1e-9);
        assert!((weights["C"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_redistribution_keeps_decaying_features_nonzero() {
        let weights =
            redistribute_weights(&attribution(&["rsi", "volume", "funding"], &[], &[])).unwrap();
        assert_eq!(weights.len(), 3);
        for weight in weights.values() {
            assert!((weight - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_redistribution_without_features() {
        assert!(redistribute_weights(&AttributionAnalysis::default()).is_none());
    }
}
