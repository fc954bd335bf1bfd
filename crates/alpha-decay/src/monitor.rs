//! Decay Monitor
//!
//! Runs the score -> event -> remediation cycle for each tracked strategy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use decay_core::{
    format_flags, AlertSeverity, DecayBand, DecayError, DecayEvent, DecayEventPayload,
    DecayResult, MetricsSource, RotationAction, RotationAnalysis,
};
use futures_util::future::join_all;

use crate::config::DecayBands;
use crate::event_bus::EventBus;
use crate::lifecycle::LifecycleController;
use crate::scorer::HealthScorer;

/// What one cycle did for one strategy.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The metrics source had nothing for this strategy
    InsufficientData,
    Scored {
        result: DecayResult,
        analysis: Option<RotationAnalysis>,
    },
}

impl CycleOutcome {
    pub fn applied(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Scored {
                analysis: Some(RotationAnalysis { auto_applied: true, .. }),
                ..
            }
        )
    }
}

/// Aggregate of a `run_all` pass.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub scored: usize,
    pub insufficient_data: usize,
    pub actions_applied: usize,
    pub failures: Vec<(String, DecayError)>,
}

impl CycleSummary {
    pub fn total(&self) -> usize {
        self.scored + self.insufficient_data + self.failures.len()
    }
}

pub struct DecayMonitor {
    metrics: Arc<dyn MetricsSource>,
    scorer: Arc<HealthScorer>,
    bus: Arc<EventBus>,
    controller: Arc<LifecycleController>,
    bands: DecayBands,
    last_bands: DashMap<String, DecayBand>,
}

impl DecayMonitor {
    pub fn new(
        bands: DecayBands,
        metrics: Arc<dyn MetricsSource>,
        scorer: Arc<HealthScorer>,
        bus: Arc<EventBus>,
        controller: Arc<LifecycleController>,
    ) -> Self {
        Self {
            metrics,
            scorer,
            bus,
            controller,
            bands,
            last_bands: DashMap::new(),
        }
    }

    pub async fn run_cycle(&self, strategy_id: &str) -> Result<CycleOutcome, DecayError> {
        self.run_cycle_at(strategy_id, Utc::now()).await
    }

    pub async fn run_cycle_at(
        &self,
        strategy_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, DecayError> {
        let Some(metrics) = self.metrics.fetch_metrics(strategy_id).await? else {
            tracing::debug!("No metrics for {}, insufficient data", strategy_id);
            return Ok(CycleOutcome::InsufficientData);
        };

        let result = self.scorer.calculate_decay_score_at(&metrics, now);
        self.scorer.persist_decay_result(&result).await?;

        tracing::info!(
            "{} decay score {:.2} flags [{}]",
            strategy_id,
            result.decay_score,
            format_flags(&result.flags)
        );

        self.bus
            .check_and_emit_score_increased(strategy_id, result.decay_score, &result.flags)
            .await?;
        self.observe_band(&result).await?;

        let Some(mut analysis) = self
            .controller
            .analyze_rotation_needs_at(strategy_id, now)
            .await?
        else {
            return Ok(CycleOutcome::Scored {
                result,
                analysis: None,
            });
        };

        if analysis.recommended_action != RotationAction::None {
            if analysis.can_auto_apply {
                analysis.auto_applied = self
                    .controller
                    .apply_rotation_action_at(&analysis, now)
                    .await?;
            } else {
                tracing::info!(
                    "{} recommended for {} but not auto-applicable",
                    analysis.recommended_action,
                    strategy_id
                );
                let message = format!(
                    "{} recommended but requires manual review: {}",
                    analysis.recommended_action, analysis.explanation
                );
                self.controller
                    .alert(&analysis, AlertSeverity::Info, message)
                    .await?;
            }
        }

        Ok(CycleOutcome::Scored {
            result,
            analysis: Some(analysis),
        })
    }

    /// Emit `DECAY_THRESHOLD_CROSSED` when the band moved since the last cycle.
    async fn observe_band(&self, result: &DecayResult) -> Result<bool, DecayError> {
        let band = self.bands.band_for(result.decay_score);
        let previous = {
            let mut last = self
                .last_bands
                .entry(result.strategy_id.clone())
                .or_insert(DecayBand::Healthy);
            let previous = *last;
            *last = band;
            previous
        };

        if previous == band {
            return Ok(false);
        }

        tracing::info!(
            "{} moved from {} to {} decay band",
            result.strategy_id,
            previous,
            band
        );
        let event = DecayEvent::new(
            result.strategy_id.clone(),
            result.decay_score,
            result.flags.clone(),
            DecayEventPayload::DecayThresholdCrossed {
                previous_band: previous,
                band,
            },
        );
        self.bus.emit(event).await?;
        Ok(true)
    }

    pub fn current_band(&self, strategy_id: &str) -> Option<DecayBand> {
        self.last_bands.get(strategy_id).map(|band| *band)
    }

    /// Run one cycle per strategy concurrently. A failing strategy is
    /// reported in the summary and does not stop the others.
    pub async fn run_all(&self, strategy_ids: &[String]) -> CycleSummary {
        self.run_all_at(strategy_ids, Utc::now()).await
    }

    pub async fn run_all_at(&self, strategy_ids: &[String], now: DateTime<Utc>) -> CycleSummary {
        let outcomes = join_all(
            strategy_ids
                .iter()
                .map(|id| async move { (id, self.run_cycle_at(id, now).await) }),
        )
        .await;

        let mut summary = CycleSummary::default();
        for (strategy_id, outcome) in outcomes {
            match outcome {
                Ok(CycleOutcome::InsufficientData) => summary.insufficient_data += 1,
                Ok(outcome) => {
                    summary.scored += 1;
                    if outcome.applied() {
                        summary.actions_applied += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Decay cycle failed for {}: {}", strategy_id, e);
                    summary.failures.push((strategy_id.clone(), e));
                }
            }
        }
        summary
    }

    /// `run_all` over every strategy the metrics source lists.
    pub async fn run_tracked(&self) -> Result<CycleSummary, DecayError> {
        let strategy_ids = self.metrics.list_strategies().await?;
        tracing::debug!("Running decay cycle for {} strategies", strategy_ids.len());
        Ok(self.run_all(&strategy_ids).await)
    }
}
