//! HTTP clients for the metrics, attribution and executor services.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use decay_core::{
    ActionExecutor, AttributionAnalysis, AttributionProvider, DecayError, MetricsSource,
    StrategyMetrics,
};
use reqwest::StatusCode;
use serde::Serialize;

fn http_client(timeout: Duration) -> Result<reqwest::Client, DecayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DecayError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Append path segments to `base_url`, percent-encoding each one so ids
/// containing `/`, `?` or `#` stay inside their own segment.
fn service_url(base_url: &str, segments: &[&str]) -> Result<reqwest::Url, DecayError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| DecayError::Config(format!("Invalid service URL '{}': {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| DecayError::Config(format!("Service URL '{}' cannot take a path", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn strategy_url(base_url: &str, strategy_id: &str, tail: &str) -> Result<reqwest::Url, DecayError> {
    service_url(base_url, &["strategies", strategy_id, tail])
}

#[derive(Clone)]
pub struct HttpMetricsSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricsSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, DecayError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
        })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch_metrics(&self, strategy_id: &str) -> Result<Option<StrategyMetrics>, DecayError> {
        let response = self
            .client
            .get(strategy_url(&self.base_url, strategy_id, "metrics")?)
            .send()
            .await
            .map_err(|e| DecayError::MetricsSource(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DecayError::MetricsSource(format!(
                "Status: {} for {}",
                response.status(),
                strategy_id
            )));
        }

        let metrics = response
            .json::<StrategyMetrics>()
            .await
            .map_err(|e| DecayError::MetricsSource(e.to_string()))?;
        Ok(Some(metrics))
    }

    async fn list_strategies(&self) -> Result<Vec<String>, DecayError> {
        let response = self
            .client
            .get(service_url(&self.base_url, &["strategies"])?)
            .send()
            .await
            .map_err(|e| DecayError::MetricsSource(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DecayError::MetricsSource(format!(
                "Status: {}",
                response.status()
            )));
        }

        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| DecayError::MetricsSource(e.to_string()))
    }
}

#[derive(Clone)]
pub struct HttpAttributionProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAttributionProvider {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, DecayError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
        })
    }
}

#[async_trait]
impl AttributionProvider for HttpAttributionProvider {
    async fn analyze(&self, strategy_id: &str) -> Result<AttributionAnalysis, DecayError> {
        let response = self
            .client
            .get(strategy_url(&self.base_url, strategy_id, "attribution")?)
            .send()
            .await
            .map_err(|e| DecayError::Attribution(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DecayError::Attribution(format!(
                "Status: {} for {}",
                response.status(),
                strategy_id
            )));
        }

        response
            .json::<AttributionAnalysis>()
            .await
            .map_err(|e| DecayError::Attribution(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ReplaceRequest<'a> {
    replacement_id: &'a str,
}

#[derive(Debug, Serialize)]
struct FallbackRequest<'a> {
    fallback_id: &'a str,
}

#[derive(Debug, Serialize)]
struct WeightsRequest<'a> {
    weights: &'a BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct DisableRequest<'a> {
    reason: &'a str,
}

/// Posts remediation commands to the strategy executor service.
#[derive(Clone)]
pub struct HttpActionExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActionExecutor {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, DecayError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
        })
    }

    async fn command<T: Serialize + Sync>(
        &self,
        strategy_id: &str,
        command: &str,
        body: &T,
    ) -> Result<(), DecayError> {
        let response = self
            .client
            .post(strategy_url(&self.base_url, strategy_id, command)?)
            .json(body)
            .send()
            .await
            .map_err(|e| DecayError::Executor(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DecayError::Executor(format!(
                "{} for {} returned {}",
                command,
                strategy_id,
                response.status()
            )));
        }

        tracing::debug!("Dispatched {} for {}", command, strategy_id);
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn replace_strategy(
        &self,
        strategy_id: &str,
        replacement_id: &str,
    ) -> Result<(), DecayError> {
        self.command(strategy_id, "replace", &ReplaceRequest { replacement_id })
            .await
    }

    async fn retrain(&self, strategy_id: &str) -> Result<(), DecayError> {
        self.command(strategy_id, "retrain", &serde_json::json!({}))
            .await
    }

    async fn inject_fallback(
        &self,
        strategy_id: &str,
        fallback_id: &str,
    ) -> Result<(), DecayError> {
        self.command(strategy_id, "fallback", &FallbackRequest { fallback_id })
            .await
    }

    async fn adjust_weights(
        &self,
        strategy_id: &str,
        weights: &BTreeMap<String, f64>,
    ) -> Result<(), DecayError> {
        self.command(strategy_id, "weights", &WeightsRequest { weights })
            .await
    }

    async fn disable(&self, strategy_id: &str, reason: &str) -> Result<(), DecayError> {
        self.command(strategy_id, "disable", &DisableRequest { reason })
            .await
    }
}
