use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Cycle scheduling
    pub scan_interval_seconds: u64, // 3600 (hourly re-scoring)
    /// Fixed strategy list; when empty the metrics service's list is used
    pub strategy_ids: Vec<String>,

    // Collaborator services
    pub metrics_service_url: String,     // http://localhost:8010
    pub attribution_service_url: String, // http://localhost:8011
    pub executor_service_url: String,    // http://localhost:8012
    pub http_timeout_seconds: u64,       // 10

    // Storage: Redis when set, in-memory otherwise
    pub redis_url: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            scan_interval_seconds: env::var("DECAY_SCAN_INTERVAL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            strategy_ids: env::var("STRATEGY_IDS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            metrics_service_url: env::var("METRICS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8010".to_string()),
            attribution_service_url: env::var("ATTRIBUTION_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8011".to_string()),
            executor_service_url: env::var("EXECUTOR_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8012".to_string()),
            http_timeout_seconds: env::var("HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scan_interval_seconds == 0 {
            bail!("DECAY_SCAN_INTERVAL must be positive");
        }
        if self.http_timeout_seconds == 0 {
            bail!("HTTP_TIMEOUT_SECONDS must be positive");
        }
        for (name, url) in [
            ("METRICS_SERVICE_URL", &self.metrics_service_url),
            ("ATTRIBUTION_SERVICE_URL", &self.attribution_service_url),
            ("EXECUTOR_SERVICE_URL", &self.executor_service_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{} must be an http(s) URL, got '{}'", name, url);
            }
        }
        Ok(())
    }
}
