use std::sync::Arc;
use std::time::Duration;

use alpha_decay::{DecayConfig, DecayMonitor, EventBus, HealthScorer, LifecycleController};
use anyhow::{Context, Result};
use decay_core::{format_flags, AppendLog, DecayEvent, DecayEventPayload, KeyValueStore};
use decay_store::{InMemoryStore, RedisStore};
use notification_service::{NotificationConfig, NotificationService};
use tokio::signal::unix::SignalKind;
use tokio::sync::broadcast;
use tokio::time;

mod clients;
mod config;

use clients::{HttpActionExecutor, HttpAttributionProvider, HttpMetricsSource};
use config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting strategy decay agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    let decay_config = DecayConfig::from_env().context("Invalid decay configuration")?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Scan interval: {} seconds", config.scan_interval_seconds);
    tracing::info!(
        "  Bands: low {:.2} / moderate {:.2} / high {:.2}",
        decay_config.bands.low_decay_threshold,
        decay_config.bands.moderate_decay_threshold,
        decay_config.bands.high_decay_threshold
    );
    tracing::info!(
        "  Rotations: max {} auto, {} day cooldown, auto-apply {}, auto-disable {}",
        decay_config.rotation.max_auto_rotations,
        decay_config.rotation.min_days_between_rotations,
        decay_config.rotation.auto_apply_actions,
        decay_config.rotation.auto_disable_high_decay
    );
    tracing::info!(
        "  Strategy families: {}",
        decay_config.rotation.strategy_families.len()
    );

    // 3. Storage: Redis when configured, in-memory otherwise
    let (records, log): (Arc<dyn KeyValueStore>, Arc<dyn AppendLog>) = match &config.redis_url {
        Some(url) => {
            let store = Arc::new(
                RedisStore::connect(url)
                    .await
                    .context("Failed to connect to Redis")?,
            );
            tracing::info!("Decay state stored in Redis");
            (store.clone(), store)
        }
        None => {
            tracing::warn!("REDIS_URL not set, decay state is kept in memory only");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store)
        }
    };

    // 4. External collaborators
    let timeout = Duration::from_secs(config.http_timeout_seconds);
    let metrics = Arc::new(HttpMetricsSource::new(
        config.metrics_service_url.clone(),
        timeout,
    )?);
    let attribution = Arc::new(HttpAttributionProvider::new(
        config.attribution_service_url.clone(),
        timeout,
    )?);
    let executor = Arc::new(HttpActionExecutor::new(
        config.executor_service_url.clone(),
        timeout,
    )?);
    tracing::info!("Metrics service: {}", config.metrics_service_url);
    tracing::info!("Attribution service: {}", config.attribution_service_url);
    tracing::info!("Executor service: {}", config.executor_service_url);

    // 5. Event bus, optionally pushing to Discord
    let notification_config =
        NotificationConfig::from_env().context("Invalid notification configuration")?;
    let notifications = NotificationService::new(&notification_config);
    let mut bus = EventBus::new(&decay_config.events, log);
    if notifications.is_enabled() {
        bus = bus.with_notifier(Arc::new(notifications));
    }
    let bus = Arc::new(bus);
    tokio::spawn(log_events(bus.subscribe_all()));

    // 6. Scorer, controller, monitor
    let scorer = Arc::new(HealthScorer::new(&decay_config, records));
    let controller = Arc::new(LifecycleController::new(
        &decay_config,
        scorer.clone(),
        attribution,
        executor,
        bus.clone(),
    ));
    let monitor = DecayMonitor::new(
        decay_config.bands.clone(),
        metrics,
        scorer,
        bus,
        controller,
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_secs(config.scan_interval_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut cycles_run: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycles_run += 1;
                run_decay_cycle(&monitor, &config, cycles_run).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                break;
            }
        }
    }

    tracing::info!("Decay agent shut down after {} cycles.", cycles_run);
    Ok(())
}

async fn run_decay_cycle(monitor: &DecayMonitor, config: &AgentConfig, cycle: u64) {
    let started = time::Instant::now();

    let summary = if config.strategy_ids.is_empty() {
        match monitor.run_tracked().await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Cycle #{}: could not list strategies: {}", cycle, e);
                return;
            }
        }
    } else {
        monitor.run_all(&config.strategy_ids).await
    };

    tracing::info!(
        "Cycle #{} done in {:.1}s: {} scored, {} without data, {} actions applied, {} failed",
        cycle,
        started.elapsed().as_secs_f64(),
        summary.scored,
        summary.insufficient_data,
        summary.actions_applied,
        summary.failures.len()
    );
}

/// Mirror every decay event into the process log.
async fn log_events(mut events: broadcast::Receiver<DecayEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match &event.payload {
                DecayEventPayload::DecayAlert {
                    severity, message, ..
                } => tracing::warn!(
                    "[{}] {} alert: {}",
                    event.strategy_id,
                    severity.as_str(),
                    message
                ),
                _ => tracing::info!(
                    "[{}] {} (score {:.2}, flags [{}])",
                    event.strategy_id,
                    event.kind(),
                    event.decay_score,
                    format_flags(&event.decay_flags)
                ),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
