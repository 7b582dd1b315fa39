//! Persona Governor demo host
//!
//! Runs a simulated persona workload against a bounded cache and a per-key
//! rate limiter, logging their statistics until shut down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use persona_governor::wrap::timed_future;
use persona_governor::{BoundedCache, CleanupScheduler, Config, GovernorError, RateLimiter};

const PERSONAS: [&str; 4] = ["archivist", "cartographer", "herald", "tinker"];
const WORKERS: usize = 8;
const TICK: Duration = Duration::from_millis(250);
const REPORT_EVERY: Duration = Duration::from_secs(10);

/// Main entry point for the demo host.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Build the cache and the rate limiter
/// 4. Start the background cleanup tasks
/// 5. Run the workload and stats reporter until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persona_governor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Persona Governor demo");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: capacity={}, default_ttl={:?}, shards={}, cleanup_interval={}s, limiter={} ({} per {}s)",
        config.cache.capacity,
        config.cache.default_ttl,
        config.cache.shards,
        config.cache.cleanup_interval,
        config.limiter.strategy,
        config.limiter.capacity,
        config.limiter.window
    );

    let cache: BoundedCache<serde_json::Value> = BoundedCache::new(&config.cache)?;
    let limiter = Arc::new(RateLimiter::new(&config.limiter)?);
    info!("Cache and rate limiter initialized");

    let scheduler = CleanupScheduler::start(&cache, Some(limiter.clone()));
    info!("Background cleanup tasks started");

    let workload = tokio::spawn(run_workload(cache.clone(), limiter.clone()));
    let reporter = tokio::spawn(report_stats(cache.clone(), limiter.clone()));

    shutdown_signal().await?;

    workload.abort();
    reporter.abort();
    scheduler.shutdown();
    warn!("Background tasks aborted");

    log_stats(&cache, &limiter);
    info!("Shutdown complete");
    Ok(())
}

/// Runs two workers per persona so activations of the same persona race and
/// share one trait analysis through the cache.
async fn run_workload(cache: BoundedCache<serde_json::Value>, limiter: Arc<RateLimiter>) {
    let mut workers = JoinSet::new();
    for worker in 0..WORKERS {
        let persona = PERSONAS[worker % PERSONAS.len()];
        workers.spawn(activate_loop(worker, persona, cache.clone(), limiter.clone()));
    }
    while workers.join_next().await.is_some() {}
}

async fn activate_loop(
    worker: usize,
    persona: &'static str,
    cache: BoundedCache<serde_json::Value>,
    limiter: Arc<RateLimiter>,
) {
    let activation_key = format!("persona:{}:activate", persona);
    let cache_key = format!("traits:{}:analysis", persona);
    let mut round: u64 = 0;

    loop {
        match limiter.check(&activation_key) {
            Ok(()) => {
                let result = timed_future(
                    "trait_analysis",
                    cache.get_or_compute(&cache_key, || analyze_traits(persona, round)),
                )
                .await;

                match result {
                    Ok(analysis) => debug!(worker, persona, %analysis, "Persona activated"),
                    Err(e) => warn!(worker, persona, error = %e, "Trait analysis failed"),
                }
            }
            Err(GovernorError::RateLimitExceeded { retry_after, .. }) => {
                debug!(worker, persona, ?retry_after, "Persona activation throttled");
            }
            Err(e) => warn!(worker, persona, error = %e, "Unexpected limiter error"),
        }

        // Traits changed: drop every derived analysis so the next activations recompute
        if worker == 0 && round % 40 == 39 {
            match cache.invalidate_pattern("traits:*").await {
                Ok(removed) => debug!(removed, "Invalidated trait analyses"),
                Err(e) => warn!(error = %e, "Pattern invalidation failed"),
            }
        }

        round = round.wrapping_add(1);
        tokio::time::sleep(TICK).await;
    }
}

/// Stand-in for an expensive derivation; fails every thirteenth round.
async fn analyze_traits(persona: &str, round: u64) -> anyhow::Result<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(50)).await;

    if round % 13 == 12 {
        anyhow::bail!("trait model unavailable for {}", persona);
    }

    Ok(json!({
        "persona": persona,
        "openness": (round % 10) as f64 / 10.0,
        "computed_round": round,
    }))
}

async fn report_stats(cache: BoundedCache<serde_json::Value>, limiter: Arc<RateLimiter>) {
    loop {
        tokio::time::sleep(REPORT_EVERY).await;
        log_stats(&cache, &limiter);
    }
}

fn log_stats(cache: &BoundedCache<serde_json::Value>, limiter: &RateLimiter) {
    let report = json!({
        "cache": cache.stats(),
        "limiter": limiter.stats(),
    });
    info!("Stats: {}", report);
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    Ok(())
}
