//! Cache Coord - demo walkthrough
//!
//! Runs the product catalogue through every cache strategy against the
//! in-memory backend, then drains pending writes and exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_coord::product::{Product, ProductRepository, ProductService};
use cache_coord::{spawn_cleanup_task, CacheEngine, Config, InMemoryBackend, Result};

/// Main entry point for the cache coordination demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the engine over an in-memory backend
/// 4. Start background TTL cleanup and write-behind flush tasks
/// 5. Run the product walkthrough until done or interrupted
/// 6. Drain pending writes on shutdown
#[tokio::main]
async fn main() {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_coord=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cache coordination demo");

    let config = Config::from_env();
    info!(
        "Configuration loaded: namespace={}, default_ttl={}s, backend_timeout={}ms, flush_interval={}ms",
        config.namespace, config.default_ttl, config.backend_timeout_ms, config.flush_interval_ms
    );

    let backend = Arc::new(InMemoryBackend::new());
    let engine = match CacheEngine::new(backend.clone(), &config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize engine: {}", e);
            return;
        }
    };
    let repository = Arc::new(ProductRepository::new());
    let service = ProductService::new(engine.clone(), repository.clone());
    info!("Engine initialized over {} backend", engine.backend.name());

    let cleanup_handle = spawn_cleanup_task(backend, config.cleanup_interval);
    let (stop_flush, flush_stopped) = watch::channel(false);
    let flush_handle = engine.spawn_flush_task(repository.clone(), flush_stopped);
    info!("Background tasks started");

    tokio::select! {
        outcome = walkthrough(&service, &engine) => {
            if let Err(e) = outcome {
                error!("Walkthrough failed: {}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    cleanup_handle.abort();
    // The flush task finishes any save in progress before exiting
    let _ = stop_flush.send(true);
    if let Err(e) = flush_handle.await {
        warn!("Flush task ended abnormally: {}", e);
    }
    info!("Background tasks stopped");

    let report = engine.strategy.write_behind().drain(repository.as_ref()).await;
    info!(
        "Drained write-behind queue: persisted={}, dead_lettered={}",
        report.persisted, report.dead_lettered
    );

    let stats = engine.stats();
    info!(
        "Shutdown complete: hits={}, misses={}, loads={}, hit_rate={:.2}",
        stats.hits,
        stats.misses,
        stats.loads,
        stats.hit_rate()
    );
}

/// Exercises each strategy once against the product catalogue.
async fn walkthrough(service: &ProductService, engine: &CacheEngine) -> Result<()> {
    service.create_product(Product::new(1, "Desk lamp", 1999)).await;
    service.create_product(Product::new(2, "Office chair", 14900)).await;

    // Read-through: concurrent misses share one load
    let (first, second) = tokio::join!(service.get_product(1), service.get_product(1));
    let (first, second) = (first?, second?);
    info!("Read-through: {:?} / {:?}", first, second);
    info!(
        "Repository loads after two concurrent reads: {}",
        service.repository().load_count()
    );

    // Write-through
    let updated = service
        .update_product(2, Product::new(2, "Office chair", 12900))
        .await?;
    info!("Write-through stored: {:?}", updated);

    // Write-behind
    service
        .update_product_async(1, Product::new(1, "Desk lamp", 1499))
        .await?;
    info!(
        "Write-behind queued, pending writes: {}",
        engine.strategy.pending_writes()
    );
    tokio::time::sleep(engine.config().flush_interval() * 2).await;
    if let Some(persisted) = service.repository().find(1).await {
        info!("Repository after flush: {:?}", persisted);
    }

    // Invalidation
    service.delete_product(2).await?;
    let deleted = service.get_product(2).await?;
    info!("Product 2 after delete: {:?}", deleted);

    // Distributed lock
    let rebuilt = engine
        .locks
        .with_lock(
            "catalogue-rebuild",
            Duration::from_secs(5),
            Duration::from_secs(1),
            || async { service.evict_all_products().await },
        )
        .await??;
    info!("Catalogue rebuild evicted {} entries", rebuilt);

    // Rate limiting
    for attempt in 1..=4 {
        let decision = engine
            .limiter
            .hit("demo-client", 3, Duration::from_secs(60))
            .await?;
        info!(
            "Request {}: allowed={}, remaining={}",
            attempt, decision.allowed, decision.remaining
        );
    }

    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
