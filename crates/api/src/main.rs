//! Herald server binary entrypoint.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::redis_pool::create_redis_pool;
use herald_common::storage::{FileStore, JsonStore, RedisStore};
use herald_engine::orchestrator::{NotificationOrchestrator, OrchestratorConfig};
use herald_engine::preferences::{PreferenceStore, PreferenceStoreConfig};
use herald_engine::releases::{ReleaseSourceClient, ReleaseSourceConfig};
use herald_engine::version::{VersionSource, VersionTracker};
use herald_notifier::{DiscordConfig, DiscordTransport};

use herald_api::routes::create_router;
use herald_api::scheduler::CheckScheduler;
use herald_api::state::AppState;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("herald_api=info,herald_engine=info,herald_notifier=info,tower_http=info")
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JsonStore>> {
    match &config.redis_url {
        Some(url) => {
            let redis = create_redis_pool(url).await?;
            Ok(Arc::new(RedisStore::new(redis, "herald:")))
        }
        None => {
            tracing::info!(data_dir = %config.data_dir, "Using file-backed storage");
            Ok(Arc::new(FileStore::new(&config.data_dir)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting Herald...");

    let config = AppConfig::from_env()?;
    let store = build_store(&config).await?;
    let http_timeout = Duration::from_secs(config.http_timeout_secs);

    let version_source = match &config.current_version {
        Some(version) => VersionSource::Fixed(version.clone()),
        None => VersionSource::File(PathBuf::from(&config.version_file)),
    };
    let tracker = VersionTracker::new(version_source, Arc::clone(&store));

    let releases = ReleaseSourceClient::new(ReleaseSourceConfig {
        api_url: config.release_api_url.clone(),
        repo: config.release_repo.clone(),
        token: config.release_api_token.clone(),
        tag_prefix: config.release_tag_prefix.clone(),
        cache_ttl: Duration::from_secs(config.release_cache_ttl_secs),
        request_timeout: http_timeout,
    })?;

    let preferences = PreferenceStore::new(
        Arc::clone(&store),
        PreferenceStoreConfig {
            debounce: Duration::from_millis(config.preferences_debounce_ms),
        },
    );

    let orchestrator = Arc::new(NotificationOrchestrator::new(
        tracker,
        Arc::new(releases),
        preferences,
        OrchestratorConfig {
            first_run_release_cap: config.first_run_release_cap,
            field_value_limit: config.field_value_limit,
            delivery_concurrency: config.delivery_concurrency,
            ..Default::default()
        },
    ));

    let bot_token = config
        .discord_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN environment variable is required"))?;
    let transport = DiscordTransport::new(DiscordConfig {
        api_url: config.discord_api_url.clone(),
        bot_token,
        request_timeout: http_timeout,
    })?;

    orchestrator.initialize(Arc::new(transport)).await?;

    let state = AppState::new(Arc::clone(&orchestrator));

    let scheduler = CheckScheduler::new(state.clone(), config.check_interval_secs);
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    scheduler_task.abort();
    orchestrator.shutdown().await?;

    tracing::info!("Herald stopped.");
    Ok(())
}
