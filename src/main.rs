use std::sync::Arc;

use curate_bot::config::{AppConfig, PluginManagerConfig, RuntimeConfig, WorkflowConfig};
use curate_bot::curation::{CurationWorkflow, RecapScheduler, spawn_recap_scheduler};
use curate_bot::pipeline::{ContentProcessor, DistributionFanout, TransformPipeline};
use curate_bot::plugins::PluginManager;
use curate_bot::plugins::builtin::builtin_resolver;
use curate_bot::plugins::routes::{PluginRouteState, plugin_routes};
use curate_bot::source::{InboxRouteState, InboxSource, MentionSource, inbox_routes};
use curate_bot::store::{CurationStore, LibSqlBackend, RetryConfig, RetryingStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let runtime = RuntimeConfig::from_env();
    let config = Arc::new(AppConfig::load(&runtime.config_path)?);

    eprintln!("📰 Curate Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", runtime.config_path.display());
    eprintln!("   Bot: @{}", config.global.bot_id);
    eprintln!("   Feeds: {}", config.feeds.len());

    // ── Database ─────────────────────────────────────────────────────────
    let backend = LibSqlBackend::new_local(&runtime.db_path).await?;
    let store: Arc<dyn CurationStore> =
        Arc::new(RetryingStore::new(backend, RetryConfig::default()));
    eprintln!("   Database: {}", runtime.db_path.display());

    // ── Plugins ──────────────────────────────────────────────────────────
    let manager = Arc::new(PluginManager::new(
        config.plugins.clone(),
        Arc::new(builtin_resolver()),
        PluginManagerConfig::for_environment(runtime.production),
    ));
    let processor = Arc::new(ContentProcessor::new(
        TransformPipeline::new(Arc::clone(&manager)),
        DistributionFanout::new(Arc::clone(&manager)),
    ));
    eprintln!("   Plugins: {} registered", config.plugins.len());

    // ── Workflow ─────────────────────────────────────────────────────────
    let inbox = Arc::new(InboxSource::new());
    let workflow = Arc::new(CurationWorkflow::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&inbox) as Arc<dyn MentionSource>,
        Arc::clone(&processor),
        WorkflowConfig {
            poll_interval: runtime.poll_interval,
        },
    ));
    workflow.initialize().await?;
    workflow.start().await;

    let recaps = spawn_recap_scheduler(Arc::new(RecapScheduler::new(
        Arc::clone(&config),
        Arc::clone(&store),
        processor,
    )));
    eprintln!(
        "   Polling: every {}s, recaps: {}",
        runtime.poll_interval.as_secs(),
        recaps.task_count()
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = plugin_routes(PluginRouteState {
        manager: Arc::clone(&manager),
    })
    .merge(inbox_routes(InboxRouteState { inbox }));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", runtime.http_port)).await?;
    eprintln!("   HTTP: http://0.0.0.0:{}\n", runtime.http_port);
    tracing::info!(port = runtime.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Shutting down");
    workflow.stop().await;
    recaps.stop().await;
    if let Err(e) = manager.cleanup().await {
        tracing::error!(error = %e, "Plugin cleanup incomplete");
    }
    Ok(())
}
