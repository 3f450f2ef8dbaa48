use std::sync::Arc;

use db::{DBService, models::project::Project};
use orchestrator::{SyncOrchestrator, WorkflowRunner};
use orchestrator::scheduler::SyncScheduler;
use server::{AppState, router};
use services::services::beads::{BeadsService, cli::BeadsCli};
use services::services::config::SyncConfig;
use services::services::docs::{DocsExporter, LoggingDocsExporter};
use services::services::http::build_http_client;
use services::services::huly::HulyClient;
use services::services::sync::SyncEngine;
use services::services::vibe::VibeClient;
use services::services::watchers::{BeadsWatcher, DocsWatcher, WatchEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utils::metrics::MetricsRegistry;

fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    utils::log::init_tracing();

    let config = SyncConfig::from_env();
    let database_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "huly-sync.db".to_string());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = database_path.as_str(),
        huly = config.huly_api_url.as_str(),
        vibe = config.vibe_api_url.as_str(),
        "starting sync server"
    );

    let db = DBService::new(&database_path).await?;
    let metrics = MetricsRegistry::new();
    let http = build_http_client()?;

    let huly = Arc::new(HulyClient::new(
        http.clone(),
        &config.huly_api_url,
        config.huly_api_token.clone(),
        metrics.clone(),
    ));
    let vibe = Arc::new(VibeClient::new(http, &config.vibe_api_url, metrics.clone()));
    let beads = Arc::new(BeadsService::new(BeadsCli::new(config.beads_operation_delay)));
    if !beads.cli().is_installed() {
        warn!("beads CLI (`bd`) not found on PATH; beads operations will fail until installed");
    }
    let docs: Arc<dyn DocsExporter> = Arc::new(LoggingDocsExporter);

    let engine = SyncEngine::new(
        db.clone(),
        huly,
        vibe,
        beads,
        Arc::clone(&docs),
        config.clone(),
    );
    let orchestrator = Arc::new(SyncOrchestrator::new(engine));
    let runner = WorkflowRunner::new(config.max_workers);
    let scheduler = SyncScheduler::new(Arc::clone(&orchestrator), runner.clone());

    let shutdown = CancellationToken::new();
    scheduler.spawn_periodic(shutdown.clone());
    scheduler.spawn_reconciliation(shutdown.clone());

    // Watchers: beads trees of every known project, plus the optional docs
    // tree. Watcher failures degrade to interval-only sync.
    let (beads_tx, beads_rx) = mpsc::channel::<WatchEvent>(64);
    let projects = Project::find_all(&db.pool).await?;
    let watch_targets: Vec<(String, std::path::PathBuf)> = projects
        .into_iter()
        .filter_map(|p| {
            p.filesystem_path
                .map(|path| (p.identifier, std::path::PathBuf::from(path)))
        })
        .collect();
    let _beads_watcher = match BeadsWatcher::spawn(watch_targets, beads_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("beads watcher unavailable: {e}");
            None
        }
    };
    scheduler.spawn_watch_pump(beads_rx);

    let _docs_watcher = config.docs_watch_dir.clone().and_then(|dir| {
        let (docs_tx, mut docs_rx) = mpsc::channel::<WatchEvent>(16);
        let exporter = Arc::clone(&docs);
        tokio::spawn(async move {
            while let Some(event) = docs_rx.recv().await {
                let changed: Vec<String> = event
                    .changed_paths
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect();
                if let Err(e) = exporter
                    .export(&event.project_identifier, None, &changed)
                    .await
                {
                    warn!("docs export failed: {e}");
                }
            }
        });
        match DocsWatcher::spawn("docs".to_string(), dir, docs_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("docs watcher unavailable: {e}");
                None
            }
        }
    });

    let state = AppState {
        db,
        orchestrator,
        runner,
        metrics,
        config: config.clone(),
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = config.host.as_str(), port = config.port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
