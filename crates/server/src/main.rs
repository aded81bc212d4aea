//! aegis-server entry point.
//!
//! Startup order: config → logging → store → engine components → background
//! scanner → HTTP listener. Any startup failure exits non-zero; a clean
//! shutdown (SIGINT/SIGTERM) exits zero.

use aegis_core::{AegisError, Result};
use aegis_engine::{
    Architect, ConnectorFactory, Executor, Investigator, LineageService, LlmChatClient, Notifier,
    OpenAiClient, Orchestrator, Scanner, ScannerConfig, Store, UriCipher,
};
use aegis_server::drivers::DriverRegistry;
use aegis_server::{build_router, AppState, Config};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config).await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting aegis");

    let cipher = UriCipher::from_base64(&config.encryption_key)?;
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AegisError::Storage(format!("create db directory: {e}")))?;
        }
    }
    let store = Arc::new(Store::open(&config.db_path)?);
    info!(path = %config.db_path.display(), "store ready");

    let llm: Option<Arc<dyn LlmChatClient>> = match &config.openai_api_key {
        Some(key) => {
            info!("llm diagnosis enabled");
            Some(Arc::new(OpenAiClient::new(key.clone())))
        }
        None => {
            info!("no llm configured, running with deterministic fallbacks");
            None
        }
    };

    // Warehouse drivers are deployment adapters; register them here.
    let drivers = DriverRegistry::new();
    let factory: Arc<dyn ConnectorFactory> = Arc::new(drivers);

    let notifier = Arc::new(Notifier::new());
    let lineage = Arc::new(LineageService::new(store.clone()));
    let architect = Architect::new(store.clone(), lineage.clone(), llm.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        architect,
        Executor,
        notifier.clone(),
    ));
    let investigator = Arc::new(Investigator::new(store.clone(), lineage.clone(), llm));

    let scanner = Scanner::new(
        store.clone(),
        cipher.clone(),
        factory.clone(),
        orchestrator.clone(),
        lineage.clone(),
        investigator.clone(),
        notifier.clone(),
        ScannerConfig {
            scan_interval: config.scan_interval,
            lineage_refresh_interval: config.lineage_refresh_interval,
            rediscovery_interval: config.rediscovery_interval,
            ..ScannerConfig::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner_task = tokio::spawn(scanner.clone().run(shutdown_rx));

    let state = Arc::new(AppState {
        store,
        notifier,
        orchestrator,
        lineage,
        investigator,
        scanner,
        cipher,
        factory,
        api_key: config.api_key.clone(),
        started_at: Utc::now(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| AegisError::Config(format!("bind {} failed: {e}", config.bind_addr)))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AegisError::Config(format!("server error: {e}")))?;

    let _ = shutdown_tx.send(true);
    let _ = scanner_task.await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
