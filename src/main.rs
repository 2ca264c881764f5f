use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use slotbook::api::{self, AppState};
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::maintenance;
use slotbook::notify::NotifyHub;
use slotbook::relay::{self, WebSocketSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify.clone())?);
    if config.seed {
        slotbook::seed::seed_catalog(&engine).await?;
    }

    let cancel = CancellationToken::new();
    let mut background = Vec::new();

    background.push(tokio::spawn(maintenance::run_compactor(
        engine.clone(),
        config.compact_threshold,
        cancel.clone(),
    )));

    // The default tenant always exists, relay or not.
    let iot_group = notify.tenants().pin(&config.iot_tenant)?;
    if let Some(url) = &config.iot_hub_url {
        background.push(tokio::spawn(relay::run_relay(
            Arc::new(WebSocketSource::new(url.clone(), config.iot_idle_timeout / 3)),
            iot_group,
            config.relay_timing(),
            cancel.clone(),
        )));
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  iot relay: {}", config.iot_hub_url.as_deref().unwrap_or("disabled"));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let app = api::router(AppState::new(engine, config.iot_tenant.as_str()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping background tasks...");
    cancel.cancel();
    for task in background {
        let _ = task.await;
    }

    info!("slotbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
