//! 规则引擎服务
//!
//! 提供规则集浏览、热更新和评估的 REST API。

use anyhow::Result;
use axum::middleware;
use rule_engine::{RulesEngine, http};
use ruleset_shared::config::AppConfig;
use ruleset_shared::observability::{self, middleware as obs_middleware};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting rule-engine service...");

    let rules_dir = Path::new(&config.rules.dir);
    if !rules_dir.is_dir() {
        warn!("Rules directory {} does not exist, creating it", rules_dir.display());
        std::fs::create_dir_all(rules_dir)?;
    }

    let engine = RulesEngine::from_dir(rules_dir);
    match engine.list_rulesets() {
        Ok(rulesets) => {
            let failed = rulesets.iter().filter(|r| r.is_failed()).count();
            info!(
                "Found {} rulesets in {} ({} failed to load)",
                rulesets.len(),
                rules_dir.display(),
                failed
            );
        }
        Err(e) => warn!("Failed to scan rules directory: {}", e),
    }

    let app = http::router(engine)
        .layer(http::timeout_layer(Duration::from_secs(
            config.server.request_timeout_seconds,
        )))
        .layer(middleware::from_fn(obs_middleware::http_tracing));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
