use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::info;

use cortex_channels::{NotificationService, TelegramCommandHandler};
use cortex_pipeline::IntentPipeline;
use cortex_scheduler::{build_registry, Scheduler};
use cortex_store::{ConfigManager, Store};

mod app;
mod http;
mod notify;

#[derive(Parser)]
#[command(name = "cortex-gateway", about = "Second-brain back end")]
struct Cli {
    /// Path to cortex.toml (default: ~/.cortex/cortex.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cortex_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cortex_core::CortexConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        cortex_core::CortexConfig::default()
    });

    let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database.path.clone());
    let store = Store::open(&db_path)?;
    let settings = Arc::new(ConfigManager::new(store.clone()));
    let tz: chrono_tz::Tz = settings
        .timezone()
        .parse()
        .unwrap_or(chrono_tz::Europe::Berlin);

    let notifier = Arc::new(NotificationService::new(store.clone(), "gateway"));
    let web_notifications = Arc::new(DashMap::new());
    let pipeline_notifier = Arc::new(notify::GatewayNotifier::new(
        Arc::clone(&notifier),
        Arc::clone(&web_notifications),
    ));

    let pipeline = Arc::new(IntentPipeline::new(
        store.clone(),
        config.pipeline.clone(),
        Arc::clone(&settings),
        pipeline_notifier,
    )?);

    let registry = build_registry(store.clone(), tz);
    let scheduler = Scheduler::new(
        store.clone(),
        registry,
        tz,
        Duration::from_secs(config.scheduler.tick_secs),
        Duration::from_secs(config.scheduler.shutdown_grace_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let commands = TelegramCommandHandler::new(store.clone(), Arc::clone(&pipeline), tz);

    let state = Arc::new(app::AppState {
        config: config.clone(),
        store,
        settings,
        pipeline,
        scheduler,
        notifier,
        commands,
        web_notifications,
    });
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("cortex gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the scheduler and give running jobs their grace period.
    let _ = shutdown_tx.send(true);
    let _ = engine.await;

    Ok(())
}
