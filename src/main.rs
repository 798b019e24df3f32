//! # Conveyor Server
//!
//! Single-process deployment of the conveyor system: the web API, the
//! orchestration loop, and the in-process compute backend, all over one
//! connection pool.
//!
//! ## Usage
//!
//! ```bash
//! # Apply migrations, then serve
//! conveyor migrate
//! conveyor serve
//!
//! # Configuration comes from CONVEYOR_CONFIG (TOML) plus CONVEYOR__*
//! # environment overrides; DATABASE_URL alone is enough to start.
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conveyor_orchestration::web::{self, AppState};
use conveyor_orchestration::OrchestrationLoop;
use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::database;
use conveyor_shared::events::EventRelay;
use conveyor_worker::{InProcessBackend, WebhookSender};

#[derive(Debug, Parser)]
#[command(name = "conveyor", version, about = "Batch enrichment orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web API and orchestration loop
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = ConveyorConfig::load()?;
    let pool = database::connect(&config.database).await?;

    match cli.command {
        Command::Migrate => {
            database::migrate(&pool).await?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Serve => serve(config, pool).await,
    }
}

async fn serve(config: ConveyorConfig, pool: sqlx::PgPool) -> anyhow::Result<()> {
    database::migrate(&pool).await?;

    let relay = EventRelay::new(pool.clone(), config.relay.clone());

    // The webhook sender handles every ASYNC registry entry whose sender_fn
    // is "send_webhook"; SYNC workers are deployment-specific registrations.
    let backend = Arc::new(
        InProcessBackend::new(pool.clone(), relay.clone())
            .register(Arc::new(WebhookSender::new("send_webhook"))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestration = OrchestrationLoop::new(pool.clone(), backend, config.clone());
    let loop_handle = tokio::spawn(orchestration.run(shutdown_rx));

    let state = AppState::new(pool, relay);
    let listener = tokio::net::TcpListener::bind(&config.web.bind).await?;
    info!(bind = %config.web.bind, version = env!("CARGO_PKG_VERSION"), "Conveyor server listening");

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping orchestration loop");
    shutdown_tx.send(true).ok();
    loop_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
