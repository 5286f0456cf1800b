//! API server entry point.

use api::config::{Config, LogFormat};
use api::routes::topups::Ledger;
use ledger::{InMemoryLedger, PostgresLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use topup::LoggingPublisher;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<L: Ledger>(
    config: &Config,
    ledger: L,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state = api::create_default_state(ledger, LoggingPublisher, config.orchestrator());
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder before any saga metrics exist
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the ledger and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let ledger = PostgresLedger::connect(url).await?;
            ledger.run_migrations().await?;
            tracing::info!("using PostgreSQL ledger");
            serve(&config, ledger, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger");
            serve(&config, InMemoryLedger::new(), metrics_handle).await
        }
    }
}
