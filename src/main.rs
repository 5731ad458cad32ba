use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use url_monitor::db::UrlStore;
use url_monitor::monitor::{HttpProber, Scheduler};
use url_monitor::server::ServerConfig;
use url_monitor::services::MonitorService;
use url_monitor::version::VERSION;
use url_monitor::web::create_axum_router;

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Periodic URL health monitor with a REST API", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "url-monitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(version = VERSION, "Starting url-monitor.");

    let store = match UrlStore::open(&config.data_file).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(path = %config.data_file, error = %e, "Failed to open target registry.");
            return Err(e.into());
        }
    };

    let prober = Arc::new(HttpProber::new(config.probe_timeout(), &config.user_agent)?);
    info!(
        timeout_ms = prober.timeout().as_millis() as u64,
        max_concurrent = config.max_concurrent_probes,
        "HTTP prober ready."
    );
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        config.max_concurrent_probes,
    ));
    let monitor_service = Arc::new(MonitorService::new(store, scheduler));
    monitor_service.resume().await;

    let app = create_axum_router(monitor_service.clone());

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Active flags stay set so schedules resume on the next start.
    monitor_service.shutdown().await;
    info!("Server stopped.");
    Ok(())
}
