//! sandboxd entrypoint: CLI parsing, logging setup, and the server loop.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sandboxd::{api, RuntimeConfig};

#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(about = "Sandbox execution runtime: shell sessions, processes, ports, files, and code interpretation")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate configuration, then exit.
    CheckConfig,
}

fn init_tracing(config: &RuntimeConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    match &config.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sandboxd.log".to_string());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout_layer).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RuntimeConfig::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            std::process::exit(2);
        }
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("configuration is valid");
            println!("{}", toml::to_string_pretty(&config).unwrap_or_default());
        }
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let _guard = init_tracing(&config);
            run_serve(config).await;
        }
    }
}

async fn run_serve(config: RuntimeConfig) {
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, sandbox_id = %config.sandbox_id, "starting sandboxd");

    let state = api::state::AppState::new(config);
    let app = api::build_router(state.clone());

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    spawn_cleanup_task(state.clone());

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }

    tracing::info!("shutdown complete");
}

/// Periodically reaps stale port entries and completed process records so
/// long-lived sandboxes don't accumulate unbounded state.
fn spawn_cleanup_task(state: api::state::AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let stale_ports = state.ports.cleanup_stale();
            if !stale_ports.is_empty() {
                tracing::info!(count = stale_ports.len(), "cleaned up stale exposed ports");
            }
            let removed = state.processes.cleanup_completed();
            if removed > 0 {
                tracing::debug!(count = removed, "cleaned up completed process records");
            }
        }
    });
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("initiating graceful shutdown");
}
