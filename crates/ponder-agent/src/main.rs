//! ponder - run the cognitive agent on the console.

use ponder_agent::{collaborators, spawn_printer, spawn_stdin_adapter, QUIT_COMMAND};
use ponder_core::config::default_data_dir;
use ponder_core::{AgentConfig, AgentRuntime};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `PONDER_CONFIG` file if set, else defaults; env vars override either way.
fn load_config() -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let mut config = match std::env::var("PONDER_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            let mut config = AgentConfig::from_file(&path)?;
            config.apply_env();
            config
        }
        Err(_) => AgentConfig::from_env(),
    };
    if config.runtime.db_path.is_none() {
        config.runtime.db_path = Some(default_data_dir().join("ponder.db"));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("ponder_core=debug".parse()?),
        )
        .init();

    let config = load_config()?;
    if let Some(path) = &config.runtime.db_path {
        info!("State database: {}", path.display());
    }

    let mut runtime = AgentRuntime::new(config, collaborators()).await?;
    let printer = spawn_printer(runtime.subscribe());
    runtime.start().await?;

    let stop = CancellationToken::new();
    let input = spawn_stdin_adapter(runtime.buffer(), stop.clone());
    info!(
        "ponder is listening. Type a message, /clock, /echo <text> or {}",
        QUIT_COMMAND
    );

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received, stopping agent..."),
        _ = stop.cancelled() => info!("Quit requested, stopping agent..."),
    }
    stop.cancel();

    match input.await {
        Ok(n) => info!("Forwarded {} console messages", n),
        Err(e) => warn!("Console adapter ended abnormally: {}", e),
    }

    if let Some(stats) = runtime.shutdown().await? {
        info!(
            "Ran {} cycles: {} thoughts, {} responses",
            stats.total, stats.thoughts, stats.responses
        );
    }
    printer.abort();

    info!("Agent stopped cleanly");
    Ok(())
}
