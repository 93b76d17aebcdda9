use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LoggingConfig, ServiceConfig};
use ratekeeper::ratelimit::{PolicyFile, QuotaBackend, RateLimiter};

/// Evaluate rate limit decisions for keys read from stdin.
///
/// Each input line is `<key> [tokens]`; each output line is `allow` or `deny`.
#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about)]
struct Args {
    /// Path to the service configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log filter directive, overrides the configured level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Ratekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = Arc::new(RateLimiter::new(config.limiter_options())?);
    limiter.apply_rules(&config.policies)?;
    if let Some(path) = &config.policies_path {
        limiter.apply_policies(&PolicyFile::from_file(path)?)?;
    }
    info!("Rate limiter initialized");

    tokio::select! {
        result = serve_stdin(limiter.clone()) => result?,
        _ = shutdown_signal() => {}
    }

    limiter.shutdown();
    info!("Ratekeeper stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Decisions go to stdout, so logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Answer one decision per input line until stdin closes.
async fn serve_stdin(backend: Arc<dyn QuotaBackend>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        let tokens = match parts.next().map(str::parse::<u64>) {
            None => 1,
            Some(Ok(tokens)) => tokens,
            Some(Err(e)) => {
                warn!(line = %line, error = %e, "Ignoring line with invalid token count");
                stdout.write_all(b"error\n").await?;
                stdout.flush().await?;
                continue;
            }
        };

        let decision: &[u8] = if backend.try_consume(key, tokens).await {
            b"allow\n"
        } else {
            b"deny\n"
        };
        stdout.write_all(decision).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
