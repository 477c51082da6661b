//! envschedd - environment scheduler daemon

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use envsched_daemon::{DaemonConfig, LoggingConfig, Server};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// envsched daemon CLI
#[derive(Parser)]
#[command(name = "envschedd")]
#[command(about = "Environment scheduler daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon
    Run(RunArgs),

    /// Print the effective configuration as JSON
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file path
    #[arg(short, long, env = "ENVSCHED_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "ENVSCHED_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Log level
    #[arg(long, env = "ENVSCHED_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ENVSCHED_LOG_JSON")]
    json: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, env = "ENVSCHED_CONFIG")]
    config: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log level")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json {
        config.logging.json = true;
    }

    init_tracing(&config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.server.listen_addr,
        runtime_backend = %config.runtime.backend,
        "Starting envsched daemon"
    );

    let server = Server::new(config)
        .await
        .context("failed to start the daemon")?;
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Config(args) => {
            let config = DaemonConfig::load(args.config.as_deref())
                .context("failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
