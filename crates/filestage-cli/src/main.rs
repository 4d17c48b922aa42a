use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use filestage_core::config::LogFormat;
use filestage_core::{Config, Result};

#[derive(Parser)]
#[command(name = "filestage")]
#[command(about = "Asynchronous file download job service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,
    },

    /// Print the resolved configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load(path.to_str().unwrap())?,
        None => Config::from_env()?,
    };

    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    init_logging(&config);

    info!(
        "starting filestage-cli v{} (backend: {:?})",
        filestage_core::VERSION,
        config.storage.backend
    );

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            filestage_api::run(config).await?;
        }

        Commands::Config => {
            println!(
                "Configuration loaded from: {}",
                cli.config
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "environment".to_string())
            );
            println!("{:#?}", config);
        }
    }

    Ok(())
}

fn init_logging(config: &filestage_core::Config) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::parse_from(["filestage", "serve"]);
        assert!(matches!(cli.command, Commands::Serve { .. }));
    }

    #[test]
    fn parses_serve_with_overrides() {
        let cli = Cli::parse_from(["filestage", "serve", "--host", "127.0.0.1", "--port", "9090"]);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9090));
            }
            _ => panic!("expected Serve command"),
        }
    }
}
