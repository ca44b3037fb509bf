use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dzapd::error::WipeError;
use dzapd::{config::AppConfig, context::AppContext, logging, service::ServiceManager, web};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dzapd")]
#[command(about = "Verifiable media sanitization daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the HTTP port
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        json_logs: bool,
        /// Replay scripted fixtures instead of touching real hardware
        #[arg(long)]
        simulation: bool,
    },
    /// Install and start the systemd service
    Install {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            config,
            port,
            verbose,
            json_logs,
            simulation,
        } => {
            let mut app_config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            if let Some(port) = port {
                app_config.http_port = port;
            }
            app_config.verbose |= verbose;
            app_config.json_logs |= json_logs;
            app_config.simulation |= simulation;

            run_daemon(app_config).await
        }
        Commands::Install { config } => {
            let app_config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            ServiceManager::new()
                .install_and_start(&app_config)
                .context("Failed to install service")?;
            println!("dzapd installed and started");
            Ok(())
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    // Raw block-device writes and firmware commands need root; refuse
    // to start without it. Simulation replays fixtures and is exempt.
    if !config.simulation && !nix::unistd::Uid::effective().is_root() {
        return Err(WipeError::Privilege).context("run with sudo");
    }

    let bind_addr = SocketAddr::from(([127, 0, 0, 1], config.http_port));
    let ctx = AppContext::new(config);

    web::WebServer::new(ctx, bind_addr)
        .start()
        .await
        .context("Failed to start server")
}
