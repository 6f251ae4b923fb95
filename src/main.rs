use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use garage::garage_config::{DATA_DIR, GarageConfig};
use garage::telemetry::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "garage")]
#[command(version, about = "Garage repair tracking service")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding garage.toml, the database and logs
    #[arg(long, global = true, env = "GARAGE_DATA_DIR", default_value = DATA_DIR)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Address to bind (overrides garage.toml)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides garage.toml)
        #[arg(short, long, env = "GARAGE_PORT")]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Create the data directory, a default garage.toml and the database
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default garage.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, dev } => {
            let config = GarageConfig::with_cli_args(cli.data_dir, host, port, dev)?;
            let _guard = telemetry::init(&LogOptions::from_config(&config, cli.verbose))?;
            for warning in config.validate() {
                tracing::warn!("{}", warning);
            }
            cmd::cmd_serve(config).await?;
        }
        Commands::Init => {
            telemetry::init(&LogOptions::console(cli.verbose))?;
            cmd::cmd_init(&cli.data_dir)?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.data_dir, command)?,
    }

    Ok(())
}
