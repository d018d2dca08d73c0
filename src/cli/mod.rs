/*
* Container VM Manager Command Line Interface
* -------------------------------------------
*
* Command Structure:
* ---------------
* container-vm-manager
* ├── serve [--port]          // run the API server
* ├── init [--force]          // write config/default.toml with the defaults
* └── config                  // print the effective configuration
*
* Usage Examples:
* -------------
* ```bash
* container-vm-manager init
* APP_SESSION__PASSWORD=... container-vm-manager serve --port 2380
* ```
*/

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "container-vm-manager")]
#[command(about = "Provisions containers as virtual machines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective configuration
    Config,
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::new_from_file(path)?,
        None => Settings::new()?,
    };
    Ok(settings)
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let settings = load_settings(cli.config.as_deref())?;
            let server_port = port.unwrap_or(settings.server.port);
            info!("Starting server on port {}", server_port);
            crate::server::run_server(settings, server_port).await?;
        }
        Commands::Init { force } => handle_init_command(force)?,
        Commands::Config => {
            let mut settings = load_settings(cli.config.as_deref())?;
            if !settings.session.password.is_empty() {
                settings.session.password = "<redacted>".to_string();
            }
            println!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        println!("{} {} already exists", "✗".red(), target.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration written to {}", "✓".green(), target.display());
    Ok(())
}
