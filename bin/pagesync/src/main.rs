mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagesync")]
#[command(about = "Capture browser pages as PDFs and keep chat destinations in sync", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the browser's open pages
    Targets,

    /// Capture a page once and deliver it
    Capture {
        /// Target id (defaults to the active page)
        #[arg(short, long)]
        target: Option<String>,

        /// Destination model (defaults to delivery.defaultModel)
        #[arg(short, long)]
        model: Option<String>,

        /// Requester identity holding the debugging session
        #[arg(long)]
        requester: Option<String>,

        /// Treat as an automatic capture (skipped when unchanged)
        #[arg(long)]
        auto: bool,

        /// Release the debugging session afterwards
        #[arg(long)]
        release: bool,
    },

    /// Keep a page synced until interrupted
    Watch {
        /// Target id (defaults to the active page)
        #[arg(short, long)]
        target: Option<String>,

        /// Destination model (defaults to delivery.defaultModel)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Inspect or collect captures waiting for pickup
    Pending {
        /// Only this target
        #[arg(short, long)]
        target: Option<String>,

        /// Destination model (defaults to delivery.defaultModel)
        #[arg(short, long)]
        model: Option<String>,

        /// Take the pending capture and write it to this path
        #[arg(short, long)]
        out: Option<std::path::PathBuf>,
    },

    /// Show configuration and browser status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration
    Show,
    /// Get a config value by dot path (e.g. capture.navigationTimeoutMs)
    Get {
        key: String,
    },
    /// Set a config value by dot path
    Set {
        key: String,
        value: String,
    },
    /// Reset config to defaults
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Targets => {
            commands::targets::run().await?;
        }
        Commands::Capture {
            target,
            model,
            requester,
            auto,
            release,
        } => {
            commands::capture::run(target, model, requester, auto, release).await?;
        }
        Commands::Watch { target, model } => {
            commands::watch::run(target, model).await?;
        }
        Commands::Pending { target, model, out } => {
            commands::pending::run(target, model, out).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Get { key } => {
                commands::config_cmd::get(&key).await?;
            }
            ConfigCommands::Set { key, value } => {
                commands::config_cmd::set(&key, &value).await?;
            }
            ConfigCommands::Reset { force } => {
                commands::config_cmd::reset(force).await?;
            }
        },
    }

    Ok(())
}
