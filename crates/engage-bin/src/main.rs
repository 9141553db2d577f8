//! Engage CLI - queue tracking requests and deliver them when online.

mod app;
mod listener;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use engage_config_and_utils::{init_logging, Config, Paths};

/// Engage command-line interface.
#[derive(Parser)]
#[command(name = "engage")]
#[command(about = "Queue mobile engagement events and deliver them to the backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Also write logs to stderr
    #[arg(long, global = true)]
    log_stderr: bool,

    /// Base directory for runtime files (database, logs, config). Defaults to ~/.engage
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Only queue requests; do not try to deliver them
    #[arg(long, global = true)]
    offline: bool,

    /// Seconds to wait for the queue to drain before exiting
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Log the contact in
    Login {
        /// Contact field id
        #[arg(long)]
        contact_field_id: i64,
        /// Contact field value
        #[arg(long)]
        contact_field_value: String,
        /// Push token of this installation
        #[arg(long)]
        push_token: Option<String>,
    },
    /// Log the contact out
    Logout,
    /// Track a custom event
    Event {
        /// Event name
        name: String,
        /// Event attribute as key=value (repeatable)
        #[arg(short, long = "attr", value_parser = app::parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Track a notification open
    Open {
        /// Custom data of the notification (the `u` field), e.g. '{"sid":"..."}'
        #[arg(long)]
        custom_data: Option<String>,
    },
    /// Allow an in-app campaign to be shown again
    ClearCampaign {
        /// Campaign id
        campaign_id: String,
    },
    /// Show queued requests and stored identity
    Status,
    /// Deliver queued requests
    Drain,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, Some(paths.log_file()), cli.log_stderr)?;

    let options = app::RunOptions {
        offline: cli.offline,
        drain_timeout: std::time::Duration::from_secs(cli.timeout_secs),
    };

    match cli.command {
        Commands::Login {
            contact_field_id,
            contact_field_value,
            push_token,
        } => {
            app::login(config, &paths, options, contact_field_id, contact_field_value, push_token).await?;
        }
        Commands::Logout => app::logout(config, &paths, options).await?,
        Commands::Event { name, attributes } => {
            app::track_event(config, &paths, options, &name, attributes.into_iter().collect()).await?;
        }
        Commands::Open { custom_data } => {
            app::track_open(config, &paths, options, custom_data).await?;
        }
        Commands::ClearCampaign { campaign_id } => {
            app::clear_campaign(config, &paths, &campaign_id).await?;
        }
        Commands::Status => app::status(config, &paths).await?,
        Commands::Drain => app::drain(config, &paths, options).await?,
    }

    Ok(())
}
