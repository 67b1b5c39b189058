//! Courier - in-memory message broker with credit-based delivery.

mod app;
mod cli;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier_config_and_utils::{init_logging, Config, Paths};
use courier_protocol_types::LATEST_PER_AGENT_VIEW;

/// Courier command-line interface.
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "In-memory message broker with credit-based delivery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (socket, logs, config). Defaults to ~/.courier
    #[arg(long, global = true, env = "COURIER_BASE_DIR")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker in the foreground
    Start,
    /// Stop a running broker
    Stop,
    /// Check broker status
    Status,
    /// Enqueue one envelope
    Enqueue {
        /// Destination stream
        #[arg(long)]
        to: String,
        /// Envelope type
        #[arg(long = "type")]
        envelope_type: String,
        /// Envelope id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Origin address
        #[arg(long)]
        from: Option<String>,
        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Subscribe to a stream and print deliveries
    Subscribe {
        #[arg(long)]
        stream: String,
        /// Credit window kept open while consuming
        #[arg(long, default_value_t = 1)]
        credit: u32,
        /// Exit after this many deliveries
        #[arg(long)]
        count: Option<usize>,
        /// Leave deliveries unacknowledged
        #[arg(long)]
        no_ack: bool,
    },
    /// Print stats for one stream
    Stats {
        #[arg(long)]
        stream: String,
    },
    /// Print a view snapshot
    Snapshot {
        #[arg(long, default_value = LATEST_PER_AGENT_VIEW)]
        view: String,
    },
    /// Print stats for every stream
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let command = cli.command.unwrap_or(Commands::Start);
    let foreground = matches!(command, Commands::Start);
    if let Err(e) = init_logging(&paths, "courier", &config.log_level, foreground) {
        eprintln!("Logging disabled: {}", e);
    }

    match command {
        Commands::Start => app::run_broker(config, paths).await?,
        Commands::Stop => app::stop_broker(&paths).await?,
        Commands::Status => app::check_status(&paths).await?,
        Commands::Enqueue {
            to,
            envelope_type,
            id,
            payload,
            from,
            tags,
        } => {
            let request = cli::EnqueueRequest {
                to,
                envelope_type,
                id,
                payload,
                from,
                tags,
            };
            cli::enqueue(&paths, request).await?
        }
        Commands::Subscribe {
            stream,
            credit,
            count,
            no_ack,
        } => cli::subscribe(&paths, &stream, credit, count, !no_ack).await?,
        Commands::Stats { stream } => cli::stats(&paths, &stream).await?,
        Commands::Snapshot { view } => cli::snapshot(&paths, &view).await?,
        Commands::Metrics => cli::metrics(&paths).await?,
    }

    Ok(())
}
