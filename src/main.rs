mod cli;
mod core;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::core::config::StoreOptions;

#[derive(Parser)]
#[command(name = "fleetcost", about = "CI fleet cost reporting CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build cost reports
    Cost {
        #[command(subcommand)]
        action: CostAction,
    },
}

#[derive(clap::Args)]
struct DbArgs {
    /// MongoDB connection string
    #[arg(long, default_value = "mongodb://localhost:27017")]
    db_uri: String,

    /// Database name
    #[arg(long, default_value = "fleetcost")]
    db_name: String,
}

impl DbArgs {
    fn store_options(&self, workers: usize) -> StoreOptions {
        StoreOptions {
            uri: self.db_uri.clone(),
            database: self.db_name.clone(),
            workers,
        }
    }
}

#[derive(Subcommand)]
enum CostAction {
    /// Load a cost configuration file into the database
    LoadConfig {
        /// Path to the TOML cost configuration
        #[arg(long)]
        file: PathBuf,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Write the stored cost configuration to a file
    DumpConfig {
        /// Destination path
        #[arg(long)]
        file: PathBuf,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Generate a report every half hour until interrupted
    Collect {
        /// Number of queue workers
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Read the config from a file and keep reports in memory
        #[arg(long)]
        dry_run: bool,
        /// Config file for --dry-run (default: ~/.config/fleetcost/cost.toml)
        #[arg(long, requires = "dry_run")]
        config: Option<PathBuf>,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Build one report and write it to a file
    Write {
        /// Window start: YYYY-MM-DD, YYYY-MM-DDTHH:MM or RFC 3339
        #[arg(long)]
        start: String,
        /// Window length, e.g. 1h or 90m (default: from config)
        #[arg(long)]
        duration: Option<String>,
        /// Path to the cost configuration (default: ~/.config/fleetcost/cost.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a stored report
    Show {
        /// Report id
        #[arg(long)]
        id: String,
        #[command(flatten)]
        db: DbArgs,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_opts = cli::output::OutputOptions {
        format: cli::output::OutputFormat::from_flags(cli.json, cli.format.as_deref()),
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
    };

    match cli.command {
        Commands::Cost { action } => match action {
            CostAction::LoadConfig { file, db } => {
                cli::cost_cmd::load_config(&file, &db.store_options(1), &output_opts).await?
            }
            CostAction::DumpConfig { file, db } => {
                cli::cost_cmd::dump_config(&file, &db.store_options(1), &output_opts).await?
            }
            CostAction::Collect {
                workers,
                dry_run,
                config,
                db,
            } => {
                cli::cost_cmd::collect(&db.store_options(workers), dry_run, config, &output_opts)
                    .await?
            }
            CostAction::Write {
                start,
                duration,
                config,
            } => {
                cli::cost_cmd::write(&start, duration.as_deref(), config, &output_opts).await?
            }
            CostAction::Show { id, db } => {
                cli::cost_cmd::show(&id, &db.store_options(1), &output_opts).await?
            }
        },
    }

    Ok(())
}
