use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::billing::ConfigBillingCollector;
use crate::core::config::{CostConfig, StoreOptions};
use crate::core::evergreen::EvergreenClient;
use crate::core::formatter::{
    format_file_stamp, format_go_duration, parse_go_duration, parse_start_time,
};
use crate::core::models::report::CostReport;
use crate::core::queue::{JobQueue, LocalQueue};
use crate::core::report::{write_report, ReportBuilder, ReportRequest};
use crate::core::scheduler::Scheduler;
use crate::core::store::{MemoryStore, MongoStore, ReportLookup, ReportStore};

/// Load a cost config file into the report store.
pub async fn load_config(file: &Path, store: &StoreOptions, _opts: &OutputOptions) -> Result<()> {
    let config = CostConfig::load(file)
        .with_context(|| format!("problem loading cost configuration from {}", file.display()))?;
    check_issues(&config, file)?;

    let store = connect(store).await?;
    store
        .save_config(&config)
        .await
        .context("problem saving cost reporting configuration")?;

    println!("Loaded cost reporting configuration from {}", file.display());
    let count = config.providers.len();
    println!(
        "  {} provider{} configured",
        count,
        if count == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Write the stored cost config to a TOML file.
pub async fn dump_config(file: &Path, store: &StoreOptions, _opts: &OutputOptions) -> Result<()> {
    let store = connect(store).await?;
    let config = store
        .find_config()
        .await
        .context("problem getting cost reporting configuration")?;
    config
        .save(file)
        .with_context(|| format!("problem writing cost configuration to {}", file.display()))?;
    println!("Wrote cost reporting configuration to {}", file.display());
    Ok(())
}

/// Schedule report builds until interrupted. A dry run reads the config
/// from a file and keeps reports in memory instead of the database.
pub async fn collect(
    store_opts: &StoreOptions,
    dry_run: bool,
    config_path: Option<PathBuf>,
    _opts: &OutputOptions,
) -> Result<()> {
    store_opts.validate()?;
    let (store, config): (Arc<dyn ReportStore>, CostConfig) = if dry_run {
        let path = config_path.unwrap_or_else(CostConfig::config_path);
        let config = CostConfig::load(&path).with_context(|| {
            format!("problem loading cost configuration from {}", path.display())
        })?;
        check_issues(&config, &path)?;
        (Arc::new(MemoryStore::new()), config)
    } else {
        let store = connect(store_opts).await?;
        let config = store
            .find_config()
            .await
            .context("problem getting cost reporting configuration")?;
        check_issues(&config, Path::new("<stored configuration>"))?;
        (Arc::new(store), config)
    };

    eprintln!("Collecting cost reports every 30 minutes. Press Ctrl-C to stop.");
    let built = run_collection(store, config, store_opts.workers, cancel_on_ctrl_c()).await?;
    if dry_run {
        eprintln!("Collection terminated. {} report(s) built, none saved.", built);
    } else {
        eprintln!("Collection terminated.");
    }
    Ok(())
}

/// Build one report and export it to a file.
pub async fn write(
    start: &str,
    duration: Option<&str>,
    config_path: Option<PathBuf>,
    opts: &OutputOptions,
) -> Result<()> {
    let start =
        parse_start_time(start).with_context(|| format!("problem parsing time from {}", start))?;
    let explicit = match duration {
        Some(d) => Some(
            parse_go_duration(d).with_context(|| format!("problem parsing duration from {}", d))?,
        ),
        None => None,
    };
    let path = config_path.unwrap_or_else(CostConfig::config_path);
    let config = CostConfig::load(&path)
        .with_context(|| format!("problem loading cost configuration from {}", path.display()))?;
    check_issues(&config, &path)?;

    let (report, file) = build_and_write(&config, start, explicit, cancel_on_ctrl_c()).await?;

    match opts.format {
        OutputFormat::Text => {
            println!("{}", renderer::render_report(&report, opts.use_color));
            println!();
            println!("Wrote report to {}", file.display());
        }
        OutputFormat::Json => println!("{}", opts.to_json(&report)?),
    }
    Ok(())
}

/// Print a stored report.
pub async fn show(id: &str, store: &StoreOptions, opts: &OutputOptions) -> Result<()> {
    let store = connect(store).await?;
    let lookup = store
        .lookup_report(id)
        .await
        .with_context(|| format!("problem finding report {}", id))?;

    match lookup {
        ReportLookup::Found(report) => match opts.format {
            OutputFormat::Text => println!("{}", renderer::render_report(&report, opts.use_color)),
            OutputFormat::Json => println!("{}", opts.to_json(&report)?),
        },
        ReportLookup::Missing(id) => eprintln!("No cost report with id {}", id),
    }
    Ok(())
}

async fn build_and_write(
    config: &CostConfig,
    start: chrono::DateTime<chrono::Utc>,
    explicit: Option<Duration>,
    cancel: CancellationToken,
) -> Result<(CostReport, PathBuf)> {
    let duration = config.duration_for(explicit).context("problem with duration")?;
    let api =
        EvergreenClient::new(&config.evergreen).context("problem configuring evergreen client")?;
    let builder = ReportBuilder::new(Arc::new(api), Arc::new(ConfigBillingCollector::default()))
        .with_cancellation(cancel);

    let id = format!("{}.{}", format_file_stamp(&start), format_go_duration(duration));
    let report = builder
        .build(config, ReportRequest::new(id, start, Some(duration)))
        .await
        .context("problem generating report")?;
    let file = write_report(config, &report, duration).context("problem writing cost report")?;
    Ok((report, file))
}

/// Run the scheduler until `cancel` fires and return how many reports the
/// store holds afterwards.
async fn run_collection(
    store: Arc<dyn ReportStore>,
    config: CostConfig,
    workers: usize,
    cancel: CancellationToken,
) -> Result<u64> {
    let api =
        EvergreenClient::new(&config.evergreen).context("problem configuring evergreen client")?;
    let builder = ReportBuilder::new(Arc::new(api), Arc::new(ConfigBillingCollector::default()))
        .with_cancellation(cancel.clone());

    let queue = Arc::new(LocalQueue::new(workers)?);
    queue
        .start(cancel.clone())
        .await
        .context("problem starting queue")?;

    Scheduler::new(queue, Arc::clone(&store), Arc::new(builder), Arc::new(config))
        .run(cancel)
        .await;
    store.count_reports().await.context("problem counting reports")
}

async fn connect(opts: &StoreOptions) -> Result<MongoStore> {
    opts.validate()?;
    MongoStore::connect(&opts.uri, &opts.database)
        .await
        .context("problem connecting to report store")
}

fn check_issues(config: &CostConfig, source: &Path) -> Result<()> {
    let issues = config.validate();
    if issues.is_empty() {
        return Ok(());
    }
    eprintln!("Config issues found in {}:", source.display());
    for issue in &issues {
        eprintln!("  - {}", issue);
    }
    bail!("invalid cost configuration in {}", source.display())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}
