use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::CostConfig;
use crate::core::formatter::hour_bucket;
use crate::core::queue::{Job, JobQueue, QueueError};
use crate::core::report::{ReportBuilder, ReportRequest};
use crate::core::store::ReportStore;

/// Time between scheduling ticks.
pub const SCHEDULE_INTERVAL: Duration = Duration::from_secs(30 * 60);

const JOB_PREFIX: &str = "brc-";

/// Source of "now" for the scheduler.
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// Job id for the hour bucket containing `now`. Every time within the same
/// hour maps to the same id.
pub fn job_id_for<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}", JOB_PREFIX, hour_bucket(now).to_rfc3339())
}

/// Builds the report for one hour bucket and upserts it under the job id.
pub struct BuildCostReportJob {
    id: String,
    bucket: DateTime<Utc>,
    config: Arc<CostConfig>,
    builder: Arc<ReportBuilder>,
    store: Arc<dyn ReportStore>,
}

impl BuildCostReportJob {
    pub fn new(
        now: &DateTime<FixedOffset>,
        config: Arc<CostConfig>,
        builder: Arc<ReportBuilder>,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            id: job_id_for(now),
            bucket: hour_bucket(now).with_timezone(&Utc),
            config,
            builder,
            store,
        }
    }

    /// The window this job reports on: the `duration` leading up to its bucket.
    pub fn request(&self) -> anyhow::Result<ReportRequest> {
        let duration = self.config.duration_for(None)?;
        let start = self.bucket - chrono::Duration::from_std(duration)?;
        Ok(ReportRequest::new(self.id.clone(), start, Some(duration)))
    }
}

#[async_trait]
impl Job for BuildCostReportJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("job {} cancelled before start", self.id);
        }
        let request = self.request()?;
        let report = self.builder.build(&self.config, request).await?;
        let outcome = self.store.upsert_report(&report).await?;
        info!(
            id = %report.id,
            outcome = ?outcome,
            distros = report.evergreen.distros.len(),
            "saved cost report"
        );
        Ok(())
    }
}

/// Periodically submits one report job per hour bucket.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ReportStore>,
    builder: Arc<ReportBuilder>,
    config: Arc<CostConfig>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ReportStore>,
        builder: Arc<ReportBuilder>,
        config: Arc<CostConfig>,
    ) -> Self {
        Self {
            queue,
            store,
            builder,
            config,
            clock: Arc::new(|| Local::now().fixed_offset()),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Tick until `cancel` fires. The first tick happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SCHEDULE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = SCHEDULE_INTERVAL.as_secs(), "cost report scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cost report scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Submit the job for the current bucket and return its id.
    pub async fn tick(&self) -> String {
        let now = (self.clock)();
        let job = BuildCostReportJob::new(
            &now,
            Arc::clone(&self.config),
            Arc::clone(&self.builder),
            Arc::clone(&self.store),
        );
        let id = job.id().to_string();

        match self.queue.submit(Arc::new(job)).await {
            Ok(()) => info!(job = %id, "submitted cost report job"),
            Err(QueueError::Duplicate(_)) => info!(job = %id, "cost report job already queued"),
            Err(e) => warn!(job = %id, error = %e, "problem enqueuing cost report job"),
        }

        let stats = self.queue.stats().await;
        match self.store.count_reports().await {
            Ok(reports) => info!(job = %id, queue = %stats, reports, "scheduler tick"),
            Err(e) => warn!(job = %id, queue = %stats, error = %e, "problem counting reports"),
        }
        id
    }
}
