use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::billing::{BillingCollector, BillingError};
use crate::core::config::{ConfigError, CostConfig};
use crate::core::evergreen::{DistroCostFetcher, EvergreenApi, FetchError, ProjectCostFetcher};
use crate::core::models::report::{
    CostReport, CostReportMetadata, EvergreenCost, EvergreenDistroCost, ReportWindow,
};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("problem resolving report window")]
    Config(#[from] ConfigError),
    #[error("problem fetching distro costs")]
    Distros(#[source] FetchError),
    #[error("problem fetching project costs")]
    Projects(#[source] FetchError),
    #[error("problem collecting billing data")]
    Billing(#[from] BillingError),
    #[error("provider '{provider}' reports cost {cost} but its services sum to {services}")]
    InconsistentProvider {
        provider: String,
        cost: f64,
        services: f64,
    },
}

/// Identity and window of the report to build.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub id: String,
    pub start: DateTime<Utc>,
    /// `None` or zero falls back to the configured duration.
    pub duration: Option<Duration>,
}

impl ReportRequest {
    pub fn new(id: impl Into<String>, start: DateTime<Utc>, duration: Option<Duration>) -> Self {
        Self {
            id: id.into(),
            start,
            duration,
        }
    }
}

/// Assembles a `CostReport` from the CI API and the billing collector.
pub struct ReportBuilder {
    api: Arc<dyn EvergreenApi>,
    billing: Arc<dyn BillingCollector>,
    cancel: CancellationToken,
}

impl ReportBuilder {
    pub fn new(api: Arc<dyn EvergreenApi>, billing: Arc<dyn BillingCollector>) -> Self {
        Self {
            api,
            billing,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight fetches when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the report for `request`. Every sub-fetch must succeed; there is
    /// no partially populated result.
    pub async fn build(
        &self,
        config: &CostConfig,
        request: ReportRequest,
    ) -> Result<CostReport, BuildError> {
        let duration = config.duration_for(request.duration)?;
        let window = ReportWindow::new(request.start, duration);
        info!(
            id = %request.id,
            begin = %window.begin,
            end = %window.end(),
            "building cost report"
        );

        let distro_fetcher = DistroCostFetcher::new(Arc::clone(&self.api));
        let project_fetcher =
            ProjectCostFetcher::new(Arc::clone(&self.api), config.evergreen.projects.clone());

        let (distros, projects, providers) = tokio::try_join!(
            async {
                distro_fetcher
                    .fetch(&window, &self.cancel)
                    .await
                    .map_err(BuildError::Distros)
            },
            async {
                project_fetcher
                    .fetch(&window, &self.cancel)
                    .await
                    .map_err(BuildError::Projects)
            },
            async {
                self.billing
                    .collect(&window, config)
                    .await
                    .map_err(BuildError::from)
            },
        )?;

        if let Some(p) = providers.iter().find(|p| !p.is_consistent()) {
            return Err(BuildError::InconsistentProvider {
                provider: p.name.clone(),
                cost: p.cost,
                services: p.services_total(),
            });
        }

        let mut distros: Vec<EvergreenDistroCost> =
            distros.into_iter().map(EvergreenDistroCost::from).collect();
        distros.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            distros = distros.len(),
            projects = projects.len(),
            providers = providers.len(),
            "assembled report sections"
        );

        Ok(CostReport {
            id: request.id,
            report: CostReportMetadata {
                generated: Utc::now(),
                begin: window.begin,
                end: window.end(),
            },
            evergreen: EvergreenCost { projects, distros },
            providers,
        })
    }
}
