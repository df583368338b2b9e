use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::evergreen::client::{ApiError, EvergreenApi};
use crate::core::evergreen::pool::{run_pool, FETCH_WORKERS};
use crate::core::models::distro::DistroCost;
use crate::core::models::report::{EvergreenProjectCost, EvergreenTaskCost, ReportWindow};

/// What a fetch was collecting, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Distro,
    Project,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distro => write!(f, "distro"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// A single failed lookup.
#[derive(Debug)]
pub struct LookupFailure {
    pub id: String,
    pub error: ApiError,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("problem listing {kind} ids from evergreen")]
    Registry {
        kind: FetchKind,
        #[source]
        source: ApiError,
    },
    #[error("{} of {total} {kind} cost lookups failed; first: {}", .failures.len(), describe_first(.failures))]
    Lookup {
        kind: FetchKind,
        total: usize,
        failures: Vec<LookupFailure>,
    },
    #[error("{kind} cost fetch cancelled with {unprocessed} lookups outstanding")]
    Cancelled { kind: FetchKind, unprocessed: usize },
    #[error("{kind} cost fetch lost {unprocessed} lookups to a worker failure")]
    Incomplete { kind: FetchKind, unprocessed: usize },
}

fn describe_first(failures: &[LookupFailure]) -> String {
    match failures.first() {
        Some(f) => format!("{}: {}", f.id, chain(&f.error)),
        None => "none".to_string(),
    }
}

/// Render an error with its source chain on one line.
fn chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

fn shuffled(mut ids: Vec<String>) -> Vec<String> {
    ids.shuffle(&mut rand::thread_rng());
    ids
}

/// Turn a pool outcome into the all-or-nothing result every fetch promises.
fn settle<T>(
    kind: FetchKind,
    total: usize,
    outcome: crate::core::evergreen::pool::PoolOutcome<T, ApiError>,
    cancel: &CancellationToken,
) -> Result<Vec<T>, FetchError> {
    if !outcome.errors.is_empty() {
        let failures: Vec<LookupFailure> = outcome
            .errors
            .into_iter()
            .map(|(id, error)| LookupFailure { id, error })
            .collect();
        return Err(FetchError::Lookup {
            kind,
            total,
            failures,
        });
    }
    if outcome.unprocessed > 0 {
        return Err(if cancel.is_cancelled() {
            FetchError::Cancelled {
                kind,
                unprocessed: outcome.unprocessed,
            }
        } else {
            FetchError::Incomplete {
                kind,
                unprocessed: outcome.unprocessed,
            }
        });
    }
    Ok(outcome.results)
}

/// Retrieves per-distro usage for a window from every known distro.
pub struct DistroCostFetcher {
    api: Arc<dyn EvergreenApi>,
}

impl DistroCostFetcher {
    pub fn new(api: Arc<dyn EvergreenApi>) -> Self {
        Self { api }
    }

    /// Returns the cost of every distro with nonzero usage in `window`, or a
    /// single error if any lookup failed. A partial result set is never
    /// returned.
    pub async fn fetch(
        &self,
        window: &ReportWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<DistroCost>, FetchError> {
        let ids = self
            .api
            .list_distro_ids()
            .await
            .map_err(|source| FetchError::Registry {
                kind: FetchKind::Distro,
                source,
            })?;
        let total = ids.len();
        debug!(distros = total, "fetching distro costs");

        let api = Arc::clone(&self.api);
        let window = *window;
        let outcome = run_pool(shuffled(ids), FETCH_WORKERS, cancel, move |id| {
            let api = Arc::clone(&api);
            async move {
                let result = api.get_distro_cost(&id, &window).await;
                if let Err(e) = &result {
                    warn!(
                        distro = %id,
                        error = %chain(e),
                        "error getting distro cost data from evergreen"
                    );
                }
                result
            }
        })
        .await;

        let costs: Vec<DistroCost> = settle(FetchKind::Distro, total, outcome, cancel)?
            .into_iter()
            .filter(DistroCost::has_usage)
            .collect();
        info!(
            distros = total,
            with_usage = costs.len(),
            "collected distro costs"
        );
        Ok(costs)
    }
}

/// Retrieves per-project task costs for a window.
pub struct ProjectCostFetcher {
    api: Arc<dyn EvergreenApi>,
    projects: Vec<String>,
}

impl ProjectCostFetcher {
    /// `projects` restricts the breakdown; empty means every project.
    pub fn new(api: Arc<dyn EvergreenApi>, projects: Vec<String>) -> Self {
        Self { api, projects }
    }

    /// Returns every project with at least one task in `window`, sorted by
    /// name. Same all-or-nothing policy as the distro fetch.
    pub async fn fetch(
        &self,
        window: &ReportWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvergreenProjectCost>, FetchError> {
        let ids = if self.projects.is_empty() {
            self.api
                .list_project_ids()
                .await
                .map_err(|source| FetchError::Registry {
                    kind: FetchKind::Project,
                    source,
                })?
        } else {
            self.projects.clone()
        };
        let total = ids.len();
        debug!(projects = total, "fetching project costs");

        let api = Arc::clone(&self.api);
        let window = *window;
        let outcome = run_pool(shuffled(ids), FETCH_WORKERS, cancel, move |id| {
            let api = Arc::clone(&api);
            async move {
                match api.get_project_task_costs(&id, &window).await {
                    Ok(tasks) => Ok(EvergreenProjectCost {
                        name: id,
                        tasks: tasks.into_iter().map(EvergreenTaskCost::from).collect(),
                    }),
                    Err(e) => {
                        warn!(
                            project = %id,
                            error = %chain(&e),
                            "error getting project cost data from evergreen"
                        );
                        Err(e)
                    }
                }
            }
        })
        .await;

        let mut projects: Vec<EvergreenProjectCost> =
            settle(FetchKind::Project, total, outcome, cancel)?
                .into_iter()
                .filter(|p| !p.tasks.is_empty())
                .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            projects = total,
            with_tasks = projects.len(),
            "collected project costs"
        );
        Ok(projects)
    }
}
