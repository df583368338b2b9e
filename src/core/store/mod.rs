pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::CostConfig;
use crate::core::models::report::CostReport;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Collection holding one document per report, keyed by report id.
pub const REPORT_COLLECTION: &str = "buildCostReports";
/// Collection holding application configuration documents.
pub const CONFIG_COLLECTION: &str = "configuration";
/// Fixed key of the cost reporting configuration document.
pub const CONFIG_KEY: &str = "cost-reporting-configuration";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("failed to convert document: {0}")]
    Serialization(String),
}

/// What an upsert did. Informational only; both outcomes are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Result of looking a report up by id, where absence is an expected answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLookup {
    Found(Box<CostReport>),
    Missing(String),
}

/// Persistence for cost reports and the cost reporting configuration.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert `report`, or replace the stored report with the same id.
    async fn upsert_report(&self, report: &CostReport) -> Result<UpsertOutcome, StoreError>;

    async fn find_report(&self, id: &str) -> Result<CostReport, StoreError>;

    async fn count_reports(&self) -> Result<u64, StoreError>;

    async fn save_config(&self, config: &CostConfig) -> Result<(), StoreError>;

    async fn find_config(&self) -> Result<CostConfig, StoreError>;

    async fn lookup_report(&self, id: &str) -> Result<ReportLookup, StoreError> {
        match self.find_report(id).await {
            Ok(report) => Ok(ReportLookup::Found(Box::new(report))),
            Err(StoreError::NotFound(_)) => Ok(ReportLookup::Missing(id.to_string())),
            Err(e) => Err(e),
        }
    }
}
