use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::config::CostConfig;
use crate::core::models::report::CostReport;
use crate::core::store::{ReportStore, StoreError, UpsertOutcome, CONFIG_KEY};

/// In-process store with the same contract as the database store.
#[derive(Default)]
pub struct MemoryStore {
    reports: RwLock<HashMap<String, CostReport>>,
    config: RwLock<Option<CostConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn upsert_report(&self, report: &CostReport) -> Result<UpsertOutcome, StoreError> {
        let mut reports = self.reports.write().await;
        match reports.insert(report.id.clone(), report.clone()) {
            Some(_) => Ok(UpsertOutcome::Replaced),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn find_report(&self, id: &str) -> Result<CostReport, StoreError> {
        self.reports
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn count_reports(&self) -> Result<u64, StoreError> {
        Ok(self.reports.read().await.len() as u64)
    }

    async fn save_config(&self, config: &CostConfig) -> Result<(), StoreError> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn find_config(&self) -> Result<CostConfig, StoreError> {
        self.config
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::NotFound(CONFIG_KEY.to_string()))
    }
}
