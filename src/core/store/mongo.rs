use async_trait::async_trait;
use mongodb::{
    bson::{doc, from_document, to_document, Document},
    options::{ClientOptions, ReplaceOptions},
    Client, Collection, Database,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::config::CostConfig;
use crate::core::models::report::CostReport;
use crate::core::store::{
    ReportStore, StoreError, UpsertOutcome, CONFIG_COLLECTION, CONFIG_KEY, REPORT_COLLECTION,
};

/// MongoDB-backed report store.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to `uri` and verify the server answers a ping.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        info!(database = %database, "connecting to mongodb");

        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to parse MongoDB URI: {}", e)))?;
        let client = Client::with_options(options)
            .map_err(|e| StoreError::Database(format!("Failed to create MongoDB client: {}", e)))?;
        let db = client.database(database);

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        Ok(Self { db })
    }

    fn reports(&self) -> Collection<Document> {
        self.db.collection(REPORT_COLLECTION)
    }

    fn configuration(&self) -> Collection<Document> {
        self.db.collection(CONFIG_COLLECTION)
    }

    async fn replace_by_id(
        &self,
        collection: Collection<Document>,
        id: &str,
        document: Document,
    ) -> Result<UpsertOutcome, StoreError> {
        let result = collection
            .replace_one(doc! { "_id": id }, document)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to upsert '{}': {}", id, e)))?;
        Ok(if result.upserted_id.is_some() {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Replaced
        })
    }

    async fn find_by_id(
        &self,
        collection: Collection<Document>,
        id: &str,
    ) -> Result<Document, StoreError> {
        let found = collection
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::Database(format!("Failed to find '{}': {}", id, e)))?;
        match found {
            Some(document) => Ok(document),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

/// Serialize `value` and key it by `id`.
fn keyed_document<T: Serialize>(id: &str, value: &T) -> Result<Document, StoreError> {
    let mut document = to_document(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    document.insert("_id", id);
    Ok(document)
}

fn from_stored<T: DeserializeOwned>(mut document: Document) -> Result<T, StoreError> {
    document.remove("_id");
    from_document(document).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Report documents carry the report id only as `_id`.
fn report_document(report: &CostReport) -> Result<Document, StoreError> {
    let mut document = keyed_document(&report.id, report)?;
    document.remove("id");
    Ok(document)
}

fn report_from_stored(mut document: Document) -> Result<CostReport, StoreError> {
    if let Some(id) = document.remove("_id") {
        document.insert("id", id);
    }
    from_document(document).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl ReportStore for MongoStore {
    async fn upsert_report(&self, report: &CostReport) -> Result<UpsertOutcome, StoreError> {
        let document = report_document(report)?;
        let outcome = self.replace_by_id(self.reports(), &report.id, document).await?;
        debug!(id = %report.id, outcome = ?outcome, "upserted cost report");
        Ok(outcome)
    }

    async fn find_report(&self, id: &str) -> Result<CostReport, StoreError> {
        report_from_stored(self.find_by_id(self.reports(), id).await?)
    }

    async fn count_reports(&self) -> Result<u64, StoreError> {
        self.reports()
            .count_documents(doc! {})
            .await
            .map_err(|e| StoreError::Database(format!("Failed to count reports: {}", e)))
    }

    async fn save_config(&self, config: &CostConfig) -> Result<(), StoreError> {
        let document = keyed_document(CONFIG_KEY, config)?;
        let outcome = self
            .replace_by_id(self.configuration(), CONFIG_KEY, document)
            .await?;
        debug!(outcome = ?outcome, "saved cost reporting configuration");
        Ok(())
    }

    async fn find_config(&self) -> Result<CostConfig, StoreError> {
        from_stored(self.find_by_id(self.configuration(), CONFIG_KEY).await?)
    }
}
