use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::billing::pricing::{price_provider, HourlyPricer, ItemPricer};
use crate::core::config::CostConfig;
use crate::core::models::report::{CloudProvider, ReportWindow};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("invalid billing data for provider '{provider}': {reason}")]
    InvalidProvider { provider: String, reason: String },
}

/// Produces priced provider trees for a reporting window.
#[async_trait]
pub trait BillingCollector: Send + Sync {
    async fn collect(
        &self,
        window: &ReportWindow,
        config: &CostConfig,
    ) -> Result<Vec<CloudProvider>, BillingError>;
}

/// Prices the line items an operator lists under `[[providers]]` in the cost
/// config. The items already describe the window, so the window itself is
/// only used for logging.
pub struct ConfigBillingCollector {
    pricer: Arc<dyn ItemPricer>,
}

impl ConfigBillingCollector {
    pub fn new(pricer: Arc<dyn ItemPricer>) -> Self {
        Self { pricer }
    }
}

impl Default for ConfigBillingCollector {
    fn default() -> Self {
        Self::new(Arc::new(HourlyPricer))
    }
}

#[async_trait]
impl BillingCollector for ConfigBillingCollector {
    async fn collect(
        &self,
        window: &ReportWindow,
        config: &CostConfig,
    ) -> Result<Vec<CloudProvider>, BillingError> {
        let mut providers = Vec::with_capacity(config.providers.len());
        for provider in &config.providers {
            if provider.name.trim().is_empty() {
                return Err(BillingError::InvalidProvider {
                    provider: provider.name.clone(),
                    reason: "provider name is empty".to_string(),
                });
            }
            let priced = price_provider(provider, self.pricer.as_ref());
            debug!(
                provider = %priced.name,
                accounts = priced.accounts.len(),
                cost = priced.cost,
                begin = %window.begin,
                "priced provider billing tree"
            );
            providers.push(priced);
        }
        Ok(providers)
    }
}
