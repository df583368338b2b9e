use crate::core::config::{ProviderConfig, ServiceConfig};
use crate::core::models::report::{AccountService, CloudAccount, CloudProvider, ServiceItem};

/// Prices one billing line item. Implementations must be pure: the same item
/// always yields the same cost.
pub trait ItemPricer: Send + Sync {
    fn item_cost(&self, item: &ServiceItem) -> f64;
}

/// Default pricing: the fixed (upfront) price plus the average hourly price
/// for every billed hour.
#[derive(Debug, Clone, Copy, Default)]
pub struct HourlyPricer;

impl ItemPricer for HourlyPricer {
    fn item_cost(&self, item: &ServiceItem) -> f64 {
        item.fixed_price + item.avg_price * item.total_hours as f64
    }
}

impl<F> ItemPricer for F
where
    F: Fn(&ServiceItem) -> f64 + Send + Sync,
{
    fn item_cost(&self, item: &ServiceItem) -> f64 {
        self(item)
    }
}

/// Price a service from its items.
pub fn price_service(service: &ServiceConfig, pricer: &dyn ItemPricer) -> AccountService {
    let cost = service.items.iter().map(|i| pricer.item_cost(i)).sum();
    AccountService {
        name: service.name.clone(),
        items: service.items.clone(),
        cost,
    }
}

/// Build a priced provider tree. The provider total is the sum of every
/// service cost, so the result always satisfies `CloudProvider::is_consistent`.
pub fn price_provider(provider: &ProviderConfig, pricer: &dyn ItemPricer) -> CloudProvider {
    let accounts: Vec<CloudAccount> = provider
        .accounts
        .iter()
        .map(|a| CloudAccount {
            name: a.name.clone(),
            services: a.services.iter().map(|s| price_service(s, pricer)).collect(),
        })
        .collect();
    let cost = accounts.iter().map(CloudAccount::cost).sum();
    CloudProvider {
        name: provider.name.clone(),
        accounts,
        cost,
    }
}
