pub mod collector;
pub mod pricing;

pub use collector::{BillingCollector, BillingError, ConfigBillingCollector};
