use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when comparing a provider total against the sum of
/// its services. Summation order differs between collectors.
const COST_TOLERANCE: f64 = 1e-9;

/// The `[begin, begin + duration)` range a report summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub begin: DateTime<Utc>,
    pub duration: std::time::Duration,
}

impl ReportWindow {
    pub fn new(begin: DateTime<Utc>, duration: std::time::Duration) -> Self {
        Self { begin, duration }
    }

    pub fn end(&self) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::MAX);
        self.begin.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A fleet cost report for a single reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub id: String,
    pub report: CostReportMetadata,
    pub evergreen: EvergreenCost,
    pub providers: Vec<CloudProvider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReportMetadata {
    pub generated: DateTime<Utc>,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// CI-side breakdowns of the window. Projects and distros come from
/// separate endpoints and are not expected to cross-foot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvergreenCost {
    pub projects: Vec<EvergreenProjectCost>,
    pub distros: Vec<EvergreenDistroCost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvergreenProjectCost {
    pub name: String,
    pub tasks: Vec<EvergreenTaskCost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvergreenTaskCost {
    pub githash: String,
    pub name: String,
    pub distro: String,
    #[serde(rename = "variant")]
    pub build_variant: String,
    pub seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvergreenDistroCost {
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    pub instance_seconds: i64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudProvider {
    pub name: String,
    pub accounts: Vec<CloudAccount>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAccount {
    pub name: String,
    pub services: Vec<AccountService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountService {
    pub name: String,
    pub items: Vec<ServiceItem>,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub launched: i64,
    #[serde(default)]
    pub terminated: i64,
    #[serde(default)]
    pub fixed_price: f64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub avg_uptime: f64,
    #[serde(default)]
    pub total_hours: i64,
}

impl CloudAccount {
    /// Accounts carry no cost of their own; this is the sum of their services.
    pub fn cost(&self) -> f64 {
        self.services.iter().map(|s| s.cost).sum()
    }
}

impl CloudProvider {
    /// Sum of every service cost under every account.
    pub fn services_total(&self) -> f64 {
        self.accounts.iter().map(CloudAccount::cost).sum()
    }

    /// Whether `cost` matches the sum of its services.
    pub fn is_consistent(&self) -> bool {
        let total = self.services_total();
        let scale = self.cost.abs().max(total.abs()).max(1.0);
        (self.cost - total).abs() <= COST_TOLERANCE * scale
    }
}

impl CostReport {
    /// Total billed cost across all providers.
    pub fn total_cost(&self) -> f64 {
        self.providers.iter().map(|p| p.cost).sum()
    }

    /// Total instance seconds across all distros.
    pub fn distro_seconds(&self) -> i64 {
        self.evergreen.distros.iter().map(|d| d.instance_seconds).sum()
    }

    pub fn window(&self) -> chrono::Duration {
        self.report.end - self.report.begin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, cost: f64) -> AccountService {
        AccountService {
            name: name.to_string(),
            items: Vec::new(),
            cost,
        }
    }

    fn provider(cost: f64) -> CloudProvider {
        CloudProvider {
            name: "aws".to_string(),
            accounts: vec![
                CloudAccount {
                    name: "prod".to_string(),
                    services: vec![service("ec2", 10.5), service("ebs", 2.25)],
                },
                CloudAccount {
                    name: "dev".to_string(),
                    services: vec![service("ec2", 1.25)],
                },
            ],
            cost,
        }
    }

    #[test]
    fn task_variant_serializes_under_short_key() {
        let task = EvergreenTaskCost {
            githash: "abc".to_string(),
            name: "compile".to_string(),
            distro: "d".to_string(),
            build_variant: "linux-64".to_string(),
            seconds: 30,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["variant"], "linux-64");
        assert!(value.get("build_variant").is_none());
        assert_eq!(serde_json::from_value::<EvergreenTaskCost>(value).unwrap(), task);
    }

    #[test]
    fn account_cost_sums_services() {
        let p = provider(14.0);
        assert!((p.accounts[0].cost() - 12.75).abs() < 1e-12);
        assert!((p.accounts[1].cost() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn provider_consistent_when_total_matches() {
        assert!(provider(14.0).is_consistent());
    }

    #[test]
    fn provider_inconsistent_when_total_differs() {
        assert!(!provider(15.0).is_consistent());
    }

    #[test]
    fn empty_provider_is_consistent_at_zero() {
        let p = CloudProvider {
            name: "gcp".to_string(),
            accounts: Vec::new(),
            cost: 0.0,
        };
        assert!(p.is_consistent());
    }

    #[test]
    fn service_item_uses_type_key() {
        let item = ServiceItem {
            name: "c5.xlarge".to_string(),
            item_type: "reserved".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "reserved");
        assert!(json.get("item_type").is_none());
    }

    #[test]
    fn distro_row_omits_missing_instance_type() {
        let row = EvergreenDistroCost {
            name: "ubuntu1804".to_string(),
            provider: "static".to_string(),
            instance_type: None,
            instance_seconds: 30,
            estimated_cost: 0.0,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("instance_type").is_none());
    }
}
