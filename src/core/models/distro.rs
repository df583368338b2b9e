use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::core::models::report::{EvergreenDistroCost, EvergreenTaskCost};

/// Entry of the `/distros` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distro {
    #[serde(rename = "_id")]
    pub distro_id: String,
}

/// Entry of the `/projects` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub identifier: String,
}

/// Usage and estimated cost of one distro over a window, as reported by
/// `/cost/distro/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistroCost {
    pub distro_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Nanoseconds on the wire.
    #[serde(with = "nanos", default)]
    pub sum_time_taken: Duration,
    #[serde(default)]
    pub sum_estimated_cost: f64,
}

impl DistroCost {
    pub fn has_usage(&self) -> bool {
        !self.sum_time_taken.is_zero()
    }
}

impl From<DistroCost> for EvergreenDistroCost {
    fn from(cost: DistroCost) -> Self {
        Self {
            name: cost.distro_id,
            provider: cost.provider,
            instance_type: cost.instance_type.filter(|t| !t.is_empty()),
            instance_seconds: whole_seconds_up(cost.sum_time_taken),
            estimated_cost: cost.sum_estimated_cost,
        }
    }
}

/// Partial seconds round up, so a distro with any usage never reports 0s.
fn whole_seconds_up(d: Duration) -> i64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.min(i64::MAX as u64) as i64
}

/// One task row of `/cost/project/{id}/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskCost {
    #[serde(default)]
    pub githash: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub distro: String,
    #[serde(default)]
    pub build_variant: String,
    /// Nanoseconds; the API may report negative values for clock-skewed hosts.
    #[serde(default)]
    pub time_taken: i64,
}

impl From<TaskCost> for EvergreenTaskCost {
    fn from(task: TaskCost) -> Self {
        Self {
            githash: task.githash,
            name: task.display_name,
            distro: task.distro,
            build_variant: task.build_variant,
            seconds: task.time_taken.max(0) / 1_000_000_000,
        }
    }
}

mod nanos {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.as_nanos().min(i64::MAX as u128) as i64)
    }

    /// Negative values collapse to zero, which the fetcher treats as no usage.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = i64::deserialize(d)?;
        Ok(Duration::from_nanos(raw.max(0) as u64))
    }
}
