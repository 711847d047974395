//! Bounded summary statistics folded while walking resource lists.
//!
//! Every stat follows the same life cycle within a collection pass: one
//! `update` per observed unit, ratios pushed by the caller into a side list
//! of the same length, and a single `update_avg` once the walk is done.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::units;

pub const UNKNOWN_LABEL: &str = "(unknown)";

/// Occurrence count per label value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelCount(BTreeMap<String, i64>);

impl LabelCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, label: &str) {
        self.add(label, 1);
    }

    pub fn add(&mut self, label: &str, count: i64) {
        let label = if label.is_empty() { UNKNOWN_LABEL } else { label };
        *self.0.entry(label.to_string()).or_insert(0) += count;
    }

    pub fn get(&self, label: &str) -> i64 {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, i64); N]> for LabelCount {
    fn from(entries: [(&str, i64); N]) -> Self {
        let mut out = LabelCount::new();
        for (label, count) in entries {
            out.add(label, count);
        }
        out
    }
}

/// Mean of the samples; an empty slice averages to `0.0`.
pub fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Half-up rounding of a non-negative ratio.
pub fn round(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn clamp(min: i64, value: i64, max: i64) -> i64 {
    value.min(max).max(min)
}

/// `0` means "unset": it never wins against a real value and is always
/// replaced by the candidate.
pub fn min_but_not_zero(current: i64, candidate: i64) -> i64 {
    if current == 0 || (candidate != 0 && candidate < current) {
        candidate
    } else {
        current
    }
}

fn percent_avg(samples: &[f64]) -> i64 {
    clamp(0, round(average(samples)), 100)
}

macro_rules! utilization_stat {
    ($(#[$meta:meta])* $name:ident { $min:ident, $max:ident, $total:ident }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            pub $min: i64,
            pub $max: i64,
            pub $total: i64,
            pub util_min: i64,
            pub util_avg: i64,
            pub util_max: i64,
        }

        impl $name {
            pub fn update(&mut self, total: i64, util: i64) {
                self.$min = min_but_not_zero(self.$min, total);
                self.$max = self.$max.max(total);
                self.$total += total;
                self.util_min = min_but_not_zero(self.util_min, util);
                self.util_max = self.util_max.max(util);
            }

            pub fn update_avg(&mut self, ratios: &[f64]) {
                self.util_avg = percent_avg(ratios);
            }
        }
    };
}

utilization_stat!(
    /// Allocatable cores and requested-CPU utilization.
    CpuInfo { cores_min, cores_max, cores_total }
);
utilization_stat!(
    /// Allocatable memory in MiB and requested-memory utilization.
    MemoryInfo { mb_min, mb_max, mb_total }
);
utilization_stat!(
    /// Pod capacity and requested-pod utilization.
    PodInfo { pods_min, pods_max, pods_total }
);

macro_rules! count_stat {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            pub min: i64,
            pub max: i64,
            pub total: i64,
            pub avg: i64,
        }

        impl $name {
            pub fn update(&mut self, count: i64) {
                self.total += count;
                self.min = min_but_not_zero(self.min, count);
                self.max = self.max.max(count);
            }

            pub fn update_avg(&mut self, counts: &[f64]) {
                self.avg = percent_avg(counts);
            }
        }
    };
}

count_stat!(
    /// Services per cluster.
    ServiceInfo
);
count_stat!(
    /// Workloads per project.
    WorkloadInfo
);
count_stat!(
    /// Horizontal pod autoscalers per project.
    HpaInfo
);
count_stat!(
    /// Pods per project.
    PodData
);

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Namespaces per cluster or project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsInfo {
    pub min: i64,
    pub max: i64,
    pub total: i64,
    pub avg: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub from_catalog: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub no_project: i64,
}

impl NsInfo {
    pub fn update(&mut self, count: i64) {
        self.total += count;
        self.min = min_but_not_zero(self.min, count);
        self.max = self.max.max(count);
    }

    pub fn update_avg(&mut self, counts: &[f64]) {
        self.avg = percent_avg(counts);
    }

    pub fn update_details<'a>(&mut self, project_ids: impl IntoIterator<Item = &'a str>) {
        self.no_project += project_ids.into_iter().filter(|id| id.is_empty()).count() as i64;
    }
}

/// Folds allocatable/requested quantity maps of clusters or nodes into
/// CPU, memory and pod stats.
#[derive(Debug, Default)]
pub struct UtilizationRollup {
    pub cpu: CpuInfo,
    pub mem: MemoryInfo,
    pub pod: PodInfo,
    cpu_ratios: Vec<f64>,
    mem_ratios: Vec<f64>,
    pod_ratios: Vec<f64>,
}

impl UtilizationRollup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and records nothing when any capacity is missing.
    pub fn observe(
        &mut self,
        allocatable: &HashMap<String, String>,
        requested: &HashMap<String, String>,
    ) -> bool {
        let quantity =
            |map: &HashMap<String, String>, key: &str| map.get(key).cloned().unwrap_or_default();

        let total_cores = units::cpu_cores(&quantity(allocatable, "cpu"));
        let total_mem_mb = units::memory_mb(&quantity(allocatable, "memory"));
        let total_pods = units::raw_int(&quantity(allocatable, "pods"), "");
        if total_cores == 0 || total_mem_mb == 0 || total_pods == 0 {
            return false;
        }

        let used_millicores = units::cpu_millicores(&quantity(requested, "cpu"));
        let ratio = used_millicores as f64 / (total_cores * 10) as f64;
        self.cpu.update(total_cores, round(ratio));
        self.cpu_ratios.push(ratio);
        debug!("    CPU cores={}, util={}", total_cores, round(ratio));

        let used_mem_mb = units::memory_mb(&quantity(requested, "memory"));
        let ratio = 100.0 * used_mem_mb as f64 / total_mem_mb as f64;
        self.mem.update(total_mem_mb, round(ratio));
        self.mem_ratios.push(ratio);
        debug!("    Mem used={}, total={}, util={}", used_mem_mb, total_mem_mb, round(ratio));

        let used_pods = units::raw_int(&quantity(requested, "pods"), "");
        let ratio = 100.0 * used_pods as f64 / total_pods as f64;
        self.pod.update(total_pods, round(ratio));
        self.pod_ratios.push(ratio);
        debug!("    Pod used={}, total={}, util={}", used_pods, total_pods, round(ratio));

        true
    }

    pub fn finish(mut self) -> (CpuInfo, MemoryInfo, PodInfo) {
        self.cpu.update_avg(&self.cpu_ratios);
        self.mem.update_avg(&self.mem_ratios);
        self.pod.update_avg(&self.pod_ratios);
        (self.cpu, self.mem, self.pod)
    }
}
