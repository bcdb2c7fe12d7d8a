use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    baseline::Baseline,
    inventory::VolumeHandle,
    types::{
        ClassificationStatus, Failure, FailureCounters, Finding, Severity, SnapshotRecord,
        VmdkReportSet,
    },
};

/// Everything one audit produced, ready for a renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub report_version: String,
    pub generated_at: DateTime<Utc>,
    pub inputs: Inputs,
    pub summary: Summary,
    pub counters: FailureCounters,
    pub disks: VmdkReportSet,
    pub volumes: Vec<VolumeUsage>,
    pub snapshots: Vec<SnapshotRecord>,
    pub failures: Vec<Failure>,
    pub findings: Vec<Finding>,
    pub baseline_comparison: Option<BaselineComparison>,
    pub budget: Option<BudgetResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    pub inventory: Option<String>,
    pub vms_total: usize,
    pub templates_total: usize,
    pub volumes_total: usize,
    pub registry_keys: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub disks_total: usize,
    pub registered_count: usize,
    pub helper_count: usize,
    pub config_associated_count: usize,
    pub inference_failed_count: usize,
    pub orphaned_count: usize,
    pub orphaned_bytes: u64,
    pub snapshots_total: usize,
    pub snapshots_warning: usize,
    pub snapshots_critical: usize,
}

impl Summary {
    pub fn compute(disks: &VmdkReportSet, snapshots: &[SnapshotRecord]) -> Self {
        let count = |status: ClassificationStatus| disks.all.iter().filter(|r| r.status == status).count();
        let snaps = |sev: Severity| snapshots.iter().filter(|s| s.severity == sev).count();
        Self {
            disks_total: disks.all.len(),
            registered_count: count(ClassificationStatus::Registered),
            helper_count: count(ClassificationStatus::TemplateOrSnapshotHelper),
            config_associated_count: count(ClassificationStatus::ConfigAssociated),
            inference_failed_count: count(ClassificationStatus::InferenceFailed),
            orphaned_count: disks.orphaned.len(),
            orphaned_bytes: disks.orphaned.iter().map(|r| r.size_bytes).sum(),
            snapshots_total: snapshots.len(),
            snapshots_warning: snaps(Severity::Warning),
            snapshots_critical: snaps(Severity::Critical),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeUsage {
    pub name: String,
    pub volume_type: Option<String>,
    pub accessible: bool,
    pub capacity_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub uncommitted_bytes: Option<u64>,
    pub usage_percent: Option<f64>,
    pub provisioned_percent: Option<f64>,
    pub disk_files: usize,
    pub disk_bytes: u64,
    pub orphaned_count: usize,
    pub orphaned_bytes: u64,
    pub orphaned_percent_of_capacity: Option<f64>,
}

/// Per-volume capacity and disk-file totals, sorted by volume name.
/// Percentages are `None` when the volume reported no capacity.
pub fn volume_usage(volumes: &[VolumeHandle], disks: &VmdkReportSet) -> Vec<VolumeUsage> {
    let mut out: Vec<VolumeUsage> = volumes
        .iter()
        .map(|v| {
            let on_volume = disks.all.iter().filter(|r| r.volume_name == v.name);
            let (disk_files, disk_bytes) =
                on_volume.fold((0usize, 0u64), |(n, b), r| (n + 1, b.saturating_add(r.size_bytes)));
            let (orphaned_count, orphaned_bytes) = disks
                .orphaned
                .iter()
                .filter(|r| r.volume_name == v.name)
                .fold((0usize, 0u64), |(n, b), r| (n + 1, b.saturating_add(r.size_bytes)));

            let cap = &v.capacity;
            let capacity = cap.capacity_bytes.filter(|c| *c > 0);
            let used = capacity.zip(cap.free_bytes).map(|(c, f)| c.saturating_sub(f));
            let provisioned = used.map(|u| u.saturating_add(cap.uncommitted_bytes.unwrap_or(0)));

            VolumeUsage {
                name: v.name.clone(),
                volume_type: cap.volume_type.clone(),
                accessible: v.accessible,
                capacity_bytes: cap.capacity_bytes,
                free_bytes: cap.free_bytes,
                uncommitted_bytes: cap.uncommitted_bytes,
                usage_percent: percent_of(used, capacity),
                provisioned_percent: percent_of(provisioned, capacity),
                disk_files,
                disk_bytes,
                orphaned_count,
                orphaned_bytes,
                orphaned_percent_of_capacity: percent_of(Some(orphaned_bytes), capacity),
            }
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn percent_of(part: Option<u64>, whole: Option<u64>) -> Option<f64> {
    match (part, whole) {
        (Some(p), Some(w)) if w > 0 => Some(p as f64 * 100.0 / w as f64),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub baseline_orphaned_bytes: u64,
    pub baseline_orphaned_count: u64,
    pub regression_ratio: f64,
    pub delta_orphaned_bytes: i64,
    pub delta_orphaned_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetResult {
    pub threshold_regression_ratio: f64,
    pub pass: bool,
    pub reason: String,
}

pub fn compare_to_baseline(b: &Baseline, summary: &Summary) -> BaselineComparison {
    let baseline = b.baseline_orphaned_bytes;
    let current = summary.orphaned_bytes;
    let regression_ratio = if baseline == 0 {
        if current == 0 {
            1.0
        } else {
            f64::INFINITY
        }
    } else {
        current as f64 / baseline as f64
    };

    BaselineComparison {
        baseline_orphaned_bytes: baseline,
        baseline_orphaned_count: b.baseline_orphaned_count,
        regression_ratio,
        delta_orphaned_bytes: signed_delta(current, baseline),
        delta_orphaned_count: signed_delta(summary.orphaned_count as u64, b.baseline_orphaned_count),
    }
}

// Saturates at the i64 bounds; baselines come from untrusted JSON.
fn signed_delta(current: u64, baseline: u64) -> i64 {
    let d = i128::from(current) - i128::from(baseline);
    i64::try_from(d).unwrap_or(if d < 0 { i64::MIN } else { i64::MAX })
}

pub fn evaluate_budget(threshold: f64, cmp: &BaselineComparison) -> BudgetResult {
    let pass = cmp.regression_ratio <= threshold;
    BudgetResult {
        threshold_regression_ratio: threshold,
        pass,
        reason: if pass {
            "within orphaned-bytes budget".to_string()
        } else {
            format!(
                "regression_ratio {:.3} exceeds threshold {:.3}",
                cmp.regression_ratio, threshold
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::VolumeCapacity;
    use crate::types::VmdkReport;

    fn summary(orphaned_bytes: u64, orphaned_count: usize) -> Summary {
        Summary {
            orphaned_bytes,
            orphaned_count,
            ..Summary::default()
        }
    }

    #[test]
    fn baseline_comparison_infinite_when_baseline_zero() {
        let b = Baseline {
            baseline_orphaned_bytes: 0,
            baseline_orphaned_count: 0,
        };
        let cmp = compare_to_baseline(&b, &summary(10, 1));
        assert!(cmp.regression_ratio.is_infinite());
        assert!(!evaluate_budget(2.0, &cmp).pass);
    }

    #[test]
    fn budget_passes_when_orphans_shrink() {
        let b = Baseline {
            baseline_orphaned_bytes: 1000,
            baseline_orphaned_count: 4,
        };
        let cmp = compare_to_baseline(&b, &summary(500, 2));
        assert_eq!(cmp.delta_orphaned_bytes, -500);
        assert_eq!(cmp.delta_orphaned_count, -2);
        let budget = evaluate_budget(1.25, &cmp);
        assert!(budget.pass);
        assert_eq!(budget.reason, "within orphaned-bytes budget");
    }

    #[test]
    fn huge_baseline_deltas_saturate() {
        let b = Baseline {
            baseline_orphaned_bytes: u64::MAX,
            baseline_orphaned_count: u64::MAX,
        };
        let cmp = compare_to_baseline(&b, &summary(0, 0));
        assert_eq!(cmp.delta_orphaned_bytes, i64::MIN);
        assert_eq!(cmp.delta_orphaned_count, i64::MIN);

        let b = Baseline {
            baseline_orphaned_bytes: 0,
            baseline_orphaned_count: 0,
        };
        let cmp = compare_to_baseline(&b, &summary(u64::MAX, 3));
        assert_eq!(cmp.delta_orphaned_bytes, i64::MAX);
        assert_eq!(cmp.delta_orphaned_count, 3);
    }

    fn disk(volume: &str, size_bytes: u64, status: ClassificationStatus) -> VmdkReport {
        VmdkReport {
            volume_name: volume.to_string(),
            folder_path: format!("[{volume}] vm/"),
            file_name: "vm.vmdk".to_string(),
            path: format!("[{volume}] vm/vm.vmdk"),
            size_bytes,
            modified_at: None,
            age_days: 0,
            severity: Severity::Ok,
            status,
            owner_vm: None,
            metadata_estimated: true,
        }
    }

    fn volume(name: &str, capacity: VolumeCapacity) -> VolumeHandle {
        VolumeHandle {
            name: name.to_string(),
            accessible: true,
            capacity,
        }
    }

    #[test]
    fn volume_usage_relates_orphans_to_capacity() {
        let orphan = disk("ds1", 200, ClassificationStatus::Orphaned);
        let disks = VmdkReportSet {
            all: vec![disk("ds1", 300, ClassificationStatus::Registered), orphan.clone()],
            orphaned: vec![orphan],
        };
        let volumes = [
            volume("ds2", VolumeCapacity::default()),
            volume(
                "ds1",
                VolumeCapacity {
                    volume_type: Some("VMFS".to_string()),
                    capacity_bytes: Some(10_000),
                    free_bytes: Some(4_000),
                    uncommitted_bytes: Some(1_000),
                },
            ),
        ];

        let usage = volume_usage(&volumes, &disks);
        assert_eq!(usage[0].name, "ds1");
        assert_eq!(usage[0].disk_files, 2);
        assert_eq!(usage[0].disk_bytes, 500);
        assert_eq!(usage[0].orphaned_count, 1);
        assert_eq!(usage[0].usage_percent, Some(60.0));
        assert_eq!(usage[0].provisioned_percent, Some(70.0));
        assert_eq!(usage[0].orphaned_percent_of_capacity, Some(2.0));

        assert_eq!(usage[1].name, "ds2");
        assert_eq!(usage[1].disk_files, 0);
        assert_eq!(usage[1].usage_percent, None);
        assert_eq!(usage[1].orphaned_percent_of_capacity, None);
    }

    #[test]
    fn zero_capacity_yields_no_percentages() {
        let volumes = [volume(
            "ds1",
            VolumeCapacity {
                capacity_bytes: Some(0),
                free_bytes: Some(0),
                ..VolumeCapacity::default()
            },
        )];
        let usage = volume_usage(&volumes, &VmdkReportSet::default());
        assert_eq!(usage[0].capacity_bytes, Some(0));
        assert_eq!(usage[0].usage_percent, None);
        assert_eq!(usage[0].provisioned_percent, None);
    }
}
