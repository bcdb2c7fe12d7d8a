use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::DiskPath;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

/// Age thresholds in whole days. An age equal to a threshold stays in the
/// lower band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityBands {
    pub warning_after_days: i64,
    pub critical_after_days: i64,
}

impl SeverityBands {
    pub const SNAPSHOT: SeverityBands = SeverityBands {
        warning_after_days: 7,
        critical_after_days: 30,
    };

    pub const DISK: SeverityBands = SeverityBands {
        warning_after_days: 30,
        critical_after_days: 90,
    };

    pub fn classify(&self, age_days: i64) -> Severity {
        if age_days > self.critical_after_days {
            Severity::Critical
        } else if age_days > self.warning_after_days {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }
}

/// Whole days and remainder hours between `then` and `now`, clamped at zero.
pub fn age_between(then: DateTime<Utc>, now: DateTime<Utc>) -> (i64, i64) {
    let delta = now.signed_duration_since(then);
    if delta.num_seconds() <= 0 {
        return (0, 0);
    }
    let days = delta.num_days();
    let hours = (delta - chrono::Duration::days(days)).num_hours();
    (days, hours)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationStatus {
    Registered,
    TemplateOrSnapshotHelper,
    ConfigAssociated,
    Orphaned,
    InferenceFailed,
}

/// One virtual-disk device of a VM, as seen while building the registry.
#[derive(Debug, Clone)]
pub struct VmDiskRecord {
    pub vm_name: String,
    pub device_key: i32,
    pub raw_path: String,
    pub disk_path: DiskPath,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    pub vm_name: String,
    pub snapshot_id: String,
    pub name: String,
    pub description: String,
    pub create_time: DateTime<Utc>,
    pub age_days: i64,
    pub age_hours: i64,
    pub severity: Severity,
    pub state: Option<String>,
    pub quiesced: bool,
    pub size_bytes: Option<u64>,
}

/// A disk-image file found on a volume, before classification.
#[derive(Debug, Clone)]
pub struct VolumeFileCandidate {
    pub volume_name: String,
    pub folder_path: String,
    pub file_name: String,
    pub disk_path: DiskPath,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Size or modification time was missing and has been defaulted.
    pub metadata_estimated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmdkReport {
    pub volume_name: String,
    pub folder_path: String,
    pub file_name: String,
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub age_days: i64,
    pub severity: Severity,
    pub status: ClassificationStatus,
    pub owner_vm: Option<String>,
    pub metadata_estimated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VmdkReportSet {
    pub all: Vec<VmdkReport>,
    pub orphaned: Vec<VmdkReport>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    Vm,
    Volume,
    Folder,
    Snapshot,
}

/// A locally recovered enumeration failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub scope: FailureScope,
    pub subject: String,
    pub reason: String,
}

impl Failure {
    pub fn new(scope: FailureScope, subject: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            scope,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}

/// Items that survived a walk plus the failures recorded along the way.
#[derive(Debug, Clone)]
pub struct Walk<T> {
    pub items: Vec<T>,
    pub failures: Vec<Failure>,
}

impl<T> Default for Walk<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> Walk<T> {
    pub fn merge(&mut self, other: Walk<T>) {
        self.items.extend(other.items);
        self.failures.extend(other.failures);
    }
}

impl<T, E: Into<Failure>> FromIterator<Result<T, E>> for Walk<T> {
    fn from_iter<I: IntoIterator<Item = Result<T, E>>>(iter: I) -> Self {
        let mut walk = Walk::default();
        for r in iter {
            match r {
                Ok(item) => walk.items.push(item),
                Err(e) => walk.failures.push(e.into()),
            }
        }
        walk
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureCounters {
    pub vms_skipped: usize,
    pub volumes_skipped: usize,
    pub folders_skipped: usize,
    pub snapshots_skipped: usize,
    pub inference_failures: usize,
    pub metadata_estimated: usize,
}

impl FailureCounters {
    pub fn record(&mut self, failure: &Failure) {
        match failure.scope {
            FailureScope::Vm => self.vms_skipped += 1,
            FailureScope::Volume => self.volumes_skipped += 1,
            FailureScope::Folder => self.folders_skipped += 1,
            FailureScope::Snapshot => self.snapshots_skipped += 1,
        }
    }

    pub fn enumeration_failures(&self) -> usize {
        self.vms_skipped + self.volumes_skipped + self.folders_skipped + self.snapshots_skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub evidence: Vec<String>,
    pub likely_cause: String,
    pub suggested_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_band_boundaries() {
        let b = SeverityBands::SNAPSHOT;
        assert_eq!(b.classify(0), Severity::Ok);
        assert_eq!(b.classify(7), Severity::Ok);
        assert_eq!(b.classify(8), Severity::Warning);
        assert_eq!(b.classify(30), Severity::Warning);
        assert_eq!(b.classify(31), Severity::Critical);
    }

    #[test]
    fn disk_band_boundaries() {
        let b = SeverityBands::DISK;
        assert_eq!(b.classify(30), Severity::Ok);
        assert_eq!(b.classify(31), Severity::Warning);
        assert_eq!(b.classify(90), Severity::Warning);
        assert_eq!(b.classify(91), Severity::Critical);
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(age_between(later, now), (0, 0));
    }

    #[test]
    fn age_splits_days_and_hours() {
        let then = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 5, 30, 0).unwrap();
        assert_eq!(age_between(then, now), (2, 5));
    }
}
