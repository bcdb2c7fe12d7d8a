use crate::types::{
    ClassificationStatus, FailureCounters, Finding, Severity, SnapshotRecord, VmdkReportSet,
};

const MAX_EVIDENCE: usize = 5;

pub fn run_rules(
    disks: &VmdkReportSet,
    snapshots: &[SnapshotRecord],
    counters: &FailureCounters,
) -> Vec<Finding> {
    let mut findings: Vec<Finding> = Vec::new();

    if !disks.orphaned.is_empty() {
        let total: u64 = disks.orphaned.iter().map(|r| r.size_bytes).sum();
        let mut largest: Vec<_> = disks.orphaned.iter().collect();
        largest.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.path.cmp(&b.path)));

        let mut evidence = vec![format!(
            "{} orphaned disk files, {} bytes",
            disks.orphaned.len(),
            total
        )];
        evidence.extend(
            largest
                .iter()
                .take(MAX_EVIDENCE)
                .map(|r| format!("{} ({} bytes, {} days)", r.path, r.size_bytes, r.age_days)),
        );

        findings.push(Finding {
            id: "ORPHANED_DISKS".to_string(),
            severity: if disks.orphaned.iter().any(|r| r.severity == Severity::Critical) {
                Severity::Critical
            } else {
                Severity::Warning
            },
            evidence,
            likely_cause: "Disk files left behind after a VM was removed from inventory or a disk was detached"
                .to_string(),
            suggested_actions: vec![
                "Confirm no VM references the file before deleting it".to_string(),
                "Check the volume's recent tasks for unregister or detach operations".to_string(),
                "Move suspected files to a quarantine folder before removing them".to_string(),
            ],
        });
    }

    let critical: Vec<&SnapshotRecord> = snapshots
        .iter()
        .filter(|s| s.severity == Severity::Critical)
        .collect();
    if !critical.is_empty() {
        findings.push(Finding {
            id: "CRITICAL_SNAPSHOTS".to_string(),
            severity: Severity::Critical,
            evidence: critical
                .iter()
                .take(MAX_EVIDENCE)
                .map(|s| format!("{}: {} ({} days)", s.vm_name, s.name, s.age_days))
                .collect(),
            likely_cause: "Snapshots kept long past a change window keep growing their delta files"
                .to_string(),
            suggested_actions: vec![
                "Consolidate or delete snapshots that no longer serve a rollback purpose".to_string(),
                "Verify backup jobs remove the snapshots they create".to_string(),
            ],
        });
    }

    let inconclusive = disks
        .all
        .iter()
        .filter(|r| r.status == ClassificationStatus::InferenceFailed)
        .count();
    if inconclusive > 0 {
        findings.push(Finding {
            id: "INCONCLUSIVE_CLASSIFICATION".to_string(),
            severity: Severity::Warning,
            evidence: vec![format!("{inconclusive} disk files could not be classified")],
            likely_cause: "Folder listings for configuration files failed".to_string(),
            suggested_actions: vec![
                "Check browse permissions on the affected folders and rerun the audit".to_string(),
            ],
        });
    }

    if counters.enumeration_failures() > 0 || counters.metadata_estimated > 0 {
        findings.push(Finding {
            id: "PARTIAL_ENUMERATION".to_string(),
            severity: Severity::Warning,
            evidence: vec![
                format!("vms_skipped={}", counters.vms_skipped),
                format!("volumes_skipped={}", counters.volumes_skipped),
                format!("folders_skipped={}", counters.folders_skipped),
                format!("snapshots_skipped={}", counters.snapshots_skipped),
                format!("metadata_estimated={}", counters.metadata_estimated),
            ],
            likely_cause: "Parts of the inventory were unreadable; totals are lower bounds"
                .to_string(),
            suggested_actions: vec![
                "Review the failures list and fix access to skipped volumes or VMs".to_string(),
            ],
        });
    }

    findings.sort_by(|a, b| a.id.cmp(&b.id));
    findings
}
