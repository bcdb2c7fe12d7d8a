use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    cancel::CancellationToken,
    error::AuditError,
    inventory::{SnapshotNode, VmHandle},
    types::{age_between, Failure, FailureScope, SeverityBands, SnapshotRecord, Walk},
};

/// Flattens one VM's snapshot tree in pre-order.
///
/// A node without id or creation time is recorded as a failure; its children
/// are still visited.
pub fn walk(vm: &VmHandle, now: DateTime<Utc>, bands: SeverityBands) -> Walk<SnapshotRecord> {
    let mut out = Walk::default();
    visit(vm, &vm.snapshots, now, bands, &mut out);
    out
}

fn visit(
    vm: &VmHandle,
    nodes: &[SnapshotNode],
    now: DateTime<Utc>,
    bands: SeverityBands,
    out: &mut Walk<SnapshotRecord>,
) {
    for node in nodes {
        match record(vm, node, now, bands) {
            Ok(r) => out.items.push(r),
            Err(f) => {
                warn!(vm = %vm.name, snapshot = %node.name, reason = %f.reason, "skipping snapshot");
                out.failures.push(f);
            }
        }
        visit(vm, &node.children, now, bands, out);
    }
}

fn record(
    vm: &VmHandle,
    node: &SnapshotNode,
    now: DateTime<Utc>,
    bands: SeverityBands,
) -> Result<SnapshotRecord, Failure> {
    let subject = format!("{}/{}", vm.name, node.name);
    let snapshot_id = node
        .snapshot_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Failure::new(FailureScope::Snapshot, &subject, "missing snapshot id"))?;
    let create_time = node
        .create_time
        .ok_or_else(|| Failure::new(FailureScope::Snapshot, &subject, "missing create time"))?;

    let (age_days, age_hours) = age_between(create_time, now);

    Ok(SnapshotRecord {
        vm_name: vm.name.clone(),
        size_bytes: layout_size(vm, &snapshot_id),
        snapshot_id,
        name: node.name.clone(),
        description: node.description.clone().unwrap_or_default(),
        create_time,
        age_days,
        age_hours,
        severity: bands.classify(age_days),
        state: node.state.clone(),
        quiesced: node.quiesced,
    })
}

fn layout_size(vm: &VmHandle, snapshot_id: &str) -> Option<u64> {
    let layout = vm.snapshot_layout.as_ref()?;
    let entry = layout.iter().find(|l| l.snapshot_id == snapshot_id)?;
    entry
        .files
        .iter()
        .map(|f| f.size_bytes)
        .try_fold(0u64, |acc, s| s.map(|s| acc.saturating_add(s)))
}

/// Walks every VM and returns records oldest first.
pub fn walk_all(
    vms: &[VmHandle],
    now: DateTime<Utc>,
    bands: SeverityBands,
    cancel: &CancellationToken,
) -> Result<Walk<SnapshotRecord>, AuditError> {
    let mut all = Walk::default();
    for vm in vms {
        cancel.check()?;
        all.merge(walk(vm, now, bands));
    }
    sort_oldest_first(&mut all.items);
    debug!(snapshots = all.items.len(), failures = all.failures.len(), "snapshot trees walked");
    Ok(all)
}

pub fn sort_oldest_first(records: &mut [SnapshotRecord]) {
    records.sort_by(|a, b| {
        b.age_days
            .cmp(&a.age_days)
            .then_with(|| b.age_hours.cmp(&a.age_hours))
            .then_with(|| a.vm_name.cmp(&b.vm_name))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
    });
}
