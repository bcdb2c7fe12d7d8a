use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    cancel::CancellationToken,
    error::AuditError,
    inventory::VmHandle,
    path::{has_extension, DiskPath},
    types::{Failure, FailureScope, VmDiskRecord, Walk},
};

/// Canonical keys of every disk file a VM is known to own.
///
/// Built once per audit and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    owners: HashMap<String, String>,
    template_keys: HashSet<String>,
}

impl Registry {
    pub fn contains(&self, path: &DiskPath) -> bool {
        path.keys().iter().any(|k| self.owners.contains_key(k))
    }

    pub fn owner_of(&self, path: &DiskPath) -> Option<&str> {
        path.keys()
            .iter()
            .find_map(|k| self.owners.get(k))
            .map(String::as_str)
    }

    pub fn known_keys(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }

    /// True when the path matches a disk of a template VM.
    pub fn is_template_disk(&self, path: &DiskPath) -> bool {
        path.keys().iter().any(|k| self.template_keys.contains(k))
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn insert(&mut self, path: &DiskPath, vm_name: &str) {
        for key in path.keys() {
            self.owners
                .entry(key.clone())
                .or_insert_with(|| vm_name.to_string());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryBuild {
    pub registry: Registry,
    pub records: Vec<VmDiskRecord>,
    pub failures: Vec<Failure>,
}

/// Builds the registry from every VM's disk devices and snapshot layout.
///
/// A VM without a readable device list is skipped and recorded as a failure.
pub fn build(
    vms: &[VmHandle],
    disk_extension: &str,
    cancel: &CancellationToken,
) -> Result<RegistryBuild, AuditError> {
    let mut out = RegistryBuild::default();

    for vm in vms {
        cancel.check()?;

        let disks = match vm_disk_records(vm) {
            Ok(walk) => {
                for f in &walk.failures {
                    warn!(vm = %vm.name, reason = %f.reason, "disk device left out of registry");
                }
                out.failures.extend(walk.failures);
                walk.items
            }
            Err(failure) => {
                warn!(vm = %vm.name, reason = %failure.reason, "skipping VM in registry build");
                out.failures.push(failure);
                continue;
            }
        };

        if vm.template {
            for rec in &disks {
                out.registry
                    .template_keys
                    .extend(rec.disk_path.keys().iter().cloned());
            }
            debug!(vm = %vm.name, disks = disks.len(), "template disks kept apart from registry");
            continue;
        }

        for rec in &disks {
            out.registry.insert(&rec.disk_path, &vm.name);
        }

        if !vm.snapshots.is_empty() {
            for file in snapshot_layout_files(vm, disk_extension) {
                out.registry.insert(&DiskPath::new(file), &vm.name);
            }
        }

        out.records.extend(disks);
    }

    debug!(
        keys = out.registry.len(),
        records = out.records.len(),
        "registry built"
    );
    Ok(out)
}

fn vm_disk_records(vm: &VmHandle) -> Result<Walk<VmDiskRecord>, Failure> {
    let devices = vm.disks.as_ref().ok_or_else(|| {
        Failure::new(FailureScope::Vm, &vm.name, "device list unavailable")
    })?;

    let walk: Walk<VmDiskRecord> = devices
        .iter()
        .map(|d| match &d.backing_file {
            Some(raw) if !raw.trim().is_empty() => Ok(VmDiskRecord {
                vm_name: vm.name.clone(),
                device_key: d.device_key,
                raw_path: raw.clone(),
                disk_path: DiskPath::new(raw.clone()),
            }),
            _ => Err(Failure::new(
                FailureScope::Vm,
                &vm.name,
                format!("disk {} has no backing file", d.device_key),
            )),
        })
        .collect();
    Ok(walk)
}

fn snapshot_layout_files<'a>(
    vm: &'a VmHandle,
    disk_extension: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    vm.snapshot_layout
        .iter()
        .flatten()
        .flat_map(|layout| layout.files.iter())
        .map(|f| f.name.as_str())
        .filter(move |name| has_extension(name, disk_extension))
}
