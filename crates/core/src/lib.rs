pub mod aggregate;
pub mod baseline;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod inventory;
pub mod path;
pub mod registry;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod snapshot;
pub mod types;

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info};

pub use crate::cancel::CancellationToken;
pub use crate::error::{AuditError, InventoryError};

use crate::{
    baseline::Baseline,
    classify::{Classifier, ClassifierSettings},
    config::Config,
    inventory::InventorySource,
    report::{AuditReport, Inputs, Summary},
    rules::run_rules,
    types::{
        ClassificationStatus, FailureCounters, SeverityBands, VolumeFileCandidate, Walk,
    },
};

pub const REPORT_VERSION: &str = "0.1";
pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 16;

#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub workers: usize,
    pub disk_extension: String,
    pub classifier: ClassifierSettings,
    pub snapshot_bands: SeverityBands,
    pub disk_bands: SeverityBands,
    /// Reference time for every age; `None` reads the clock once at start.
    pub now: Option<DateTime<Utc>>,
    /// Free-form label of the inventory, copied into the report inputs.
    pub inventory_label: Option<String>,
    pub baseline_path: Option<PathBuf>,
    pub budget_ratio: Option<f64>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            disk_extension: "vmdk".to_string(),
            classifier: ClassifierSettings::default(),
            snapshot_bands: SeverityBands::SNAPSHOT,
            disk_bands: SeverityBands::DISK,
            now: None,
            inventory_label: None,
            baseline_path: None,
            budget_ratio: None,
        }
    }
}

impl AuditOptions {
    pub fn from_config(config: &Config) -> Self {
        let mut opts = Self::default();
        if let Some(w) = config.workers {
            opts.workers = w;
        }
        if let Some(ext) = &config.disk_extension {
            opts.disk_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(ext) = &config.config_extension {
            opts.classifier.config_extension = ext.trim_start_matches('.').to_string();
        }
        if !config.template_markers.is_empty() {
            opts.classifier.template_markers = config.template_markers.clone();
        }
        if let Some(b) = config.snapshot_policy {
            opts.snapshot_bands = b;
        }
        if let Some(b) = config.disk_policy {
            opts.disk_bands = b;
        }
        opts.budget_ratio = config.budget_ratio;
        opts
    }

    fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}

/// Runs one full reconciliation against `source`.
///
/// Listing VMs or volumes is the only hard failure besides cancellation;
/// anything narrower is recorded in the report's failures and counters.
pub fn audit(
    source: &dyn InventorySource,
    opts: &AuditOptions,
    cancel: &CancellationToken,
) -> Result<AuditReport, AuditError> {
    let started = Instant::now();
    let now = opts.now.unwrap_or_else(Utc::now);
    let ext = opts.disk_extension.as_str();

    let vms = source
        .list_vms()
        .map_err(|source| AuditError::SourceUnavailable {
            phase: "list_vms",
            source,
        })?;
    let volumes = source
        .list_volumes()
        .map_err(|source| AuditError::SourceUnavailable {
            phase: "list_volumes",
            source,
        })?;
    info!(vms = vms.len(), volumes = volumes.len(), "inventory listed");

    let workers = opts.effective_workers();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    debug!(workers, "worker pool ready");

    let (front, scans) = pool.install(|| {
        rayon::join(
            || -> Result<_, AuditError> {
                let build = registry::build(&vms, ext, cancel)?;
                let snapshots = snapshot::walk_all(&vms, now, opts.snapshot_bands, cancel)?;
                Ok((build, snapshots))
            },
            || {
                volumes
                    .par_iter()
                    .map(|v| -> Result<Walk<VolumeFileCandidate>, AuditError> {
                        cancel.check()?;
                        Ok(scanner::scan_volume(source, v, ext))
                    })
                    .collect::<Result<Vec<_>, AuditError>>()
            },
        )
    });
    let (build, snapshots) = front?;
    let scans = scans?;
    cancel.check()?;
    info!(
        registry_keys = build.registry.len(),
        snapshots = snapshots.items.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "registry built and volumes scanned"
    );

    let mut failures = build.failures;
    failures.extend(snapshots.failures);
    let mut batches = Vec::with_capacity(scans.len());
    for walk in scans {
        failures.extend(walk.failures);
        batches.push(walk.items);
    }

    let classifier = Classifier::new(&opts.classifier);
    let registry = &build.registry;
    let classified: Vec<(VolumeFileCandidate, ClassificationStatus)> = pool.install(|| {
        batches
            .into_par_iter()
            .map(|batch| classifier.classify_batch(batch, registry, source))
            .flatten()
            .collect()
    });
    cancel.check()?;

    let mut counters = FailureCounters::default();
    for f in &failures {
        counters.record(f);
    }
    for (candidate, status) in &classified {
        if *status == ClassificationStatus::InferenceFailed {
            counters.inference_failures += 1;
        }
        if candidate.metadata_estimated {
            counters.metadata_estimated += 1;
        }
    }

    let disks = aggregate::aggregate(classified, Some(registry), now, opts.disk_bands);
    failures.sort_by(|a, b| {
        (a.scope, &a.subject, &a.reason).cmp(&(b.scope, &b.subject, &b.reason))
    });

    let summary = Summary::compute(&disks, &snapshots.items);
    let volume_usage = report::volume_usage(&volumes, &disks);
    let findings = run_rules(&disks, &snapshots.items, &counters);

    let baseline = match &opts.baseline_path {
        Some(p) => Some(Baseline::load_json(p).map_err(AuditError::Baseline)?),
        None => None,
    };
    let baseline_comparison = baseline
        .as_ref()
        .map(|b| report::compare_to_baseline(b, &summary));
    let budget = match (opts.budget_ratio, baseline_comparison.as_ref()) {
        (Some(threshold), Some(cmp)) => Some(report::evaluate_budget(threshold, cmp)),
        _ => None,
    };

    info!(
        disks = summary.disks_total,
        orphaned = summary.orphaned_count,
        orphaned_bytes = summary.orphaned_bytes,
        failures = failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "audit complete"
    );

    Ok(AuditReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: now,
        inputs: Inputs {
            inventory: opts.inventory_label.clone(),
            vms_total: vms.len(),
            templates_total: vms.iter().filter(|v| v.template).count(),
            volumes_total: volumes.len(),
            registry_keys: registry.len(),
        },
        summary,
        counters,
        disks,
        volumes: volume_usage,
        snapshots: snapshots.items,
        failures,
        findings,
        baseline_comparison,
        budget,
    })
}
