use chrono::{DateTime, Utc};

use crate::{
    path::join_volume_path,
    registry::Registry,
    types::{
        age_between, ClassificationStatus, SeverityBands, VmdkReport, VmdkReportSet,
        VolumeFileCandidate,
    },
};

/// Projects classified candidates into report rows.
///
/// Every input produces exactly one row in `all`; `orphaned` is the subset
/// with [`ClassificationStatus::Orphaned`]. Both views are sorted oldest
/// first with a total tie-break, so equal inputs give identical output.
pub fn aggregate<I>(
    pairs: I,
    registry: Option<&Registry>,
    now: DateTime<Utc>,
    bands: SeverityBands,
) -> VmdkReportSet
where
    I: IntoIterator<Item = (VolumeFileCandidate, ClassificationStatus)>,
{
    let mut all: Vec<VmdkReport> = pairs
        .into_iter()
        .map(|(c, status)| project(c, status, registry, now, bands))
        .collect();
    sort_oldest_first(&mut all);

    let orphaned = all
        .iter()
        .filter(|r| r.status == ClassificationStatus::Orphaned)
        .cloned()
        .collect();

    VmdkReportSet { all, orphaned }
}

fn project(
    c: VolumeFileCandidate,
    status: ClassificationStatus,
    registry: Option<&Registry>,
    now: DateTime<Utc>,
    bands: SeverityBands,
) -> VmdkReport {
    let age_days = c.modified_at.map(|t| age_between(t, now).0).unwrap_or(0);
    let owner_vm = match status {
        ClassificationStatus::Registered => registry
            .and_then(|r| r.owner_of(&c.disk_path))
            .map(str::to_string),
        _ => None,
    };

    VmdkReport {
        path: join_volume_path(&c.folder_path, &c.file_name),
        volume_name: c.volume_name,
        folder_path: c.folder_path,
        file_name: c.file_name,
        size_bytes: c.size_bytes,
        modified_at: c.modified_at,
        age_days,
        severity: bands.classify(age_days),
        status,
        owner_vm,
        metadata_estimated: c.metadata_estimated,
    }
}

pub fn sort_oldest_first(rows: &mut [VmdkReport]) {
    rows.sort_by(|a, b| {
        b.age_days
            .cmp(&a.age_days)
            .then_with(|| b.size_bytes.cmp(&a.size_bytes))
            .then_with(|| a.volume_name.cmp(&b.volume_name))
            .then_with(|| a.folder_path.cmp(&b.folder_path))
            .then_with(|| a.file_name.cmp(&b.file_name))
            .then_with(|| a.status.cmp(&b.status))
    });
}
