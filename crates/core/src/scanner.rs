use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::{
    error::InventoryError,
    inventory::{FileEntry, FolderError, FolderListing, InventorySource, VolumeHandle},
    path::{file_stem, has_extension, join_volume_path, DiskPath},
    types::{Failure, FailureScope, VolumeFileCandidate, Walk},
};

/// Stem suffixes of secondary files that always belong to a primary
/// descriptor in the same folder.
pub const AUXILIARY_SUFFIXES: &[&str] = &["-flat", "-delta", "-ctk", "-rdm", "-rdmp", "-sesparse"];

pub fn is_auxiliary(file_name: &str) -> bool {
    if file_name.contains('~') {
        return true;
    }
    let stem = file_stem(file_name).to_lowercase();
    AUXILIARY_SUFFIXES.iter().any(|s| stem.ends_with(s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    NotStarted,
    Recursive,
    Worklist,
}

/// Lazy walk over one volume's disk-image files.
///
/// Yields candidates and per-folder or per-volume failures. Single pass: once
/// exhausted it stays exhausted.
pub struct VolumeScan<'a> {
    source: &'a dyn InventorySource,
    volume: VolumeHandle,
    extension: String,
    pattern: String,
    mode: Mode,
    done: bool,
    files: VecDeque<FileEntry>,
    folders: VecDeque<Result<FolderListing, FolderError>>,
    worklist: VecDeque<String>,
    visited: HashSet<String>,
}

pub fn scan<'a>(
    source: &'a dyn InventorySource,
    volume: &VolumeHandle,
    disk_extension: &str,
) -> VolumeScan<'a> {
    VolumeScan {
        source,
        volume: volume.clone(),
        extension: disk_extension.to_string(),
        pattern: format!("*.{disk_extension}"),
        mode: Mode::NotStarted,
        done: false,
        files: VecDeque::new(),
        folders: VecDeque::new(),
        worklist: VecDeque::new(),
        visited: HashSet::new(),
    }
}

/// Drains a full scan of one volume, logging every failure.
pub fn scan_volume(
    source: &dyn InventorySource,
    volume: &VolumeHandle,
    disk_extension: &str,
) -> Walk<VolumeFileCandidate> {
    let walk: Walk<VolumeFileCandidate> = scan(source, volume, disk_extension).collect();
    for f in &walk.failures {
        warn!(volume = %volume.name, scope = ?f.scope, subject = %f.subject, reason = %f.reason, "skipped during volume scan");
    }
    debug!(
        volume = %volume.name,
        candidates = walk.items.len(),
        failures = walk.failures.len(),
        "volume scanned"
    );
    walk
}

impl VolumeScan<'_> {
    fn volume_failure(&mut self, reason: impl ToString) -> Failure {
        self.done = true;
        Failure::new(FailureScope::Volume, &self.volume.name, reason)
    }

    fn start(&mut self) -> Result<(), Failure> {
        if !self.volume.accessible {
            return Err(self.volume_failure("volume is not accessible"));
        }
        match self.source.browse_volume(&self.volume, &self.pattern, true) {
            Ok(listings) => {
                self.mode = Mode::Recursive;
                self.folders.extend(listings);
                Ok(())
            }
            Err(InventoryError::Unsupported(_)) => {
                debug!(volume = %self.volume.name, "recursive search unsupported, walking folders");
                self.mode = Mode::Worklist;
                let root = format!("[{}]", self.volume.name);
                self.visited.insert(root.clone());
                self.worklist.push_back(root);
                Ok(())
            }
            Err(e) => Err(self.volume_failure(e)),
        }
    }

    fn accept_listing(&mut self, listing: FolderListing) {
        if self.mode == Mode::Worklist {
            for sub in listing.subfolders {
                if self.visited.insert(sub.clone()) {
                    self.worklist.push_back(sub);
                }
            }
        }
        self.files.extend(listing.files);
    }

    fn candidate(&self, entry: FileEntry) -> Option<VolumeFileCandidate> {
        if !has_extension(&entry.file_name, &self.extension) {
            return None;
        }
        if is_auxiliary(&entry.file_name) {
            debug!(file = %entry.file_name, "skipping auxiliary disk file");
            return None;
        }

        let size = entry.size_bytes.filter(|s| *s > 0);
        let metadata_estimated = size.is_none() || entry.modified_at.is_none();
        let raw = join_volume_path(&entry.folder_path, &entry.file_name);

        Some(VolumeFileCandidate {
            volume_name: self.volume.name.clone(),
            folder_path: entry.folder_path,
            file_name: entry.file_name,
            disk_path: DiskPath::new(raw),
            size_bytes: size.unwrap_or(0),
            modified_at: entry.modified_at,
            metadata_estimated,
        })
    }
}

impl Iterator for VolumeScan<'_> {
    type Item = Result<VolumeFileCandidate, Failure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(entry) = self.files.pop_front() {
                if let Some(c) = self.candidate(entry) {
                    return Some(Ok(c));
                }
                continue;
            }

            if let Some(folder) = self.folders.pop_front() {
                match folder {
                    Ok(listing) => self.accept_listing(listing),
                    Err(e) => {
                        return Some(Err(Failure::new(
                            FailureScope::Folder,
                            format!("{}: {}", self.volume.name, e.folder_path),
                            e.reason,
                        )))
                    }
                }
                continue;
            }

            if self.mode == Mode::NotStarted {
                if let Err(f) = self.start() {
                    return Some(Err(f));
                }
                continue;
            }

            if let Some(folder) = self.worklist.pop_front() {
                match self.source.browse_folder(&self.volume.name, &folder, &self.pattern) {
                    Ok(listing) => self.folders.push_back(Ok(listing)),
                    Err(e) => {
                        return Some(Err(Failure::new(
                            FailureScope::Folder,
                            format!("{}: {}", self.volume.name, folder),
                            e,
                        )))
                    }
                }
                continue;
            }

            self.done = true;
        }
    }
}
