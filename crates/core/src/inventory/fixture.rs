use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::InventoryError;

use super::{
    FileEntry, FolderError, FolderListing, InventorySource, VmHandle, VolumeCapacity, VolumeHandle,
};

/// Inventory backed by a JSON document, optionally pointing volumes at
/// locally mounted directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureInventory {
    #[serde(default)]
    pub vms: Vec<VmHandle>,
    #[serde(default)]
    pub volumes: Vec<FixtureVolume>,
    /// When set, every listing call fails as if the control plane were down.
    #[serde(default)]
    pub unreachable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureVolume {
    pub name: String,
    #[serde(default = "default_true")]
    pub accessible: bool,
    #[serde(default = "default_true")]
    pub recursive_search: bool,
    #[serde(default)]
    pub browse_error: Option<String>,
    #[serde(default)]
    pub mount_path: Option<PathBuf>,
    #[serde(default)]
    pub capacity: VolumeCapacity,
    #[serde(default)]
    pub folders: Vec<FixtureFolder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFolder {
    pub path: String,
    #[serde(default)]
    pub files: Vec<FixtureFile>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFile {
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl FixtureInventory {
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("parse inventory json")
    }

    /// Loads a fixture; relative `mount_path`s resolve against its directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let mut inv: FixtureInventory = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse inventory {}", path.display()))?;
        inv.resolve_mounts_relative_to(path.parent());
        Ok(inv)
    }

    fn resolve_mounts_relative_to(&mut self, base: Option<&Path>) {
        let Some(base) = base.filter(|b| !b.as_os_str().is_empty()) else {
            return;
        };
        for v in &mut self.volumes {
            if let Some(m) = &v.mount_path {
                if m.is_relative() {
                    v.mount_path = Some(base.join(m));
                }
            }
        }
    }

    fn check_reachable(&self) -> Result<(), InventoryError> {
        match &self.unreachable {
            Some(reason) => Err(InventoryError::Unreachable(reason.clone())),
            None => Ok(()),
        }
    }

    fn volume(&self, name: &str) -> Result<&FixtureVolume, InventoryError> {
        self.volumes
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| InventoryError::UnknownVolume(name.to_string()))
    }
}

impl InventorySource for FixtureInventory {
    fn list_vms(&self) -> Result<Vec<VmHandle>, InventoryError> {
        self.check_reachable()?;
        Ok(self.vms.clone())
    }

    fn list_volumes(&self) -> Result<Vec<VolumeHandle>, InventoryError> {
        self.check_reachable()?;
        Ok(self
            .volumes
            .iter()
            .map(|v| VolumeHandle {
                name: v.name.clone(),
                accessible: v.accessible,
                capacity: v.capacity.clone(),
            })
            .collect())
    }

    fn browse_volume(
        &self,
        volume: &VolumeHandle,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<Result<FolderListing, FolderError>>, InventoryError> {
        self.check_reachable()?;
        let vol = self.volume(&volume.name)?;
        if let Some(reason) = &vol.browse_error {
            return Err(InventoryError::Other(reason.clone()));
        }
        let pattern = compile(pattern)?;
        if let Some(mount) = &vol.mount_path {
            if !mount.is_dir() {
                return Err(InventoryError::Other(format!(
                    "mount path {} is not a directory",
                    mount.display()
                )));
            }
        }

        if !recursive {
            let root = volume_root(&vol.name);
            return Ok(vec![browse_one(vol, &root, &pattern)
                .map_err(|e| FolderError {
                    folder_path: root,
                    reason: e.to_string(),
                })]);
        }
        if !vol.recursive_search {
            return Err(InventoryError::Unsupported("recursive volume search"));
        }

        if let Some(mount) = &vol.mount_path {
            return Ok(walk_mount(&vol.name, mount, &pattern));
        }

        Ok(vol
            .folders
            .iter()
            .map(|f| match &f.error {
                Some(reason) => Err(FolderError {
                    folder_path: f.path.clone(),
                    reason: reason.clone(),
                }),
                None => Ok(listing_from_fixture(vol, f, &pattern)),
            })
            .collect())
    }

    fn browse_folder(
        &self,
        volume: &str,
        folder: &str,
        pattern: &str,
    ) -> Result<FolderListing, InventoryError> {
        self.check_reachable()?;
        let vol = self.volume(volume)?;
        if let Some(reason) = &vol.browse_error {
            return Err(InventoryError::Other(reason.clone()));
        }
        let pattern = compile(pattern)?;
        browse_one(vol, folder, &pattern)
    }
}

fn default_true() -> bool {
    true
}

fn compile(pattern: &str) -> Result<Pattern, InventoryError> {
    Pattern::new(pattern)
        .map_err(|e| InventoryError::Other(format!("invalid pattern '{pattern}': {e}")))
}

fn matches(pattern: &Pattern, name: &str) -> bool {
    pattern.matches_with(
        name,
        MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        },
    )
}

fn volume_root(volume: &str) -> String {
    format!("[{volume}]")
}

/// Folder path relative to its volume, without leading or trailing slashes.
fn relative_folder(folder: &str) -> &str {
    let folder = folder.trim();
    let rest = match folder.strip_prefix('[') {
        Some(r) => r.find(']').map(|i| &r[i + 1..]).unwrap_or(r),
        None => folder,
    };
    rest.trim().trim_matches('/')
}

fn folder_path_for(volume: &str, relative: &str) -> String {
    if relative.is_empty() {
        volume_root(volume)
    } else {
        format!("[{volume}] {relative}/")
    }
}

fn browse_one(
    vol: &FixtureVolume,
    folder: &str,
    pattern: &Pattern,
) -> Result<FolderListing, InventoryError> {
    if let Some(mount) = &vol.mount_path {
        return read_mounted_folder(&vol.name, mount, relative_folder(folder), pattern);
    }

    let wanted = relative_folder(folder);
    let subfolders = implied_children(vol, wanted);
    match vol
        .folders
        .iter()
        .find(|f| relative_folder(&f.path) == wanted)
    {
        Some(f) => match &f.error {
            Some(reason) => Err(InventoryError::Other(reason.clone())),
            None => {
                let mut listing = listing_from_fixture(vol, f, pattern);
                listing.subfolders = subfolders;
                Ok(listing)
            }
        },
        None if wanted.is_empty() || !subfolders.is_empty() => Ok(FolderListing {
            folder_path: folder_path_for(&vol.name, wanted),
            files: vec![],
            subfolders,
        }),
        None => Err(InventoryError::UnknownFolder {
            volume: vol.name.clone(),
            folder: folder.to_string(),
        }),
    }
}

/// Direct children of `parent`, including intermediate folders that are
/// only implied by deeper declared paths.
fn implied_children(vol: &FixtureVolume, parent: &str) -> Vec<String> {
    let mut children = BTreeSet::new();
    for f in &vol.folders {
        let rel = relative_folder(&f.path);
        let rest = if parent.is_empty() {
            rel
        } else {
            match rel.strip_prefix(parent).and_then(|r| r.strip_prefix('/')) {
                Some(r) => r,
                None => continue,
            }
        };
        if let Some(first) = rest.split('/').find(|s| !s.is_empty()) {
            let child = if parent.is_empty() {
                first.to_string()
            } else {
                format!("{parent}/{first}")
            };
            children.insert(folder_path_for(&vol.name, &child));
        }
    }
    children.into_iter().collect()
}

fn listing_from_fixture(vol: &FixtureVolume, f: &FixtureFolder, pattern: &Pattern) -> FolderListing {
    let folder_path = folder_path_for(&vol.name, relative_folder(&f.path));
    FolderListing {
        files: f
            .files
            .iter()
            .filter(|file| matches(pattern, &file.name))
            .map(|file| FileEntry {
                folder_path: folder_path.clone(),
                file_name: file.name.clone(),
                size_bytes: file.size_bytes,
                modified_at: file.modified_at,
            })
            .collect(),
        folder_path,
        subfolders: vec![],
    }
}

fn entry_from_metadata(folder_path: &str, name: String, meta: &std::fs::Metadata) -> FileEntry {
    FileEntry {
        folder_path: folder_path.to_string(),
        file_name: name,
        size_bytes: Some(meta.len()),
        modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

fn walk_mount(volume: &str, mount: &Path, pattern: &Pattern) -> Vec<Result<FolderListing, FolderError>> {
    let mut folders: BTreeMap<String, FolderListing> = BTreeMap::new();
    let mut errors: Vec<Result<FolderListing, FolderError>> = Vec::new();

    for entry in WalkDir::new(mount).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(mount).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                errors.push(Err(FolderError {
                    folder_path: folder_path_for(volume, &rel),
                    reason: e.to_string(),
                }));
                continue;
            }
        };

        let rel_path = entry
            .path()
            .strip_prefix(mount)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            let folder_path = folder_path_for(volume, &rel_path);
            folders.entry(rel_path).or_insert_with(|| FolderListing {
                folder_path,
                ..FolderListing::default()
            });
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !matches(pattern, &name) {
            continue;
        }
        let parent_rel = match rel_path.rfind('/') {
            Some(i) => rel_path[..i].to_string(),
            None => String::new(),
        };
        let folder_path = folder_path_for(volume, &parent_rel);
        let listing = folders
            .entry(parent_rel)
            .or_insert_with(|| FolderListing {
                folder_path: folder_path.clone(),
                ..FolderListing::default()
            });
        match entry.metadata() {
            Ok(meta) => listing.files.push(entry_from_metadata(&folder_path, name, &meta)),
            Err(_) => listing.files.push(FileEntry {
                folder_path,
                file_name: name,
                size_bytes: None,
                modified_at: None,
            }),
        }
    }

    folders.into_values().map(Ok).chain(errors).collect()
}

fn read_mounted_folder(
    volume: &str,
    mount: &Path,
    relative: &str,
    pattern: &Pattern,
) -> Result<FolderListing, InventoryError> {
    let dir = if relative.is_empty() {
        mount.to_path_buf()
    } else {
        mount.join(relative)
    };
    let folder_path = folder_path_for(volume, relative);
    let mut listing = FolderListing {
        folder_path: folder_path.clone(),
        ..FolderListing::default()
    };

    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| InventoryError::Other(format!("{}: {e}", dir.display())))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            let child = if relative.is_empty() {
                name
            } else {
                format!("{relative}/{name}")
            };
            listing.subfolders.push(folder_path_for(volume, &child));
        } else if entry.file_type().is_file() && matches(pattern, &name) {
            let meta = entry
                .metadata()
                .map_err(|e| InventoryError::Other(format!("{}: {e}", entry.path().display())))?;
            listing.files.push(entry_from_metadata(&folder_path, name, &meta));
        }
    }

    listing.subfolders.sort();
    listing.files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(listing)
}
