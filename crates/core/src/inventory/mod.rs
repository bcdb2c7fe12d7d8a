mod fixture;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

pub use fixture::{FixtureFolder, FixtureInventory, FixtureVolume};

pub trait InventorySource: Send + Sync {
    fn list_vms(&self) -> Result<Vec<VmHandle>, InventoryError>;

    fn list_volumes(&self) -> Result<Vec<VolumeHandle>, InventoryError>;

    /// The outer error fails the whole volume; inner errors fail one folder.
    /// Sources without a recursive search return
    /// [`InventoryError::Unsupported`] when `recursive` is set.
    fn browse_volume(
        &self,
        volume: &VolumeHandle,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<Result<FolderListing, FolderError>>, InventoryError>;

    fn browse_folder(
        &self,
        volume: &str,
        folder: &str,
        pattern: &str,
    ) -> Result<FolderListing, InventoryError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmHandle {
    pub name: String,
    #[serde(default)]
    pub template: bool,
    /// `None` when the device list could not be read.
    pub disks: Option<Vec<VirtualDisk>>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotNode>,
    #[serde(default)]
    pub snapshot_layout: Option<Vec<SnapshotLayout>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDisk {
    pub device_key: i32,
    pub backing_file: Option<String>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub snapshot_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub quiesced: bool,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLayout {
    pub snapshot_id: String,
    #[serde(default)]
    pub files: Vec<LayoutFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutFile {
    pub name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeHandle {
    pub name: String,
    #[serde(default = "default_true")]
    pub accessible: bool,
    #[serde(default)]
    pub capacity: VolumeCapacity,
}

/// Capacity figures as the control plane reports them; any may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapacity {
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub free_bytes: Option<u64>,
    #[serde(default)]
    pub uncommitted_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub folder_path: String,
    pub file_name: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderListing {
    pub folder_path: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub subfolders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderError {
    pub folder_path: String,
    pub reason: String,
}

fn default_true() -> bool {
    true
}
