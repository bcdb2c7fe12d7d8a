use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    inventory::InventorySource,
    path::{file_stem, folder_segments},
    registry::Registry,
    types::{ClassificationStatus, VolumeFileCandidate},
};

static RE_SNAPSHOT_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(-\d{6}|-delta|_\d+)$|-snapshot|_snapshot|_delta_").expect("valid regex")
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierSettings {
    pub template_markers: Vec<String>,
    pub config_extension: String,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            template_markers: ["templates", "template", "vorlagen", "vorlage"]
                .into_iter()
                .map(String::from)
                .collect(),
            config_extension: "vmx".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Decided(ClassificationStatus),
    Pass,
    Inconclusive(String),
}

pub struct ClassifyContext<'a> {
    pub registry: &'a Registry,
    pub inventory: &'a dyn InventorySource,
    pub siblings: &'a mut SiblingCache,
}

pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, candidate: &VolumeFileCandidate, ctx: &mut ClassifyContext<'_>) -> Verdict;
}

/// Config-file stems per folder, fetched at most once per classification run.
#[derive(Debug, Default)]
pub struct SiblingCache {
    entries: HashMap<(String, String), Result<Vec<String>, String>>,
    lookups: usize,
}

impl SiblingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> usize {
        self.lookups
    }

    fn config_stems(
        &mut self,
        inventory: &dyn InventorySource,
        volume: &str,
        folder: &str,
        extension: &str,
    ) -> Result<&[String], &str> {
        let key = (volume.to_string(), folder.to_string());
        if !self.entries.contains_key(&key) {
            self.lookups += 1;
            let fetched = inventory
                .browse_folder(volume, folder, &format!("*.{extension}"))
                .map(|listing| {
                    listing
                        .files
                        .iter()
                        .map(|f| file_stem(&f.file_name).to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .map_err(|e| e.to_string());
            self.entries.insert(key.clone(), fetched);
        }
        match &self.entries[&key] {
            Ok(stems) => Ok(stems.as_slice()),
            Err(reason) => Err(reason.as_str()),
        }
    }
}

pub struct RegistryMatch;

impl Heuristic for RegistryMatch {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn evaluate(&self, candidate: &VolumeFileCandidate, ctx: &mut ClassifyContext<'_>) -> Verdict {
        if ctx.registry.contains(&candidate.disk_path) {
            Verdict::Decided(ClassificationStatus::Registered)
        } else {
            Verdict::Pass
        }
    }
}

/// Step 2: template library folders, template VM disks and snapshot naming.
pub struct TemplateOrSnapshotPattern {
    markers: Vec<String>,
}

impl TemplateOrSnapshotPattern {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }
}

impl Heuristic for TemplateOrSnapshotPattern {
    fn name(&self) -> &'static str {
        "template-or-snapshot"
    }

    fn evaluate(&self, candidate: &VolumeFileCandidate, ctx: &mut ClassifyContext<'_>) -> Verdict {
        let in_template_folder = folder_segments(candidate.disk_path.raw())
            .iter()
            .any(|seg| self.markers.iter().any(|m| m == seg));
        if in_template_folder
            || ctx.registry.is_template_disk(&candidate.disk_path)
            || RE_SNAPSHOT_STEM.is_match(file_stem(&candidate.file_name))
        {
            Verdict::Decided(ClassificationStatus::TemplateOrSnapshotHelper)
        } else {
            Verdict::Pass
        }
    }
}

pub struct SiblingConfig {
    extension: String,
}

impl SiblingConfig {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
        }
    }
}

impl Heuristic for SiblingConfig {
    fn name(&self) -> &'static str {
        "sibling-config"
    }

    fn evaluate(&self, candidate: &VolumeFileCandidate, ctx: &mut ClassifyContext<'_>) -> Verdict {
        let stem = file_stem(&candidate.file_name).to_lowercase();
        match ctx.siblings.config_stems(
            ctx.inventory,
            &candidate.volume_name,
            &candidate.folder_path,
            &self.extension,
        ) {
            Ok(stems) => {
                let related = stems
                    .iter()
                    .any(|cfg| cfg == &stem || stem.starts_with(cfg.as_str()) || cfg.starts_with(&stem));
                if related {
                    Verdict::Decided(ClassificationStatus::ConfigAssociated)
                } else {
                    Verdict::Pass
                }
            }
            Err(reason) => Verdict::Inconclusive(reason.to_string()),
        }
    }
}

pub struct Classifier {
    steps: Vec<Box<dyn Heuristic>>,
}

impl Classifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            steps: vec![
                Box::new(RegistryMatch),
                Box::new(TemplateOrSnapshotPattern::new(&settings.template_markers)),
                Box::new(SiblingConfig::new(&settings.config_extension)),
            ],
        }
    }

    /// Appends a step that runs after the existing ones.
    pub fn with_step(mut self, step: Box<dyn Heuristic>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn classify(
        &self,
        candidate: &VolumeFileCandidate,
        registry: &Registry,
        inventory: &dyn InventorySource,
        siblings: &mut SiblingCache,
    ) -> ClassificationStatus {
        let mut ctx = ClassifyContext {
            registry,
            inventory,
            siblings,
        };
        for step in &self.steps {
            match step.evaluate(candidate, &mut ctx) {
                Verdict::Decided(status) => {
                    debug!(path = %candidate.disk_path.raw(), step = step.name(), ?status, "classified");
                    return status;
                }
                Verdict::Pass => {}
                Verdict::Inconclusive(reason) => {
                    warn!(path = %candidate.disk_path.raw(), step = step.name(), %reason, "classification inconclusive");
                    return ClassificationStatus::InferenceFailed;
                }
            }
        }
        ClassificationStatus::Orphaned
    }

    pub fn classify_batch(
        &self,
        candidates: Vec<VolumeFileCandidate>,
        registry: &Registry,
        inventory: &dyn InventorySource,
    ) -> Vec<(VolumeFileCandidate, ClassificationStatus)> {
        let mut siblings = SiblingCache::new();
        candidates
            .into_iter()
            .map(|c| {
                let status = self.classify(&c, registry, inventory, &mut siblings);
                (c, status)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::inventory::{FixtureInventory, VirtualDisk, VmHandle};
    use crate::path::DiskPath;
    use crate::registry;

    fn candidate(folder: &str, file: &str) -> VolumeFileCandidate {
        VolumeFileCandidate {
            volume_name: "ds1".to_string(),
            folder_path: folder.to_string(),
            file_name: file.to_string(),
            disk_path: DiskPath::new(crate::path::join_volume_path(folder, file)),
            size_bytes: 1,
            modified_at: None,
            metadata_estimated: true,
        }
    }

    fn registry_with(paths: &[&str]) -> Registry {
        let vm = VmHandle {
            name: "vm1".to_string(),
            template: false,
            disks: Some(
                paths
                    .iter()
                    .map(|p| VirtualDisk {
                        device_key: 2000,
                        backing_file: Some(p.to_string()),
                        capacity_bytes: None,
                    })
                    .collect(),
            ),
            snapshots: vec![],
            snapshot_layout: None,
        };
        registry::build(&[vm], "vmdk", &CancellationToken::new())
            .unwrap()
            .registry
    }

    fn inventory() -> FixtureInventory {
        FixtureInventory::from_json(
            br#"{"volumes": [{"name": "ds1", "folders": [
                {"path": "[ds1] vm1/", "files": [{"name": "vm1.vmdk"}]},
                {"path": "[ds1] old/", "files": [{"name": "old.vmdk"}]},
                {"path": "[ds1] app/", "files": [{"name": "app.vmx"}, {"name": "app_data.vmdk"}]},
                {"path": "[ds1] locked/", "error": "permission denied"}
            ]}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn registered_then_orphaned_scenario() {
        let reg = registry_with(&["[ds1] vm1/vm1.vmdk"]);
        let inv = inventory();
        let c = Classifier::new(&ClassifierSettings::default());
        let mut cache = SiblingCache::new();

        assert_eq!(
            c.classify(&candidate("[ds1] vm1/", "vm1.vmdk"), &reg, &inv, &mut cache),
            ClassificationStatus::Registered
        );
        assert_eq!(
            c.classify(&candidate("[ds1] old/", "old.vmdk"), &reg, &inv, &mut cache),
            ClassificationStatus::Orphaned
        );
    }

    #[test]
    fn template_folder_and_snapshot_names_are_helpers() {
        let reg = Registry::default();
        let inv = inventory();
        let c = Classifier::new(&ClassifierSettings::default());
        let mut cache = SiblingCache::new();
        for (folder, file) in [
            ("[ds1] Vorlagen/win2022/", "win2022.vmdk"),
            ("[ds1] old/", "old-000003.vmdk"),
            ("[ds1] old/", "old_1.vmdk"),
            ("[ds1] old/", "old_snapshot.vmdk"),
        ] {
            assert_eq!(
                c.classify(&candidate(folder, file), &reg, &inv, &mut cache),
                ClassificationStatus::TemplateOrSnapshotHelper,
                "{folder}{file}"
            );
        }
        assert_eq!(cache.lookups(), 0);
    }

    #[test]
    fn sibling_config_prefix_marks_association() {
        let reg = Registry::default();
        let inv = inventory();
        let c = Classifier::new(&ClassifierSettings::default());
        let mut cache = SiblingCache::new();
        assert_eq!(
            c.classify(&candidate("[ds1] app/", "app_data.vmdk"), &reg, &inv, &mut cache),
            ClassificationStatus::ConfigAssociated
        );
        assert_eq!(
            c.classify(&candidate("[ds1] app/", "APP.vmdk"), &reg, &inv, &mut cache),
            ClassificationStatus::ConfigAssociated
        );
        assert_eq!(cache.lookups(), 1);
    }

    #[test]
    fn failed_sibling_lookup_is_inference_failed_not_orphaned() {
        let reg = Registry::default();
        let inv = inventory();
        let c = Classifier::new(&ClassifierSettings::default());
        let mut cache = SiblingCache::new();
        for _ in 0..2 {
            assert_eq!(
                c.classify(&candidate("[ds1] locked/", "x.vmdk"), &reg, &inv, &mut cache),
                ClassificationStatus::InferenceFailed
            );
        }
        assert_eq!(cache.lookups(), 1);
    }

    struct LostAndFound;

    impl Heuristic for LostAndFound {
        fn name(&self) -> &'static str {
            "lost-and-found"
        }

        fn evaluate(&self, candidate: &VolumeFileCandidate, _: &mut ClassifyContext<'_>) -> Verdict {
            if candidate.folder_path.contains("lost+found") {
                Verdict::Inconclusive("recovered file".to_string())
            } else {
                Verdict::Pass
            }
        }
    }

    #[test]
    fn appended_steps_run_last() {
        let inv = FixtureInventory::from_json(
            br#"{"volumes": [{"name": "ds1", "folders": [{"path": "[ds1] lost+found/"}]}]}"#,
        )
        .unwrap();
        let c = Classifier::new(&ClassifierSettings::default()).with_step(Box::new(LostAndFound));
        let mut cache = SiblingCache::new();
        assert_eq!(
            c.classify(&candidate("[ds1] lost+found/", "x.vmdk"), &Registry::default(), &inv, &mut cache),
            ClassificationStatus::InferenceFailed
        );
    }
}
