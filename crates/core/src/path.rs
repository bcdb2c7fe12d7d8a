use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_DELTA_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>.+)-\d{6}(?P<ext>\.[^./]+)?$").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPath {
    raw: String,
    keys: BTreeSet<String>,
}

impl DiskPath {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let keys = normalize(&raw);
        Self { raw, keys }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    pub fn matches(&self, other: &DiskPath) -> bool {
        self.keys.iter().any(|k| other.keys.contains(k))
    }
}

impl PartialEq for DiskPath {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Eq for DiskPath {}

/// Produces the canonical key set for a raw path. Never empty, never panics.
pub fn normalize(raw: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    keys.insert(raw.to_string());
    keys.insert(raw.to_lowercase());

    let Some((_, relative)) = split_volume_prefix(raw) else {
        return keys;
    };

    keys.insert(relative.to_string());
    let folded = relative.to_lowercase();
    keys.insert(folded.clone());

    if let Some(cap) = RE_DELTA_SUFFIX.captures(&folded) {
        let mut base = cap["base"].to_string();
        if let Some(ext) = cap.name("ext") {
            base.push_str(ext.as_str());
        }
        keys.insert(base);
    }

    keys
}

pub fn split_volume_prefix(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.trim_start().strip_prefix('[')?;
    let close = rest.find(']')?;
    let volume = &rest[..close];
    let relative = rest[close + 1..].trim_start();
    if volume.is_empty() || relative.is_empty() {
        return None;
    }
    Some((volume, relative))
}

/// `[ds1]` + `a.vmdk` gives `[ds1] a.vmdk`; `[ds1] vm1/` and `[ds1] vm1` both
/// give `[ds1] vm1/a.vmdk`.
pub fn join_volume_path(folder: &str, file: &str) -> String {
    let folder = folder.trim_end();
    if folder.is_empty() {
        file.to_string()
    } else if folder.ends_with('/') {
        format!("{folder}{file}")
    } else if folder.ends_with(']') {
        format!("{folder} {file}")
    } else {
        format!("{folder}/{file}")
    }
}

pub fn file_stem(file_name: &str) -> &str {
    let name = file_name.rsplit('/').next().unwrap_or(file_name);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

pub fn has_extension(file_name: &str, extension: &str) -> bool {
    match file_name.rfind('.') {
        Some(idx) => file_name[idx + 1..].eq_ignore_ascii_case(extension),
        None => false,
    }
}

pub fn folder_segments(raw: &str) -> Vec<String> {
    let relative = split_volume_prefix(raw).map(|(_, r)| r).unwrap_or(raw);
    let mut parts: Vec<String> = relative
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();
    parts.pop();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_path_yields_relative_keys() {
        let keys = normalize("[DS1] VM1/VM1.vmdk");
        assert!(keys.contains("[DS1] VM1/VM1.vmdk"));
        assert!(keys.contains("[ds1] vm1/vm1.vmdk"));
        assert!(keys.contains("VM1/VM1.vmdk"));
        assert!(keys.contains("vm1/vm1.vmdk"));
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn malformed_bracket_degrades_to_raw_and_folded() {
        let keys = normalize("[DS1 VM1/vm1.vmdk");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("[DS1 VM1/vm1.vmdk"));
        assert!(keys.contains("[ds1 vm1/vm1.vmdk"));

        assert_eq!(normalize("[ds1 vm1/vm1.vmdk").len(), 1);

        let keys = normalize("[ds1]");
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("[ds1]"));
    }

    #[test]
    fn snapshot_delta_shares_key_with_base_disk() {
        let delta = DiskPath::new("[ds1] vm1/vm1-000002.vmdk");
        let base = DiskPath::new("[ds1] vm1/vm1.vmdk");
        assert!(delta.matches(&base));
        assert_ne!(delta, base);
    }

    #[test]
    fn join_handles_root_and_nested_folders() {
        assert_eq!(join_volume_path("[ds1]", "a.vmdk"), "[ds1] a.vmdk");
        assert_eq!(join_volume_path("[ds1] vm1/", "a.vmdk"), "[ds1] vm1/a.vmdk");
        assert_eq!(join_volume_path("[ds1] vm1", "a.vmdk"), "[ds1] vm1/a.vmdk");
        assert_eq!(join_volume_path("", "a.vmdk"), "a.vmdk");
    }

    #[test]
    fn stem_and_extension_helpers() {
        assert_eq!(file_stem("vm1/disk-flat.vmdk"), "disk-flat");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert!(has_extension("A.VMDK", "vmdk"));
        assert!(!has_extension("a.vmx", "vmdk"));
        assert_eq!(
            folder_segments("[ds1] Templates/win/win.vmdk"),
            vec!["templates".to_string(), "win".to_string()]
        );
    }
}
