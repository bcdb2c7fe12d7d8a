use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::Context;

/// Orphan totals taken from a previous `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub baseline_orphaned_bytes: u64,
    pub baseline_orphaned_count: u64,
}

impl Baseline {
    pub fn from_report_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let v: serde_json::Value = serde_json::from_slice(bytes).context("parse json")?;
        let summary = v
            .get("summary")
            .filter(|s| s.is_object())
            .context("no summary object; expected a vmaudit report.json")?;
        let field = |name: &str| summary.get(name).and_then(|n| n.as_u64()).unwrap_or(0);
        Ok(Self {
            baseline_orphaned_bytes: field("orphaned_bytes"),
            baseline_orphaned_count: field("orphaned_count"),
        })
    }

    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_report_json(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_from_report_json_defaults_to_zero() {
        let bytes = br#"{"summary":{}}"#;
        let baseline = Baseline::from_report_json(bytes).unwrap();
        assert_eq!(baseline.baseline_orphaned_bytes, 0);
        assert_eq!(baseline.baseline_orphaned_count, 0);
    }

    #[test]
    fn baseline_reads_orphan_totals() {
        let bytes = br#"{"summary":{"orphaned_bytes":4096,"orphaned_count":2}}"#;
        let baseline = Baseline::from_report_json(bytes).unwrap();
        assert_eq!(baseline.baseline_orphaned_bytes, 4096);
        assert_eq!(baseline.baseline_orphaned_count, 2);
    }

    #[test]
    fn baseline_without_summary_is_rejected() {
        let err = Baseline::from_report_json(br#"{"metrics":{"orphaned_bytes":1}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("no summary object"), "{err:#}");
        assert!(Baseline::from_report_json(br#"{"summary":12}"#).is_err());
    }
}
