use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::types::SeverityBands;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub workers: Option<usize>,
    pub disk_extension: Option<String>,
    pub config_extension: Option<String>,
    pub template_markers: Vec<String>,
    pub budget_ratio: Option<f64>,
    pub snapshot_policy: Option<SeverityBands>,
    pub disk_policy: Option<SeverityBands>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        config.validate().with_context(|| format!("validate {}", path.display()))?;
        Ok(config)
    }

    pub fn discover() -> Option<Self> {
        let path = Path::new("vmaudit.toml");
        if path.exists() {
            Config::load(path).ok()
        } else {
            None
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, bands) in [
            ("snapshot_policy", self.snapshot_policy),
            ("disk_policy", self.disk_policy),
        ] {
            if let Some(b) = bands {
                if b.warning_after_days < 0 || b.critical_after_days < b.warning_after_days {
                    anyhow::bail!(
                        "{name}: expected 0 <= warning_after_days <= critical_after_days, got {} and {}",
                        b.warning_after_days,
                        b.critical_after_days
                    );
                }
            }
        }
        if self.workers == Some(0) {
            anyhow::bail!("workers must be at least 1");
        }
        Ok(())
    }
}
