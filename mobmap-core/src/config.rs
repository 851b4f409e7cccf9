//! Tool configuration loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults below.
//! ```toml
//! owned_fields = ["map_coords", "drop_items"]
//!
//! [import]
//! report_dir = "data/import_reports"
//!
//! [triangulation]
//! reference_tag = "REF"
//! warn_rmse = 5.0
//!
//! [[triangulation.aliases]]
//! contains = "tawlbura"
//! canonical = "tawl'bura"
//!
//! [classification]
//! fallback = "Special"
//!
//! [[classification.prefix_rules]]
//! prefix = "Gear_Weapon_"
//! item_type = "Weapon"
//! ```

use crate::classify::{ClassificationRules, GradeRules};
use crate::error::{MobmapError, Result};
use crate::merge::{MergeRecord, OwnedFields};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Rewrites a normalised control-point label containing `contains` to `canonical`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LabelAlias {
    pub contains: String,
    pub canonical: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Tag that marks a map marker as a control point ("REF Wormwig", "Wormwig REF").
    pub reference_tag: String,
    /// RMS residual above which the run logs a warning. Never blocks the run.
    pub warn_rmse: f64,
    pub aliases: Vec<LabelAlias>,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        let alias = |contains: &str, canonical: &str| LabelAlias {
            contains: contains.to_string(),
            canonical: canonical.to_string(),
        };
        Self {
            reference_tag: "REF".to_string(),
            warn_rmse: 5.0,
            aliases: vec![
                alias("big brother", "big brother"),
                alias("hornhexer", "hornhexer"),
                alias("tawl'bura", "tawl'bura"),
                alias("tawlbura", "tawl'bura"),
                alias("blisterpyre", "blisterpyre"),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    pub report_dir: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("data/import_reports"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MobmapConfig {
    /// Mob fields the local store owns once set.
    pub owned_fields: Vec<String>,
    pub import: ImportConfig,
    pub triangulation: TriangulationConfig,
    pub classification: ClassificationRules,
    pub grading: GradeRules,
}

impl Default for MobmapConfig {
    fn default() -> Self {
        Self {
            owned_fields: vec!["map_coords".to_string(), "drop_items".to_string()],
            import: ImportConfig::default(),
            triangulation: TriangulationConfig::default(),
            classification: ClassificationRules::default(),
            grading: GradeRules::default(),
        }
    }
}

impl MobmapConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MobmapError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config from {:?}: {}", path, e),
            ))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MobmapError::Config(format!("Failed to parse config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.owned_fields_for::<crate::models::MobRecord>()?;
        if self.triangulation.reference_tag.trim().is_empty() {
            return Err(MobmapError::Config("triangulation.reference_tag is empty".to_string()));
        }
        if self.grading.tiers.iter().any(|t| t.min_rank == 0) {
            return Err(MobmapError::Config("grading tiers start at rank 1".to_string()));
        }
        Ok(())
    }

    pub fn owned_fields_for<R: MergeRecord>(&self) -> Result<OwnedFields> {
        OwnedFields::for_record::<R, _>(&self.owned_fields)
    }
}
