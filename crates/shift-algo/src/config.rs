//! Configuration for a synthesis run.
//!
//! [`ShiftConfig`] mirrors the TOML file section by section. Every section
//! has defaults, so a partial file (or none at all) is valid:
//!
//! ```toml
//! [clustering]
//! target_size = 8
//! seed = 42
//!
//! [builder]
//! mesh_spacing_m = 50.0
//!
//! [phase]
//! method = "greedy"
//!
//! [voltage]
//! source_kv = 7.2
//! all_transformers = { primary_kv = 7.2, secondary_kv = 0.24 }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shift_core::{KilovoltAmperes, Kilovolts, ShiftError, ShiftResult};

use crate::builder::{BuilderConfig, TransformerDefaults, TransformerSite};
use crate::cluster::{ClusterSizing, KMeansConfig};
use crate::phase::{PhaseConfig, TransformerDescriptor};
use crate::voltage::TransformerVoltage;

const DEFAULT_TARGET_SIZE: usize = 8;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    pub clustering: ClusteringConfig,
    pub builder: BuilderConfig,
    pub phase: PhaseConfig,
    pub voltage: VoltageConfig,
    /// Explicit descriptors; when empty, builder sites are sized from
    /// `transformer_defaults`.
    pub transformers: Vec<TransformerDescriptor>,
    pub transformer_defaults: TransformerDefaults,
    pub equipment: EquipmentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Fixed number of clusters. Mutually exclusive with `target_size`.
    pub count: Option<usize>,
    /// Customers per transformer to aim for (8 when neither is set).
    pub target_size: Option<usize>,
    pub seed: Option<u64>,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            count: None,
            target_size: None,
            seed: None,
            max_iterations: 300,
            tolerance: 1e-9,
        }
    }
}

impl ClusteringConfig {
    pub fn sizing(&self) -> ShiftResult<ClusterSizing> {
        match (self.count, self.target_size) {
            (Some(k), None) => Ok(ClusterSizing::Count(k)),
            (None, Some(size)) => Ok(ClusterSizing::TargetSize(size)),
            (Some(_), Some(_)) => Err(ShiftError::Config(
                "clustering.count and clustering.target_size are mutually exclusive".to_string(),
            )),
            (None, None) => Ok(ClusterSizing::TargetSize(DEFAULT_TARGET_SIZE)),
        }
    }

    /// k-means parameters for `k` clusters.
    pub fn kmeans(&self, k: usize) -> KMeansConfig {
        KMeansConfig {
            k,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            seed: self.seed,
        }
    }
}

/// A named transformer voltage pair as written in `[[voltage.transformers]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTransformerVoltage {
    pub name: String,
    #[serde(flatten)]
    pub voltage: TransformerVoltage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageConfig {
    pub source_kv: Kilovolts,
    /// Applied to every builder-placed transformer without its own entry.
    pub all_transformers: Option<TransformerVoltage>,
    pub transformers: Vec<NamedTransformerVoltage>,
}

impl Default for VoltageConfig {
    fn default() -> Self {
        Self {
            source_kv: Kilovolts(7.2),
            all_transformers: None,
            transformers: Vec::new(),
        }
    }
}

impl VoltageConfig {
    /// The explicit per-name entries.
    pub fn mapping(&self) -> ShiftResult<HashMap<String, TransformerVoltage>> {
        let mut mapping = HashMap::with_capacity(self.transformers.len());
        for entry in &self.transformers {
            if mapping.insert(entry.name.clone(), entry.voltage).is_some() {
                return Err(ShiftError::Config(format!(
                    "voltage for transformer '{}' is configured twice",
                    entry.name
                )));
            }
        }
        Ok(mapping)
    }

    /// Per-name entries, plus `all_transformers` for any site not listed.
    pub fn mapping_for_sites(
        &self,
        sites: &[TransformerSite],
    ) -> ShiftResult<HashMap<String, TransformerVoltage>> {
        let mut mapping = self.mapping()?;
        if let Some(uniform) = self.all_transformers {
            for site in sites {
                mapping.entry(site.name.clone()).or_insert(uniform);
            }
        }
        Ok(mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentConfig {
    /// Demand assumed per customer when sizing conductors.
    pub load_kva: KilovoltAmperes,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            load_kva: KilovoltAmperes(5.0),
        }
    }
}

impl ShiftConfig {
    pub fn from_toml_str(text: &str) -> ShiftResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ShiftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ShiftResult<String> {
        toml::to_string_pretty(self).map_err(|e| ShiftError::Config(e.to_string()))
    }

    /// Load and validate a configuration file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let contents = self.to_toml_string()?;
        std::fs::write(path, contents)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> ShiftResult<()> {
        self.clustering.sizing()?;
        if [self.clustering.count, self.clustering.target_size].contains(&Some(0)) {
            return Err(ShiftError::Config(
                "cluster sizing must be positive".to_string(),
            ));
        }
        let b = &self.builder;
        if b.mesh_spacing.value() <= 0.0 {
            return Err(ShiftError::Config(format!(
                "builder.mesh_spacing_m must be positive, got {}",
                b.mesh_spacing.value()
            )));
        }
        if matches!(b.road_split_length, Some(l) if l.value() <= 0.0) {
            return Err(ShiftError::Config(
                "builder.road_split_length_m must be positive".to_string(),
            ));
        }
        if self.voltage.source_kv.value() <= 0.0 {
            return Err(ShiftError::Config(
                "voltage.source_kv must be positive".to_string(),
            ));
        }
        if self.equipment.load_kva.value() < 0.0 {
            return Err(ShiftError::Config(
                "equipment.load_kva must not be negative".to_string(),
            ));
        }
        self.voltage.mapping()?;
        Ok(())
    }
}
