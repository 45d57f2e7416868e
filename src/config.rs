// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    aggregate::AggregateSpec,
    error::{PipelineError, Result},
    process::TransformConfig,
    schema::Contract,
    store::Layout,
};

pub const TIPS_URL: &str = "https://raw.githubusercontent.com/mwaskom/seaborn-data/master/tips.csv";

pub const ENV_SOURCE: &str = "MEDALLION_SOURCE";
pub const ENV_DATA_DIR: &str = "MEDALLION_DATA_DIR";

/// Everything one run needs. Defaults reproduce the tips pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// URL or local path of the delimited input.
    pub source: String,
    pub data_dir: PathBuf,
    pub bronze_file: String,
    pub silver_file: String,
    pub gold_file: String,
    pub transform: TransformConfig,
    pub contract: Contract,
    pub aggregate: AggregateSpec,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: TIPS_URL.into(),
            data_dir: PathBuf::from("data"),
            bronze_file: "tips_raw.csv".into(),
            silver_file: "tips_clean.parquet".into(),
            gold_file: "tips_summary.parquet".into(),
            transform: TransformConfig::default(),
            contract: Contract::tips(),
            aggregate: AggregateSpec::tips(),
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML document; missing keys fall back to the defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load `path` (or the defaults when `None`), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {e}", p.display()))
                })?;
                info!("loaded config from {}", p.display());
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.check()?;
        Ok(cfg)
    }

    /// Override `source` and `data_dir` from `lookup` (the process
    /// environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(source) = lookup(ENV_SOURCE).filter(|s| !s.trim().is_empty()) {
            debug!(%source, "source overridden from environment");
            self.source = source;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|s| !s.trim().is_empty()) {
            debug!(%dir, "data dir overridden from environment");
            self.data_dir = PathBuf::from(dir);
        }
    }

    fn check(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(PipelineError::Config("source is empty".into()));
        }
        for (key, name) in [
            ("bronze_file", &self.bronze_file),
            ("silver_file", &self.silver_file),
            ("gold_file", &self.gold_file),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(PipelineError::Config(format!(
                    "{key} must be a bare file name, got {name:?}"
                )));
            }
        }
        self.transform.timestamp.step_micros()?;
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.data_dir)
    }

    pub fn bronze_path(&self) -> PathBuf {
        self.layout().bronze().join(&self.bronze_file)
    }

    pub fn silver_path(&self) -> PathBuf {
        self.layout().silver().join(&self.silver_file)
    }

    pub fn gold_path(&self) -> PathBuf {
        self.layout().gold().join(&self.gold_file)
    }
}
