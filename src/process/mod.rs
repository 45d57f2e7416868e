// src/process/mod.rs
pub mod columns;
pub mod derive;

use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder},
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::store::write_artifact;

pub use columns::{normalize_columns, normalize_name, require_columns};
pub use derive::{categorical_type, categorize, derive_ratio, synthesize_timestamps};

/// What to do when the ratio denominator is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivisionPolicy {
    /// Store NaN and let the quality gate reject the row.
    #[default]
    Nan,
    /// Stop the transform at the offending row.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioRule {
    pub output: String,
    pub numerator: String,
    pub denominator: String,
    pub decimals: u32,
    pub on_zero: DivisionPolicy,
}

impl Default for RatioRule {
    fn default() -> Self {
        Self {
            output: "tip_pct".into(),
            numerator: "tip".into(),
            denominator: "total_bill".into(),
            decimals: 4,
            on_zero: DivisionPolicy::Nan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampRule {
    pub column: String,
    pub origin: NaiveDateTime,
    pub step_secs: i64,
}

impl Default for TimestampRule {
    fn default() -> Self {
        Self {
            column: "visit_datetime".into(),
            origin: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            step_secs: 3600,
        }
    }
}

impl TimestampRule {
    /// Interval between consecutive rows in microseconds. Must be positive so
    /// the column is strictly increasing.
    pub fn step_micros(&self) -> Result<i64> {
        if self.step_secs <= 0 {
            return Err(PipelineError::Config(format!(
                "timestamp step for `{}` must be positive, got {}s",
                self.column, self.step_secs
            )));
        }
        self.step_secs.checked_mul(1_000_000).ok_or_else(|| {
            PipelineError::Config(format!(
                "timestamp step {}s does not fit in microseconds",
                self.step_secs
            ))
        })
    }
}

/// Cleaning and derivation rules taking bronze to silver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub ratio: RatioRule,
    pub timestamp: TimestampRule,
    pub categorical: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            ratio: RatioRule::default(),
            timestamp: TimestampRule::default(),
            categorical: ["sex", "smoker", "day", "time"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl TransformConfig {
    /// Columns that must exist once names are normalized.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.ratio.numerator.as_str(), self.ratio.denominator.as_str()];
        cols.extend(self.categorical.iter().map(String::as_str));
        cols
    }
}

/// Load a bronze CSV whole, inferring column types from every row.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn load_bronze(path: &Path) -> Result<RecordBatch> {
    let (schema, records) = Format::default()
        .with_header(true)
        .infer_schema(File::open(path)?, None)?;
    debug!(records, columns = schema.fields().len(), "inferred bronze schema");

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(File::open(path)?)?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Bronze frame in, silver frame out. Each step returns a new batch.
pub fn transform(raw: &RecordBatch, cfg: &TransformConfig) -> Result<RecordBatch> {
    // 1) names first; every later step looks columns up by normalized name
    let batch = normalize_columns(raw)?;
    // 2) fail before deriving anything
    require_columns(&batch, &cfg.required_columns())?;
    // 3) derived columns append at the end, in this order
    let batch = derive_ratio(&batch, &cfg.ratio)?;
    let batch = synthesize_timestamps(&batch, &cfg.timestamp)?;
    // 4) categoricals last, once the ratio no longer reads them
    categorize(&batch, &cfg.categorical)
}

/// Read `bronze_path`, clean it and persist the result as
/// `silver_dir/file_name`.
#[instrument(level = "info", skip(silver_dir, cfg), fields(bronze = %bronze_path.display()))]
pub fn transform_to_silver(
    bronze_path: &Path,
    silver_dir: &Path,
    file_name: &str,
    cfg: &TransformConfig,
) -> Result<PathBuf> {
    let raw = load_bronze(bronze_path)?;
    let silver = transform(&raw, cfg)?;
    let out_path = write_artifact(&silver, silver_dir, file_name)?;
    info!(
        "[silver] wrote {} with {} rows",
        out_path.display(),
        silver.num_rows()
    );
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_artifact;
    use arrow::datatypes::{DataType, TimeUnit};
    use std::fs;
    use tempfile::tempdir;

    // no line continuation: it would eat the header's leading space
    const SAMPLE: &str = concat!(
        " Total Bill ,Tip,Sex,Smoker,Day,Time,Size\n",
        "16.99,1.01,Female,No,Sun,Dinner,2\n",
        "10.34,1.66,Male,No,Sun,Dinner,3\n",
        "21.01,3.5,Male,No,Sun,Dinner,3\n",
    );

    #[test]
    fn test_transform_to_silver() -> anyhow::Result<()> {
        crate::init_test_logging();
        let tmp = tempdir()?;
        let bronze = tmp.path().join("tips_raw.csv");
        fs::write(&bronze, SAMPLE)?;

        let out = transform_to_silver(
            &bronze,
            &tmp.path().join("silver"),
            "tips_clean.parquet",
            &TransformConfig::default(),
        )?;
        let silver = read_artifact(&out)?;

        assert_eq!(silver.num_rows(), 3);
        let schema = silver.schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "total_bill",
                "tip",
                "sex",
                "smoker",
                "day",
                "time",
                "size",
                "tip_pct",
                "visit_datetime"
            ]
        );
        assert_eq!(schema.field(0).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &categorical_type());
        assert_eq!(schema.field(6).data_type(), &DataType::Int64);
        assert_eq!(
            schema.field(8).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        Ok(())
    }

    #[test]
    fn test_missing_column_fails_fast() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let bronze = tmp.path().join("tips_raw.csv");
        fs::write(&bronze, "tip,sex,smoker,day,time\n1.0,Male,No,Sun,Dinner\n")?;

        let err = transform_to_silver(
            &bronze,
            tmp.path(),
            "tips_clean.parquet",
            &TransformConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "total_bill"));
        assert!(err.to_string().contains("total_bill"));
        assert!(!tmp.path().join("tips_clean.parquet").exists());
        Ok(())
    }

    #[test]
    fn test_transform_is_pure() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let bronze = tmp.path().join("tips_raw.csv");
        fs::write(&bronze, SAMPLE)?;
        let raw = load_bronze(&bronze)?;

        let first = transform(&raw, &TransformConfig::default())?;
        let second = transform(&raw, &TransformConfig::default())?;
        assert_eq!(first, second);
        assert_eq!(raw.schema().field(0).name(), " Total Bill ");
        Ok(())
    }
}
