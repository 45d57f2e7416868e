// src/schema/validate.rs

use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::{cast, cast_with_options, CastOptions},
    datatypes::{DataType, Float64Type, TimeUnit, TimestampMicrosecondType},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::{fmt, path::Path};
use tracing::{info, instrument, warn};

use super::contract::{Bounds, Check, ColumnRule, ColumnType, Contract};
use crate::error::{PipelineError, Result};
use crate::store::read_artifact;

/// How many failing row indices a violation keeps.
const SAMPLE_LIMIT: usize = 5;

/// One failing column/rule pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub column: String,
    pub rule: String,
    pub failing_rows: usize,
    /// First few failing row indices, in row order.
    pub sample_rows: Vec<usize>,
}

impl Violation {
    fn new(column: &str, rule: impl Into<String>, rows: impl IntoIterator<Item = usize>) -> Self {
        let mut failing_rows = 0;
        let mut sample_rows = Vec::new();
        for row in rows {
            failing_rows += 1;
            if sample_rows.len() < SAMPLE_LIMIT {
                sample_rows.push(row);
            }
        }
        Self {
            column: column.to_string(),
            rule: rule.into(),
            failing_rows,
            sample_rows,
        }
    }
}

/// Outcome of running a [`Contract`] over a whole frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub rows: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Distinct columns with at least one violation, in report order.
    pub fn failing_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        for v in &self.violations {
            if !cols.contains(&v.column.as_str()) {
                cols.push(&v.column);
            }
        }
        cols
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "all checks passed over {} rows", self.rows);
        }
        write!(
            f,
            "{} violation(s) over {} rows",
            self.violations.len(),
            self.rows
        )?;
        for v in &self.violations {
            write!(
                f,
                "\n  - {}: {} failed for {} row(s), first rows {:?}",
                v.column, v.rule, v.failing_rows, v.sample_rows
            )?;
        }
        Ok(())
    }
}

/// Parse the timestamp spellings found in delimited text.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim().trim_matches('"');
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn is_float(dt: &DataType) -> bool {
    matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

/// Per-row "value missing" flags: null, or NaN for float columns.
fn missing_mask(original: &ArrayRef, typed: &ArrayRef) -> Result<Vec<bool>> {
    let mut missing: Vec<bool> = (0..original.len()).map(|i| original.is_null(i)).collect();
    if is_float(typed.data_type()) {
        let floats = cast(typed, &DataType::Float64)?;
        for (i, v) in floats.as_primitive::<Float64Type>().iter().enumerate() {
            if v.is_some_and(f64::is_nan) {
                missing[i] = true;
            }
        }
    }
    Ok(missing)
}

/// Rows (among the present ones) that fail `check`. `Err` means the check
/// cannot be evaluated against a column of this type.
fn failing_rows(
    check: &Check,
    typed: &ArrayRef,
    missing: &[bool],
) -> std::result::Result<Vec<usize>, String> {
    let present = |i: &usize| !missing[*i] && typed.is_valid(*i);

    match check {
        Check::NonNegative | Check::Range { .. } | Check::MinCardinality(_) => {
            if !typed.data_type().is_numeric() {
                return Err(format!("{check} needs a numeric column"));
            }
            let floats = cast(typed, &DataType::Float64).map_err(|e| e.to_string())?;
            let values = floats.as_primitive::<Float64Type>();
            let ok = |v: f64| match check {
                Check::NonNegative => v >= 0.0,
                Check::Range {
                    lo,
                    hi,
                    bounds: Bounds::Closed,
                } => *lo <= v && v <= *hi,
                Check::Range {
                    lo,
                    hi,
                    bounds: Bounds::HalfOpen,
                } => *lo <= v && v < *hi,
                Check::MinCardinality(n) => v.fract() == 0.0 && v >= *n as f64,
                _ => true,
            };
            Ok((0..typed.len())
                .filter(present)
                .filter(|&i| !ok(values.value(i)))
                .collect())
        }
        Check::ValidTimestamp => match typed.data_type() {
            DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
                let micros = cast(typed, &DataType::Timestamp(TimeUnit::Microsecond, None))
                    .map_err(|e| e.to_string())?;
                let micros = micros.as_primitive::<TimestampMicrosecondType>();
                Ok((0..typed.len())
                    .filter(present)
                    .filter(|&i| DateTime::from_timestamp_micros(micros.value(i)).is_none())
                    .collect())
            }
            dt if ColumnType::Text.accepts(dt) => {
                let text = cast(typed, &DataType::Utf8).map_err(|e| e.to_string())?;
                let text = text.as_string::<i32>();
                Ok((0..typed.len())
                    .filter(present)
                    .filter(|&i| parse_timestamp(text.value(i)).is_none())
                    .collect())
            }
            dt => Err(format!("{check} cannot read {dt}")),
        },
        Check::OneOf(domain) => {
            let text = cast(typed, &DataType::Utf8).map_err(|e| e.to_string())?;
            let text = text.as_string::<i32>();
            Ok((0..typed.len())
                .filter(present)
                .filter(|&i| !domain.iter().any(|d| d == text.value(i)))
                .collect())
        }
    }
}

fn check_column(
    batch: &RecordBatch,
    rule: &ColumnRule,
    coerce: bool,
    out: &mut Vec<Violation>,
) -> Result<()> {
    let rows = batch.num_rows();
    let col = rule.column.as_str();
    let schema = batch.schema();
    let Some((idx, _)) = schema.column_with_name(col) else {
        out.push(Violation::new(col, "column_present", 0..rows));
        return Ok(());
    };
    let original = batch.column(idx).clone();

    let typed: ArrayRef = if rule.dtype.accepts(original.data_type()) {
        original.clone()
    } else if coerce {
        let opts = CastOptions {
            safe: true,
            ..Default::default()
        };
        let rule_name = format!("coerce_to_{}", rule.dtype.as_str());
        match cast_with_options(&original, &rule.dtype.arrow_type(), &opts) {
            Ok(coerced) => {
                let failed = (0..rows).filter(|&i| original.is_valid(i) && coerced.is_null(i));
                let v = Violation::new(col, rule_name, failed);
                if v.failing_rows > 0 {
                    out.push(v);
                }
                coerced
            }
            Err(e) => {
                warn!(column = col, error = %e, "cannot coerce");
                out.push(Violation::new(col, rule_name, 0..rows));
                return Ok(());
            }
        }
    } else {
        out.push(Violation::new(
            col,
            format!("dtype({})", rule.dtype.as_str()),
            0..rows,
        ));
        return Ok(());
    };

    let missing = missing_mask(&original, &typed)?;
    if !rule.nullable {
        let v = Violation::new(col, "not_null", (0..rows).filter(|&i| missing[i]));
        if v.failing_rows > 0 {
            out.push(v);
        }
    }

    for check in &rule.checks {
        match failing_rows(check, &typed, &missing) {
            Ok(failed) if failed.is_empty() => {}
            Ok(failed) => out.push(Violation::new(col, check.to_string(), failed)),
            Err(reason) => {
                warn!(column = col, %reason, "check not applicable");
                out.push(Violation::new(col, check.to_string(), 0..rows));
            }
        }
    }
    Ok(())
}

/// Run every rule of `contract` against every row of `batch` and collect all
/// violations. Never stops at the first failure.
pub fn validate(batch: &RecordBatch, contract: &Contract) -> Result<ValidationReport> {
    let mut violations = Vec::new();
    for rule in &contract.columns {
        check_column(batch, rule, contract.coerce, &mut violations)?;
    }
    Ok(ValidationReport {
        rows: batch.num_rows(),
        violations,
    })
}

/// Quality gate between silver and gold. Any violation is a hard error that
/// carries the full report.
#[instrument(level = "info", skip_all, fields(silver = %silver_path.display()))]
pub fn validate_silver(silver_path: &Path, contract: &Contract) -> Result<ValidationReport> {
    let batch = read_artifact(silver_path)?;
    let report = validate(&batch, contract)?;
    if !report.passed() {
        return Err(PipelineError::Validation(report));
    }
    info!("[quality] silver passed validation ({} rows)", report.rows);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_artifact;
    use arrow::{
        array::{Float64Array, Int64Array, StringArray, TimestampMicrosecondArray},
        datatypes::{Field, Schema},
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn silver(total: Vec<f64>, tip_pct: Vec<f64>, size: Vec<i64>) -> RecordBatch {
        let n = total.len();
        let tip: Vec<f64> = total.iter().map(|t| t * 0.15).collect();
        let schema = Schema::new(vec![
            Field::new("total_bill", DataType::Float64, true),
            Field::new("tip", DataType::Float64, true),
            Field::new("tip_pct", DataType::Float64, true),
            Field::new("size", DataType::Int64, true),
            Field::new(
                "visit_datetime",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Float64Array::from(total)),
                Arc::new(Float64Array::from(tip)),
                Arc::new(Float64Array::from(tip_pct)),
                Arc::new(Int64Array::from(size)),
                Arc::new(TimestampMicrosecondArray::from_iter_values(
                    (0..n as i64).map(|i| i * 3_600_000_000),
                )),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_valid_frame_passes() {
        let batch = silver(vec![16.99, 10.34, 21.01], vec![0.0594, 0.1605, 0.1666], vec![2, 3, 3]);
        let report = validate(&batch, &Contract::tips()).unwrap();
        assert!(report.passed(), "{report}");
        assert_eq!(report.rows, 3);
    }

    #[test]
    fn test_negative_value_is_reported() {
        let batch = silver(vec![16.99, -3.0, 21.01], vec![0.1, 0.1, 0.1], vec![2, 3, 3]);
        let report = validate(&batch, &Contract::tips()).unwrap();
        assert!(!report.passed());
        assert!(report.failing_columns().contains(&"total_bill"));
        let v = &report.violations[0];
        assert_eq!(v.rule, "non_negative");
        assert_eq!(v.failing_rows, 1);
        assert_eq!(v.sample_rows, vec![1]);
    }

    #[test]
    fn test_all_violations_are_collected() {
        // negative bill and tip, tip_pct above 1, zero party size
        let batch = silver(vec![-1.0, 10.0, 10.0, 10.0], vec![0.1, 1.5, 0.2, 0.2], vec![1, 2, 0, 0]);
        let report = validate(&batch, &Contract::tips()).unwrap();

        let pairs: Vec<(&str, &str, usize)> = report
            .violations
            .iter()
            .map(|v| (v.column.as_str(), v.rule.as_str(), v.failing_rows))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("total_bill", "non_negative", 1),
                ("tip", "non_negative", 1),
                ("tip_pct", "range[0, 1]", 1),
                ("size", "min_cardinality(1)", 2),
            ]
        );
        let msg = PipelineError::Validation(report).to_string();
        assert!(msg.contains("4 violation(s)"));
        assert!(msg.contains("size: min_cardinality(1) failed for 2 row(s)"));
    }

    #[test]
    fn test_nan_counts_as_missing() {
        let batch = silver(vec![10.0, 10.0], vec![f64::NAN, 0.1], vec![2, 2]);
        let report = validate(&batch, &Contract::tips()).unwrap();
        assert_eq!(report.violations.len(), 1, "{report}");
        assert_eq!(report.violations[0].column, "tip_pct");
        assert_eq!(report.violations[0].rule, "not_null");
    }

    #[test]
    fn test_missing_column_is_a_violation() {
        let batch = silver(vec![1.0], vec![0.1], vec![1]);
        let contract = Contract {
            coerce: true,
            columns: vec![ColumnRule::new("day", ColumnType::Text)],
        };
        let report = validate(&batch, &contract).unwrap();
        assert_eq!(report.violations[0].rule, "column_present");
    }

    #[test]
    fn test_coerce_text_numbers() {
        let schema = Schema::new(vec![Field::new("size", DataType::Utf8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["2", "three", "4"]))],
        )
        .unwrap();
        let rule = ColumnRule::new("size", ColumnType::Int).check(Check::MinCardinality(1));

        let coerced = validate(
            &batch,
            &Contract {
                coerce: true,
                columns: vec![rule.clone()],
            },
        )
        .unwrap();
        assert_eq!(coerced.violations.len(), 1);
        assert_eq!(coerced.violations[0].rule, "coerce_to_int");
        assert_eq!(coerced.violations[0].sample_rows, vec![1]);

        let strict = validate(
            &batch,
            &Contract {
                coerce: false,
                columns: vec![rule],
            },
        )
        .unwrap();
        assert_eq!(strict.violations[0].rule, "dtype(int)");
        assert_eq!(strict.violations[0].failing_rows, 3);
    }

    #[test]
    fn test_text_timestamps() {
        let schema = Schema::new(vec![Field::new("at", DataType::Utf8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec![
                Some("2024-01-01 00:00:00"),
                Some("2024/12/22 00:05:00"),
                Some("not a date"),
                None,
            ]))],
        )
        .unwrap();
        let contract = Contract {
            coerce: false,
            columns: vec![ColumnRule::new("at", ColumnType::Text)
                .nullable()
                .check(Check::ValidTimestamp)],
        };
        let report = validate(&batch, &contract).unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].sample_rows, vec![2]);
    }

    #[test]
    fn test_categorical_domain() {
        let schema = Schema::new(vec![Field::new("day", DataType::Utf8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["Sun", "Mon", "Sat"]))],
        )
        .unwrap();
        let contract = Contract {
            coerce: true,
            columns: vec![ColumnRule::new("day", ColumnType::Text)
                .check(Check::one_of(["Thur", "Fri", "Sat", "Sun"]))],
        };
        let report = validate(&batch, &contract).unwrap();
        assert_eq!(report.violations[0].sample_rows, vec![1]);
    }

    #[test]
    fn test_validate_silver_is_a_hard_gate() {
        crate::init_test_logging();
        let tmp = tempdir().unwrap();
        let good = write_artifact(
            &silver(vec![5.0], vec![0.2], vec![1]),
            tmp.path(),
            "good.parquet",
        )
        .unwrap();
        let bad = write_artifact(
            &silver(vec![-5.0], vec![0.2], vec![1]),
            tmp.path(),
            "bad.parquet",
        )
        .unwrap();

        assert!(validate_silver(&good, &Contract::tips()).is_ok());
        match validate_silver(&bad, &Contract::tips()) {
            Err(PipelineError::Validation(report)) => {
                assert_eq!(report.failing_columns(), vec!["total_bill", "tip"]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2024-01-01T05:00:00Z").is_some());
        assert!(parse_timestamp("2024-01-01 05:00:00").is_some());
        assert!(parse_timestamp("\"2024/12/14 18:02:37\"").is_some());
        assert!(parse_timestamp("2024-01-01").is_some());
        assert!(parse_timestamp("2024-13-01").is_none());
    }
}
