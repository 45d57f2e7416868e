// src/process/derive.rs

use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Builder, TimestampMicrosecondArray},
    compute::cast,
    datatypes::{DataType, Field, Float64Type, TimeUnit},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::columns::{append_column, replace_column};
use super::{DivisionPolicy, RatioRule, TimestampRule};
use crate::error::{PipelineError, Result};

/// Arrow type used for categorical columns.
pub fn categorical_type() -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
}

/// Round half to even at `decimals` places.
fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round_ties_even() / scale
}

/// Append `rule.output = round(numerator / denominator, decimals)`.
///
/// Null inputs give a null output. A zero denominator is handled by
/// `rule.on_zero`.
pub fn derive_ratio(batch: &RecordBatch, rule: &RatioRule) -> Result<RecordBatch> {
    let schema = batch.schema();
    let num = cast(batch.column(schema.index_of(&rule.numerator)?), &DataType::Float64)?;
    let den = cast(batch.column(schema.index_of(&rule.denominator)?), &DataType::Float64)?;
    let num = num.as_primitive::<Float64Type>();
    let den = den.as_primitive::<Float64Type>();

    let mut out = Float64Builder::with_capacity(batch.num_rows());
    let mut zero_rows = 0usize;
    for row in 0..batch.num_rows() {
        if num.is_null(row) || den.is_null(row) {
            out.append_null();
            continue;
        }
        let d = den.value(row);
        if d == 0.0 {
            match rule.on_zero {
                DivisionPolicy::Nan => {
                    zero_rows += 1;
                    out.append_value(f64::NAN);
                }
                DivisionPolicy::Fail => {
                    return Err(PipelineError::DivisionByZero {
                        column: rule.output.clone(),
                        row,
                    })
                }
            }
            continue;
        }
        out.append_value(round_to(num.value(row) / d, rule.decimals));
    }
    if zero_rows > 0 {
        warn!(
            column = %rule.output,
            rows = zero_rows,
            "zero denominator, values set to NaN"
        );
    }

    append_column(
        batch,
        Field::new(&rule.output, DataType::Float64, true),
        Arc::new(out.finish()),
    )
}

/// Append a timestamp column `origin + i * step` for every row `i`.
///
/// A non-positive step, or a last value outside the i64 microsecond range,
/// is a `Config` error.
pub fn synthesize_timestamps(batch: &RecordBatch, rule: &TimestampRule) -> Result<RecordBatch> {
    let origin = rule.origin.and_utc().timestamp_micros();
    let step = rule.step_micros()?;

    // the last row has the largest offset; if it fits, every row does
    let last = batch.num_rows().saturating_sub(1) as i64;
    last.checked_mul(step)
        .and_then(|offset| origin.checked_add(offset))
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "`{}` overflows after {} rows of {}s",
                rule.column,
                batch.num_rows(),
                rule.step_secs
            ))
        })?;

    let values = (0..batch.num_rows() as i64).map(|i| origin + i * step);
    let array = TimestampMicrosecondArray::from_iter_values(values);

    append_column(
        batch,
        Field::new(
            &rule.column,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Arc::new(array),
    )
}

/// Recast every column in `columns` as a dictionary-encoded string column.
pub fn categorize<S: AsRef<str>>(batch: &RecordBatch, columns: &[S]) -> Result<RecordBatch> {
    let target = categorical_type();
    let mut out = batch.clone();
    for name in columns {
        let idx = out.schema().index_of(name.as_ref())?;
        let recast: ArrayRef = cast(out.column(idx), &target)?;
        debug!(
            column = name.as_ref(),
            categories = recast.as_any_dictionary().values().len(),
            "categorized"
        );
        out = replace_column(&out, idx, recast)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Float64Array, Int64Array, StringArray},
        datatypes::Schema,
    };
    use chrono::NaiveDate;

    fn bills(total: Vec<Option<f64>>, tip: Vec<Option<f64>>) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("total_bill", DataType::Float64, true),
            Field::new("tip", DataType::Float64, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Float64Array::from(total)),
                Arc::new(Float64Array::from(tip)),
            ],
        )
        .unwrap()
    }

    fn ratio_rule(on_zero: DivisionPolicy) -> RatioRule {
        RatioRule {
            on_zero,
            ..RatioRule::default()
        }
    }

    fn ratio_values(batch: &RecordBatch) -> Vec<Option<f64>> {
        let idx = batch.schema().index_of("tip_pct").unwrap();
        batch
            .column(idx)
            .as_primitive::<Float64Type>()
            .iter()
            .collect()
    }

    #[test]
    fn test_ratio_rounds_to_four_places() {
        let batch = bills(vec![Some(16.99), Some(10.34)], vec![Some(1.01), Some(1.66)]);
        let out = derive_ratio(&batch, &ratio_rule(DivisionPolicy::Nan)).unwrap();
        assert_eq!(ratio_values(&out), vec![Some(0.0594), Some(0.1605)]);
    }

    #[test]
    fn test_ratio_within_unit_interval() {
        let total: Vec<Option<f64>> = (1..=50).map(|i| Some(i as f64 * 3.5)).collect();
        let tip: Vec<Option<f64>> = (1..=50).map(|i| Some((i % 7) as f64 * 0.25)).collect();
        let out = derive_ratio(&bills(total, tip), &ratio_rule(DivisionPolicy::Nan)).unwrap();
        for v in ratio_values(&out).into_iter().flatten() {
            assert!((0.0..=1.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn test_ratio_propagates_nulls() {
        let batch = bills(vec![None, Some(10.0)], vec![Some(1.0), None]);
        let out = derive_ratio(&batch, &ratio_rule(DivisionPolicy::Nan)).unwrap();
        assert_eq!(ratio_values(&out), vec![None, None]);
    }

    #[test]
    fn test_zero_denominator_nan_policy() {
        let batch = bills(vec![Some(0.0), Some(20.0)], vec![Some(1.0), Some(2.0)]);
        let out = derive_ratio(&batch, &ratio_rule(DivisionPolicy::Nan)).unwrap();
        let values = ratio_values(&out);
        assert!(values[0].unwrap().is_nan());
        assert_eq!(values[1], Some(0.1));
    }

    #[test]
    fn test_zero_denominator_fail_policy() {
        let batch = bills(vec![Some(20.0), Some(0.0)], vec![Some(2.0), Some(0.0)]);
        let err = derive_ratio(&batch, &ratio_rule(DivisionPolicy::Fail)).unwrap_err();
        assert!(matches!(err, PipelineError::DivisionByZero { row: 1, .. }), "got {err:?}");
    }

    #[test]
    fn test_ratio_accepts_integer_inputs() {
        let schema = Schema::new(vec![
            Field::new("total_bill", DataType::Int64, true),
            Field::new("tip", DataType::Int64, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![8, 3])),
                Arc::new(Int64Array::from(vec![1, 1])),
            ],
        )
        .unwrap();
        let out = derive_ratio(&batch, &ratio_rule(DivisionPolicy::Nan)).unwrap();
        assert_eq!(ratio_values(&out), vec![Some(0.125), Some(0.3333)]);
    }

    #[test]
    fn test_timestamps_hourly_from_origin() {
        let batch = bills(vec![Some(1.0); 5], vec![Some(0.1); 5]);
        let rule = TimestampRule::default();
        let out = synthesize_timestamps(&batch, &rule).unwrap();

        let idx = out.schema().index_of("visit_datetime").unwrap();
        let ts = out.column(idx).as_primitive::<arrow::datatypes::TimestampMicrosecondType>();
        assert_eq!(ts.len(), 5);
        let origin = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        assert_eq!(ts.value(0), origin);
        for w in ts.values().windows(2) {
            assert_eq!(w[1] - w[0], 3_600_000_000);
        }
    }

    #[test]
    fn test_timestamp_step_must_be_positive() {
        let batch = bills(vec![Some(1.0); 3], vec![Some(0.1); 3]);
        for step_secs in [0, -3600] {
            let rule = TimestampRule {
                step_secs,
                ..TimestampRule::default()
            };
            let err = synthesize_timestamps(&batch, &rule).unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)), "step {step_secs}: {err:?}");
        }
    }

    #[test]
    fn test_timestamp_overflow_is_an_error() {
        let batch = bills(vec![Some(1.0); 3], vec![Some(0.1); 3]);

        // step itself does not fit in microseconds
        let rule = TimestampRule {
            step_secs: i64::MAX / 1000,
            ..TimestampRule::default()
        };
        assert!(matches!(
            synthesize_timestamps(&batch, &rule),
            Err(PipelineError::Config(_))
        ));

        // step fits, but origin + 2 * step does not
        let rule = TimestampRule {
            step_secs: i64::MAX / 2_000_000,
            ..TimestampRule::default()
        };
        assert!(matches!(
            synthesize_timestamps(&batch, &rule),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_categorize_to_dictionary() {
        let schema = Schema::new(vec![Field::new("day", DataType::Utf8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["Sun", "Sat", "Sun"]))],
        )
        .unwrap();
        let out = categorize(&batch, &["day"]).unwrap();
        assert_eq!(out.schema().field(0).data_type(), &categorical_type());
        assert_eq!(out.column(0).as_any_dictionary().values().len(), 2);
    }
}
