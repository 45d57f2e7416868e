// src/aggregate.rs

use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, UInt64Array},
    compute::{cast, take},
    datatypes::{DataType, Field, FieldRef, Float64Type, Schema},
    record_batch::RecordBatch,
    row::{Row, RowConverter, SortField},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::store::{read_artifact, write_artifact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Mean,
    Sum,
    Count,
}

/// One named output measure, e.g. `avg_tip_pct = mean(tip_pct)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    pub func: AggKind,
    /// Input column; unused by `count`, which counts rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Measure {
    pub fn mean(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggKind::Mean,
            column: Some(column.into()),
        }
    }

    pub fn sum(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggKind::Sum,
            column: Some(column.into()),
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggKind::Count,
            column: None,
        }
    }
}

/// Grouping keys plus the measures computed per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub keys: Vec<String>,
    pub measures: Vec<Measure>,
}

impl AggregateSpec {
    /// Tip summary per (sex, smoker, day).
    pub fn tips() -> Self {
        Self {
            keys: vec!["sex".into(), "smoker".into(), "day".into()],
            measures: vec![
                Measure::mean("avg_tip_pct", "tip_pct"),
                Measure::sum("total_revenue", "total_bill"),
                Measure::count("rows"),
            ],
        }
    }

    fn check(&self, schema: &Schema) -> Result<()> {
        if self.keys.is_empty() {
            return Err(PipelineError::Aggregation("no grouping keys".into()));
        }
        if self.measures.is_empty() {
            return Err(PipelineError::Aggregation("no measures".into()));
        }
        let mut names = HashSet::new();
        for name in self
            .keys
            .iter()
            .chain(self.measures.iter().map(|m| &m.name))
        {
            if !names.insert(name.as_str()) {
                return Err(PipelineError::Aggregation(format!(
                    "output column `{name}` appears twice"
                )));
            }
        }
        for key in &self.keys {
            if schema.column_with_name(key).is_none() {
                return Err(PipelineError::Aggregation(format!(
                    "unknown grouping column `{key}`"
                )));
            }
        }
        for m in &self.measures {
            match (m.func, &m.column) {
                (AggKind::Count, _) => {}
                (_, None) => {
                    return Err(PipelineError::Aggregation(format!(
                        "measure `{}` needs an input column",
                        m.name
                    )))
                }
                (_, Some(col)) => match schema.column_with_name(col) {
                    None => {
                        return Err(PipelineError::Aggregation(format!(
                            "unknown measure column `{col}`"
                        )))
                    }
                    Some((_, f)) if !f.data_type().is_numeric() => {
                        return Err(PipelineError::Aggregation(format!(
                            "measure `{}` needs a numeric column, `{col}` is {}",
                            m.name,
                            f.data_type()
                        )))
                    }
                    Some(_) => {}
                },
            }
        }
        Ok(())
    }
}

/// Running totals for one group.
struct Group {
    first_row: u64,
    rows: i64,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

/// Group `batch` by `spec.keys` and compute `spec.measures`.
///
/// Only observed key combinations produce a row; groups come out in ascending
/// order of the typed key values, nulls first. Mean and sum skip null inputs,
/// count is the number of rows.
pub fn aggregate(batch: &RecordBatch, spec: &AggregateSpec) -> Result<RecordBatch> {
    let schema = batch.schema();
    spec.check(&schema)?;

    // 1) keys in the row format: comparable bytes that order like the values
    let key_cols: Vec<ArrayRef> = spec
        .keys
        .iter()
        .map(|k| -> Result<ArrayRef> { Ok(batch.column(schema.index_of(k)?).clone()) })
        .collect::<Result<_>>()?;
    let converter = RowConverter::new(
        key_cols
            .iter()
            .map(|c| SortField::new(c.data_type().clone()))
            .collect(),
    )?;
    let key_rows = converter.convert_columns(&key_cols)?;

    // 2) measure inputs as Float64; count needs none
    let inputs: Vec<Option<ArrayRef>> = spec
        .measures
        .iter()
        .map(|m| -> Result<Option<ArrayRef>> {
            match (&m.func, &m.column) {
                (AggKind::Count, _) | (_, None) => Ok(None),
                (_, Some(col)) => Ok(Some(cast(
                    batch.column(schema.index_of(col)?),
                    &DataType::Float64,
                )?)),
            }
        })
        .collect::<Result<_>>()?;

    // 3) one pass accumulating per group
    let mut groups: BTreeMap<Row<'_>, Group> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let group = groups.entry(key_rows.row(row)).or_insert_with(|| Group {
            first_row: row as u64,
            rows: 0,
            sums: vec![0.0; inputs.len()],
            counts: vec![0; inputs.len()],
        });
        group.rows += 1;
        for (i, input) in inputs.iter().enumerate() {
            if let Some(values) = input {
                let values = values.as_primitive::<Float64Type>();
                if values.is_valid(row) {
                    group.sums[i] += values.value(row);
                    group.counts[i] += 1;
                }
            }
        }
    }
    debug!(groups = groups.len(), rows = batch.num_rows(), "grouped");

    // 4) keys keep their type: take each group's first row
    let firsts = UInt64Array::from_iter_values(groups.values().map(|g| g.first_row));
    let mut fields: Vec<FieldRef> = Vec::with_capacity(spec.keys.len() + spec.measures.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());

    for (key, col) in spec.keys.iter().zip(&key_cols) {
        let (_, field) = schema
            .column_with_name(key)
            .ok_or_else(|| PipelineError::Aggregation(format!("unknown grouping column `{key}`")))?;
        fields.push(Arc::new(field.clone()));
        columns.push(take(col.as_ref(), &firsts, None)?);
    }

    // 5) measures, in spec order
    for (i, m) in spec.measures.iter().enumerate() {
        let array: ArrayRef = match m.func {
            AggKind::Count => Arc::new(Int64Array::from_iter_values(
                groups.values().map(|g| g.rows),
            )),
            AggKind::Sum => Arc::new(Float64Array::from_iter_values(
                groups.values().map(|g| g.sums[i]),
            )),
            AggKind::Mean => Arc::new(
                groups
                    .values()
                    .map(|g| (g.counts[i] > 0).then(|| g.sums[i] / g.counts[i] as f64))
                    .collect::<Float64Array>(),
            ),
        };
        let nullable = m.func == AggKind::Mean;
        fields.push(Arc::new(Field::new(
            &m.name,
            array.data_type().clone(),
            nullable,
        )));
        columns.push(array);
    }

    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        columns,
    )?)
}

/// Summarize the silver artifact into `gold_dir/file_name`, replacing any
/// previous gold file.
#[instrument(level = "info", skip(gold_dir, spec), fields(silver = %silver_path.display()))]
pub fn aggregate_to_gold(
    silver_path: &Path,
    gold_dir: &Path,
    file_name: &str,
    spec: &AggregateSpec,
) -> Result<PathBuf> {
    let silver = read_artifact(silver_path)?;
    let summary = aggregate(&silver, spec)?;
    let out_path = write_artifact(&summary, gold_dir, file_name)?;
    info!(
        "[gold] wrote {} with {} rows",
        out_path.display(),
        summary.num_rows()
    );
    Ok(out_path)
}
