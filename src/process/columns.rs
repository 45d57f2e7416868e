// src/process/columns.rs

use arrow::{
    array::ArrayRef,
    datatypes::{Field, FieldRef, Schema},
    record_batch::RecordBatch,
};
use std::{collections::HashMap, sync::Arc};

use crate::error::{PipelineError, Result};

/// Trim whitespace, strip wrapping quotes, lower-case and turn spaces into
/// underscores. Applying it twice gives the same result as applying it once.
pub fn normalize_name(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// Rename every column with [`normalize_name`]. Data is shared, not copied.
pub fn normalize_columns(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(schema.fields().len());
    let mut fields: Vec<FieldRef> = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let name = normalize_name(field.name());
        if let Some(first) = seen.insert(name.clone(), field.name()) {
            return Err(PipelineError::DuplicateColumn {
                first: first.to_string(),
                second: field.name().clone(),
                normalized: name,
            });
        }
        fields.push(Arc::new(field.as_ref().clone().with_name(name)));
    }

    let renamed = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new(
        Arc::new(renamed),
        batch.columns().to_vec(),
    )?)
}

/// Fail on the first of `required` that `batch` does not carry.
pub fn require_columns<S: AsRef<str>>(batch: &RecordBatch, required: &[S]) -> Result<()> {
    let schema = batch.schema();
    for name in required {
        let name = name.as_ref();
        if schema.column_with_name(name).is_none() {
            return Err(PipelineError::MissingColumn {
                column: name.to_string(),
                available: schema.fields().iter().map(|f| f.name().clone()).collect(),
            });
        }
    }
    Ok(())
}

/// Append `array` as a new last column.
pub(crate) fn append_column(batch: &RecordBatch, field: Field, array: ArrayRef) -> Result<RecordBatch> {
    if batch.schema().column_with_name(field.name()).is_some() {
        return Err(PipelineError::ColumnExists {
            column: field.name().clone(),
        });
    }
    let schema = batch.schema();
    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    fields.push(Arc::new(field));
    let mut columns = batch.columns().to_vec();
    columns.push(array);

    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

/// Swap column `idx` for `array`, keeping name and nullability.
pub(crate) fn replace_column(batch: &RecordBatch, idx: usize, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    fields[idx] = Arc::new(
        fields[idx]
            .as_ref()
            .clone()
            .with_data_type(array.data_type().clone()),
    );
    let mut columns = batch.columns().to_vec();
    columns[idx] = array;

    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}
