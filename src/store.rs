// src/store.rs

use arrow::{compute::concat_batches, record_batch::RecordBatch};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::{
        properties::WriterProperties,
        reader::{FileReader, SerializedFileReader},
    },
};
use serde::Serialize;
use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};

/// Directory layout of one pipeline: `<root>/{bronze,silver,gold}`.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bronze(&self) -> PathBuf {
        self.root.join("bronze")
    }

    pub fn silver(&self) -> PathBuf {
        self.root.join("silver")
    }

    pub fn gold(&self) -> PathBuf {
        self.root.join("gold")
    }

    /// Create all three layer directories.
    pub fn create_all(&self) -> Result<()> {
        for dir in [self.bronze(), self.silver(), self.gold()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Persist `batch` as a single Parquet file at `dir/file_name`.
///
/// The file is written to a temp file in `dir` and renamed over any previous
/// artifact, so readers never see a half-written file.
#[instrument(level = "debug", skip(batch), fields(rows = batch.num_rows()))]
pub fn write_artifact(batch: &RecordBatch, dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    // 1) temp file next to the target, so the rename stays on one filesystem
    let tmp = NamedTempFile::new_in(dir)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    // 2) whole batch, Arrow schema embedded in the footer
    let mut writer = ArrowWriter::try_new(tmp.reopen()?, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    // 3) atomic replace of the previous artifact
    tmp.persist(&path).map_err(|e| PipelineError::Io(e.error))?;
    debug!(path = %path.display(), "artifact persisted");
    Ok(path)
}

/// Read a whole Parquet artifact back into one `RecordBatch`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn read_artifact(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    debug!(rows = batch.num_rows(), "artifact loaded");
    Ok(batch)
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub physical: String,
    pub logical: String,
    pub compression: String,
}

/// File-level metadata of a Parquet artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub created_by: Option<String>,
    pub rows: i64,
    pub row_groups: usize,
    pub size_bytes: u64,
    pub columns: Vec<ColumnInfo>,
}

/// Read the footer of a Parquet file without decoding any data pages.
pub fn inspect(path: &Path) -> Result<ArtifactInfo> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let meta = reader.metadata();
    let file_meta = meta.file_metadata();

    // compression is per column chunk; report the first row group's
    let first_rg = (meta.num_row_groups() > 0).then(|| meta.row_group(0));
    let columns = file_meta
        .schema_descr()
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| ColumnInfo {
            name: col.name().to_string(),
            physical: format!("{:?}", col.physical_type()),
            logical: col
                .logical_type()
                .as_ref()
                .map_or("<none>".to_string(), |lt| format!("{lt:?}")),
            compression: first_rg
                .map_or("<none>".to_string(), |rg| format!("{:?}", rg.column(i).compression())),
        })
        .collect();

    Ok(ArtifactInfo {
        path: path.to_path_buf(),
        created_by: file_meta.created_by().map(String::from),
        rows: file_meta.num_rows(),
        row_groups: meta.num_row_groups(),
        size_bytes: fs::metadata(path)?.len(),
        columns,
    })
}

impl fmt::Display for ArtifactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Parquet File: {} ===", self.path.display())?;
        writeln!(
            f,
            "Created by:           {}",
            self.created_by.as_deref().unwrap_or("<unknown>")
        )?;
        writeln!(f, "Total rows:           {}", self.rows)?;
        writeln!(f, "Number of row groups: {}", self.row_groups)?;
        writeln!(f, "File size on disk:    {} bytes", self.size_bytes)?;
        writeln!(f)?;
        writeln!(f, "=== Columns ===")?;
        for c in &self.columns {
            writeln!(
                f,
                "- {:<25} | Physical: {:<10} | Compression: {:<8} | Logical: {}",
                c.name, c.physical, c.compression, c.logical
            )?;
        }
        Ok(())
    }
}
