// src/fetch/mod.rs

use csv::{ReaderBuilder, WriterBuilder};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{PipelineError, Result};

/// Where the raw dataset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(Url),
    Path(PathBuf),
}

impl Source {
    /// `http(s)://` locations are fetched over the network, everything else
    /// (including `file://` URLs) is read from disk.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Source::Url(url),
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => Source::Path(path),
                Err(()) => Source::Path(PathBuf::from(location)),
            },
            _ => Source::Path(PathBuf::from(location)),
        }
    }

    /// Fetch the whole dataset into memory. No retries.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            Source::Url(url) => {
                let resp = reqwest::blocking::get(url.as_str())
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| PipelineError::fetch(url.as_str(), e))?;
                let bytes = resp
                    .bytes()
                    .map_err(|e| PipelineError::fetch(url.as_str(), e))?;
                Ok(bytes.to_vec())
            }
            Source::Path(path) => {
                fs::read(path).map_err(|e| PipelineError::fetch(path.display().to_string(), e))
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(url) => write!(f, "{}", url),
            Source::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Copy `source` into `bronze_dir/file_name` as comma-delimited text and
/// return the written path.
///
/// The payload is parsed only to re-serialize it: no column is renamed,
/// retyped or dropped.
#[instrument(level = "info", skip_all, fields(source = %source))]
pub fn extract_to_bronze(source: &Source, bronze_dir: &Path, file_name: &str) -> Result<PathBuf> {
    // 1) whole payload in memory
    let raw = source.read_all()?;
    debug!(bytes = raw.len(), "fetched");

    // 2) a header row is the only structure we insist on
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(raw.as_slice());
    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        return Err(PipelineError::fetch(
            source.to_string(),
            "dataset has no header row",
        ));
    }

    // 3) re-serialize record by record into a temp file, then swap it in
    fs::create_dir_all(bronze_dir)?;
    let out_path = bronze_dir.join(file_name);
    let tmp = NamedTempFile::new_in(bronze_dir)?;

    let mut rows = 0usize;
    {
        let mut wtr = WriterBuilder::new().from_writer(tmp.reopen()?);
        wtr.write_record(&headers)?;
        for record in rdr.records() {
            wtr.write_record(&record?)?;
            rows += 1;
        }
        wtr.flush()?;
    }

    tmp.persist(&out_path)
        .map_err(|e| PipelineError::Io(e.error))?;
    info!("[bronze] wrote {} with {} rows", out_path.display(), rows);
    Ok(out_path)
}
