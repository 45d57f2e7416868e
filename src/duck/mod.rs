// src/duck/mod.rs

use chrono::{DateTime, NaiveDate};
use duckdb::{
    types::{TimeUnit, Value},
    Connection,
};
use serde::Serialize;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFunc {
    Avg,
    Sum,
    Count,
}

impl QueryFunc {
    fn sql(&self) -> &'static str {
        match self {
            QueryFunc::Avg => "AVG",
            QueryFunc::Sum => "SUM",
            QueryFunc::Count => "COUNT",
        }
    }
}

/// `func(column) AS alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMeasure {
    pub func: QueryFunc,
    pub column: String,
    pub alias: String,
}

impl QueryMeasure {
    pub fn new(func: QueryFunc, column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            func,
            column: column.into(),
            alias: alias.into(),
        }
    }
}

/// A grouped, ordered aggregate over one Parquet file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedQuery {
    pub source: PathBuf,
    pub group_by: Vec<String>,
    pub measures: Vec<QueryMeasure>,
    pub order_by: String,
    pub descending: bool,
}

/// Double-quote an identifier for DuckDB.
fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl GroupedQuery {
    /// Output column names, in result order.
    pub fn columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .cloned()
            .chain(self.measures.iter().map(|m| m.alias.clone()))
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.group_by.is_empty() {
            return Err(PipelineError::Query("no group-by columns".into()));
        }
        if self.measures.is_empty() {
            return Err(PipelineError::Query("no measures".into()));
        }
        if !self.columns().contains(&self.order_by) {
            return Err(PipelineError::Query(format!(
                "cannot order by `{}`: not a group-by column or measure alias",
                self.order_by
            )));
        }
        Ok(())
    }

    /// Render the query as DuckDB SQL reading the file in place.
    pub fn to_sql(&self) -> Result<String> {
        self.check()?;
        let keys: Vec<String> = self.group_by.iter().map(|k| ident(k)).collect();
        let measures: Vec<String> = self
            .measures
            .iter()
            .map(|m| {
                format!(
                    "{}({}) AS {}",
                    m.func.sql(),
                    ident(&m.column),
                    ident(&m.alias)
                )
            })
            .collect();
        let positions: Vec<String> = (1..=keys.len()).map(|i| i.to_string()).collect();
        let path = self.source.to_string_lossy().replace('\'', "''");

        Ok(format!(
            "SELECT {}, {} FROM read_parquet('{}') GROUP BY {} ORDER BY {} {}",
            keys.join(", "),
            measures.join(", "),
            path,
            positions.join(", "),
            ident(&self.order_by),
            if self.descending { "DESC" } else { "ASC" }
        ))
    }
}

/// (a) Mean tip percentage and revenue per (sex, smoker) over silver.
pub fn silver_revenue_by(silver: &Path) -> GroupedQuery {
    GroupedQuery {
        source: silver.to_path_buf(),
        group_by: vec!["sex".into(), "smoker".into()],
        measures: vec![
            QueryMeasure::new(QueryFunc::Avg, "tip_pct", "avg_tip_pct"),
            QueryMeasure::new(QueryFunc::Sum, "total_bill", "revenue"),
        ],
        order_by: "avg_tip_pct".into(),
        descending: true,
    }
}

/// (b) Mean of the per-group mean tip percentage, per day, over gold.
pub fn gold_tip_pct_by_day(gold: &Path) -> GroupedQuery {
    GroupedQuery {
        source: gold.to_path_buf(),
        group_by: vec!["day".into()],
        measures: vec![QueryMeasure::new(
            QueryFunc::Avg,
            "avg_tip_pct",
            "avg_tip_pct",
        )],
        order_by: "avg_tip_pct".into(),
        descending: true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Cell::Null,
            Value::Boolean(b) => Cell::Int(b as i64),
            Value::TinyInt(i) => Cell::Int(i.into()),
            Value::SmallInt(i) => Cell::Int(i.into()),
            Value::Int(i) => Cell::Int(i.into()),
            Value::BigInt(i) => Cell::Int(i),
            Value::HugeInt(i) => i64::try_from(i)
                .map(Cell::Int)
                .unwrap_or(Cell::Float(i as f64)),
            Value::UTinyInt(i) => Cell::Int(i.into()),
            Value::USmallInt(i) => Cell::Int(i.into()),
            Value::UInt(i) => Cell::Int(i.into()),
            Value::UBigInt(i) => i64::try_from(i)
                .map(Cell::Int)
                .unwrap_or(Cell::Float(i as f64)),
            Value::Float(f) => Cell::Float(f.into()),
            Value::Double(f) => Cell::Float(f),
            Value::Text(s) | Value::Enum(s) => Cell::Text(s),
            Value::Timestamp(unit, v) => timestamp_cell(unit, v),
            Value::Date32(days) => days
                .checked_add(UNIX_EPOCH_DAYS_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map(|d| Cell::Text(d.to_string()))
                .unwrap_or(Cell::Int(days.into())),
            other => Cell::Text(format!("{other:?}")),
        }
    }
}

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_CE: i32 = 719_163;

fn timestamp_cell(unit: TimeUnit, v: i64) -> Cell {
    let dt = match unit {
        TimeUnit::Second => DateTime::from_timestamp(v, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(v),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(v),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(v)),
    };
    dt.map(|dt| Cell::Text(dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        .unwrap_or(Cell::Int(v))
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Float(v) => write!(f, "{v:.4}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(Cell::to_string).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                rendered
                    .iter()
                    .map(|r| r[i].len())
                    .chain(std::iter::once(c.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        writeln!(f, "{}", header.join("  "))?;
        let total: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        writeln!(f, "{:-<total$}", "", total = total)?;
        for row in &rendered {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:>w$}", v, w = *w))
                .collect();
            writeln!(f, "{}", line.join("  "))?;
        }
        Ok(())
    }
}

/// In-memory DuckDB session used to query Parquet artifacts in place.
///
/// Nothing is imported: every query re-reads the file, so results always
/// reflect what is currently on disk. The connection closes on drop.
pub struct QueryEngine {
    conn: Connection,
}

impl QueryEngine {
    pub fn open() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        // parquet is compiled in; never reach out for extensions at query time
        conn.execute_batch(
            "SET autoinstall_known_extensions = false; SET autoload_known_extensions = false;",
        )?;
        Ok(Self { conn })
    }

    /// Whether DuckDB's parquet reader is available without installing
    /// anything.
    pub fn parquet_builtin(&self) -> Result<bool> {
        let loaded: bool = self.conn.query_row(
            "SELECT loaded FROM duckdb_extensions() WHERE extension_name = 'parquet'",
            [],
            |row| row.get(0),
        )?;
        Ok(loaded)
    }

    #[instrument(level = "info", skip_all, fields(source = %query.source.display()))]
    pub fn run(&self, query: &GroupedQuery) -> Result<QueryResult> {
        let sql = query.to_sql()?;
        debug!(%sql, "running query");
        let columns = query.columns();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let v: Value = row.get(i)?;
                cells.push(Cell::from(v));
            }
            out.push(cells);
        }
        debug!(rows = out.len(), "query done");
        Ok(QueryResult { columns, rows: out })
    }
}
