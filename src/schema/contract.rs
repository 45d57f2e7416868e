// src/schema/contract.rs

use arrow::datatypes::{DataType, TimeUnit};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Logical column type a rule expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Float,
    Int,
    Timestamp,
    Text,
}

impl ColumnType {
    /// Arrow type used when coercing into this column type.
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Float => DataType::Float64,
            ColumnType::Int => DataType::Int64,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::Text => DataType::Utf8,
        }
    }

    /// Whether data already stored as `dt` satisfies this type without a cast.
    pub fn accepts(&self, dt: &DataType) -> bool {
        match self {
            ColumnType::Float => matches!(
                dt,
                DataType::Float16 | DataType::Float32 | DataType::Float64
            ),
            ColumnType::Int => dt.is_integer(),
            ColumnType::Timestamp => matches!(
                dt,
                DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64
            ),
            ColumnType::Text => match dt {
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => true,
                DataType::Dictionary(_, value) => ColumnType::Text.accepts(value),
                _ => false,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Float => "float",
            ColumnType::Int => "int",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    /// `lo <= v <= hi`
    Closed,
    /// `lo <= v < hi`
    HalfOpen,
}

/// One value-level check. Text forms (as used in config files):
///
/// - `non_negative`
/// - `range[lo, hi]` (closed) or `range[lo, hi)` (half-open)
/// - `min_cardinality(n)`
/// - `valid_timestamp`
/// - `one_of(a|b|c)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Check {
    NonNegative,
    Range { lo: f64, hi: f64, bounds: Bounds },
    MinCardinality(i64),
    ValidTimestamp,
    OneOf(Vec<String>),
}

impl Check {
    pub fn range(lo: f64, hi: f64) -> Self {
        Check::Range {
            lo,
            hi,
            bounds: Bounds::Closed,
        }
    }

    pub fn half_open(lo: f64, hi: f64) -> Self {
        Check::Range {
            lo,
            hi,
            bounds: Bounds::HalfOpen,
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Check::OneOf(values.into_iter().map(Into::into).collect())
    }
}

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^range\s*([\[(])\s*([^,\s]+)\s*,\s*([^\])\s]+)\s*([\])])$")
        .expect("range pattern is valid")
});
static MIN_CARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^min_cardinality\s*\(\s*(-?\d+)\s*\)$").expect("min_cardinality pattern is valid")
});
static ONE_OF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^one_of\s*\((.*)\)$").expect("one_of pattern is valid"));

impl FromStr for Check {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "non_negative" => return Ok(Check::NonNegative),
            "valid_timestamp" => return Ok(Check::ValidTimestamp),
            _ => {}
        }

        if let Some(caps) = RANGE_RE.captures(s) {
            let lo: f64 = caps[2]
                .parse()
                .map_err(|_| format!("bad lower bound in `{s}`"))?;
            let hi: f64 = caps[3]
                .parse()
                .map_err(|_| format!("bad upper bound in `{s}`"))?;
            if lo > hi {
                return Err(format!("empty range in `{s}`"));
            }
            // an open lower bound has no Bounds variant; refuse it rather
            // than read `(` as closed
            let bounds = match (&caps[1], &caps[4]) {
                ("[", "]") => Bounds::Closed,
                ("[", ")") => Bounds::HalfOpen,
                _ => {
                    return Err(format!(
                        "unsupported bounds in `{s}`, use range[lo, hi] or range[lo, hi)"
                    ))
                }
            };
            return Ok(Check::Range { lo, hi, bounds });
        }

        if let Some(caps) = MIN_CARD_RE.captures(s) {
            let n = caps[1]
                .parse()
                .map_err(|_| format!("bad cardinality in `{s}`"))?;
            return Ok(Check::MinCardinality(n));
        }

        if let Some(caps) = ONE_OF_RE.captures(s) {
            let values: Vec<String> = caps[1]
                .split('|')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect();
            if values.is_empty() {
                return Err(format!("empty domain in `{s}`"));
            }
            return Ok(Check::OneOf(values));
        }

        Err(format!("unknown check `{s}`"))
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::NonNegative => f.write_str("non_negative"),
            Check::Range {
                lo,
                hi,
                bounds: Bounds::Closed,
            } => write!(f, "range[{lo}, {hi}]"),
            Check::Range {
                lo,
                hi,
                bounds: Bounds::HalfOpen,
            } => write!(f, "range[{lo}, {hi})"),
            Check::MinCardinality(n) => write!(f, "min_cardinality({n})"),
            Check::ValidTimestamp => f.write_str("valid_timestamp"),
            Check::OneOf(values) => write!(f, "one_of({})", values.join("|")),
        }
    }
}

impl TryFrom<String> for Check {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Check> for String {
    fn from(check: Check) -> Self {
        check.to_string()
    }
}

/// Rules for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub column: String,
    pub dtype: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl ColumnRule {
    pub fn new(column: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            column: column.into(),
            dtype,
            nullable: false,
            checks: Vec::new(),
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

fn default_coerce() -> bool {
    true
}

/// Declarative quality gate for a silver frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Cast values to the declared type before checking instead of rejecting
    /// a column stored under another type.
    #[serde(default = "default_coerce")]
    pub coerce: bool,
    pub columns: Vec<ColumnRule>,
}

impl Contract {
    /// Quality gate for the tips silver frame.
    pub fn tips() -> Self {
        Self {
            coerce: true,
            columns: vec![
                ColumnRule::new("total_bill", ColumnType::Float).check(Check::NonNegative),
                ColumnRule::new("tip", ColumnType::Float).check(Check::NonNegative),
                ColumnRule::new("tip_pct", ColumnType::Float).check(Check::range(0.0, 1.0)),
                ColumnRule::new("size", ColumnType::Int).check(Check::MinCardinality(1)),
                ColumnRule::new("visit_datetime", ColumnType::Timestamp)
                    .check(Check::ValidTimestamp),
            ],
        }
    }
}

impl Default for Contract {
    fn default() -> Self {
        Contract::tips()
    }
}
