pub mod contract;
pub mod validate;

pub use contract::{Bounds, Check, ColumnRule, ColumnType, Contract};
pub use validate::{parse_timestamp, validate, validate_silver, ValidationReport, Violation};
