//! mixreg-data: Dataset loading for mixreg
//!
//! Parses delimited files into a typed in-memory [`Table`], coerces columns
//! to categorical with an explicit level order, and computes grouped
//! summaries.

pub mod error;
pub mod loader;
pub mod summary;
pub mod table;

pub use error::DataError;
pub use loader::{load, parse_str, Delimiter, LoadOptions};
pub use summary::{group_summary, Aggregator};
pub use table::{coerce_categorical, Column, Table, Value};
