//! Typed in-memory table.
//!
//! Column-major storage with a row view. A table is built once by the loader
//! and never mutated afterwards; transformations return new tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Numeric values; NaN marks a missing cell.
    Numeric(Vec<f64>),
    /// Factor with a fixed, ordered level set. `codes[i]` indexes `levels`.
    Categorical { levels: Vec<String>, codes: Vec<usize> },
    /// Free-form labels such as subject or observation ids.
    Identifier(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical { codes, .. } => codes.len(),
            Column::Identifier(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell `i` rendered as a label (numeric values via [`format_number`]).
    pub fn label(&self, i: usize) -> String {
        match self {
            Column::Numeric(v) => format_number(v[i]),
            Column::Categorical { levels, codes } => levels[codes[i]].clone(),
            Column::Identifier(v) => v[i].clone(),
        }
    }

    pub fn is_missing(&self, i: usize) -> bool {
        matches!(self, Column::Numeric(v) if v[i].is_nan())
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Column::Categorical { levels, codes } => Column::Categorical {
                levels: levels.clone(),
                codes: rows.iter().map(|&i| codes[i]).collect(),
            },
            Column::Identifier(v) => Column::Identifier(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// A single cell, as seen through [`Table::row`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Numeric(f64),
    Categorical(&'a str),
    Identifier(&'a str),
}

/// Ordered rows over a fixed set of named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Assemble a table from named columns. All columns must share a length
    /// and names must be unique.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut seen = HashMap::new();
        for (idx, (name, col)) in columns.iter().enumerate() {
            if col.len() != n_rows {
                return Err(DataError::Format(format!(
                    "column '{}' has {} values, expected {}",
                    name,
                    col.len(),
                    n_rows
                )));
            }
            if seen.insert(name.clone(), idx).is_some() {
                return Err(DataError::Format(format!("duplicate column '{}'", name)));
            }
            if let Column::Categorical { levels, codes } = col {
                if let Some(&bad) = codes.iter().find(|&&c| c >= levels.len()) {
                    return Err(DataError::Format(format!(
                        "column '{}' has level code {} outside {} levels",
                        name,
                        bad,
                        levels.len()
                    )));
                }
            }
        }
        let (names, columns) = columns.into_iter().unzip();
        Ok(Self {
            names,
            columns,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| DataError::UnknownColumn(name.to_string()))
    }

    /// Numeric column values, or an error if the column is not numeric.
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Numeric(v) => Ok(v),
            _ => Err(DataError::Format(format!("column '{}' is not numeric", name))),
        }
    }

    /// Level set of a categorical column.
    pub fn levels(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Categorical { levels, .. } => Ok(levels),
            _ => Err(DataError::Format(format!("column '{}' is not categorical", name))),
        }
    }

    /// Every cell of column `name` as a label.
    pub fn labels(&self, name: &str) -> Result<Vec<String>> {
        let col = self.column(name)?;
        Ok((0..self.n_rows).map(|i| col.label(i)).collect())
    }

    /// Cell at (`row`, `name`).
    pub fn value(&self, row: usize, name: &str) -> Result<Value<'_>> {
        Ok(match self.column(name)? {
            Column::Numeric(v) => Value::Numeric(v[row]),
            Column::Categorical { levels, codes } => Value::Categorical(&levels[codes[row]]),
            Column::Identifier(v) => Value::Identifier(&v[row]),
        })
    }

    /// Row `i` as (column name, value) pairs in column order.
    pub fn row(&self, i: usize) -> Vec<(&str, Value<'_>)> {
        self.names
            .iter()
            .zip(self.columns.iter())
            .map(|(name, col)| {
                let v = match col {
                    Column::Numeric(v) => Value::Numeric(v[i]),
                    Column::Categorical { levels, codes } => Value::Categorical(&levels[codes[i]]),
                    Column::Identifier(v) => Value::Identifier(&v[i]),
                };
                (name.as_str(), v)
            })
            .collect()
    }

    /// New table holding only the rows for which `keep` returns true.
    pub fn filter_rows<F: Fn(usize) -> bool>(&self, keep: F) -> Table {
        let rows: Vec<usize> = (0..self.n_rows).filter(|&i| keep(i)).collect();
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(&rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// New table with column `name` replaced.
    pub fn with_column(&self, name: &str, column: Column) -> Result<Table> {
        let idx = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DataError::UnknownColumn(name.to_string()))?;
        if column.len() != self.n_rows {
            return Err(DataError::Format(format!(
                "replacement for '{}' has {} values, expected {}",
                name,
                column.len(),
                self.n_rows
            )));
        }
        let mut columns = self.columns.clone();
        columns[idx] = column;
        Ok(Table {
            names: self.names.clone(),
            columns,
            n_rows: self.n_rows,
        })
    }
}

/// Render a number as a level label; integral values lose their fractional
/// part.
pub fn format_number(x: f64) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// Re-level a column as categorical with the given level order.
///
/// Numeric values are matched through [`format_number`], so a numeric `rank`
/// column with values 1..4 coerces against levels `["1", "2", "3", "4"]`.
/// Fails with [`DataError::MissingLevel`] on a missing numeric cell and with
/// [`DataError::UnknownLevel`] on the first value outside `level_order`.
pub fn coerce_categorical(table: &Table, column: &str, level_order: &[&str]) -> Result<Table> {
    let col = table.column(column)?;
    let lookup: HashMap<&str, usize> = level_order
        .iter()
        .enumerate()
        .map(|(i, &l)| (l, i))
        .collect();

    let mut codes = Vec::with_capacity(table.n_rows());
    for i in 0..table.n_rows() {
        if col.is_missing(i) {
            return Err(DataError::MissingLevel {
                column: column.to_string(),
                row: i + 1,
            });
        }
        let label = col.label(i);
        match lookup.get(label.as_str()) {
            Some(&c) => codes.push(c),
            None => {
                return Err(DataError::UnknownLevel {
                    column: column.to_string(),
                    value: label,
                })
            }
        }
    }

    table.with_column(
        column,
        Column::Categorical {
            levels: level_order.iter().map(|s| s.to_string()).collect(),
            codes,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Table {
        Table::new(vec![
            ("y".into(), Column::Numeric(vec![1.0, 2.0, f64::NAN])),
            (
                "g".into(),
                Column::Categorical {
                    levels: vec!["a".into(), "b".into()],
                    codes: vec![0, 1, 1],
                },
            ),
            ("id".into(), Column::Identifier(vec!["s1".into(), "s2".into(), "s3".into()])),
        ])
        .unwrap()
    }

    #[test]
    fn test_row_view() {
        let t = small();
        let row = t.row(1);
        assert_eq!(row[0], ("y", Value::Numeric(2.0)));
        assert_eq!(row[1], ("g", Value::Categorical("b")));
        assert_eq!(row[2], ("id", Value::Identifier("s2")));
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let err = Table::new(vec![
            ("a".into(), Column::Numeric(vec![1.0])),
            ("b".into(), Column::Numeric(vec![1.0, 2.0])),
        ])
        .unwrap_err();
        assert!(matches!(err, DataError::Format(_)));
    }

    #[test]
    fn test_coerce_numeric_to_categorical() {
        let t = Table::new(vec![("rank".into(), Column::Numeric(vec![3.0, 1.0, 2.0]))]).unwrap();
        let c = coerce_categorical(&t, "rank", &["1", "2", "3", "4"]).unwrap();
        assert_eq!(c.levels("rank").unwrap().len(), 4);
        assert_eq!(c.labels("rank").unwrap(), vec!["3", "1", "2"]);
        // input untouched
        assert!(t.numeric("rank").is_ok());
    }

    #[test]
    fn test_coerce_unknown_level() {
        let t = small();
        let err = coerce_categorical(&t, "g", &["a"]).unwrap_err();
        assert_eq!(
            err,
            DataError::UnknownLevel {
                column: "g".into(),
                value: "b".into()
            }
        );
    }

    #[test]
    fn test_coerce_missing_cell() {
        let err = coerce_categorical(&small(), "y", &["1", "2", "NA"]).unwrap_err();
        assert_eq!(
            err,
            DataError::MissingLevel {
                column: "y".into(),
                row: 3
            }
        );
    }

    #[test]
    fn test_filter_rows() {
        let t = small().filter_rows(|i| i != 0);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.labels("id").unwrap(), vec!["s2", "s3"]);
        assert!(t.column("y").unwrap().is_missing(1));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NA");
    }
}
