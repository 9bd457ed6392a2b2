//! Delimited table parser.
//!
//! Reads comma-, tab- or whitespace-delimited files with a header row into a
//! typed [`Table`]. Column types are taken from the first data row unless the
//! caller declares them; later rows must agree.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::error::{DataError, Result};
use crate::table::{Column, Table};

/// Field separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delimiter {
    /// Comma if the header has one, tab if it has one, whitespace otherwise.
    #[default]
    Auto,
    Comma,
    Tab,
    /// Runs of spaces and tabs.
    Whitespace,
}

/// Loader configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub delimiter: Delimiter,
    /// Columns to keep as free-form identifiers.
    pub identifiers: Vec<String>,
    /// Columns to read as categorical even when their values are numeric.
    pub categorical: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Numeric,
    Categorical,
    Identifier,
}

/// Parse a delimited file from disk.
pub fn load(path: &Path, options: &LoadOptions) -> Result<Table> {
    let contents = std::fs::read_to_string(path).map_err(|e| DataError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let table = parse_str(&contents, options)?;
    debug!(
        "Loaded {} rows x {} columns from {}",
        table.n_rows(),
        table.n_cols(),
        path.display()
    );
    Ok(table)
}

/// Parse delimited text.
pub fn parse_str(contents: &str, options: &LoadOptions) -> Result<Table> {
    let mut lines = contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    let (_, header_line) = lines
        .next()
        .ok_or_else(|| DataError::Format("empty input".to_string()))?;

    let delim = match options.delimiter {
        Delimiter::Auto if header_line.contains(',') => Delimiter::Comma,
        Delimiter::Auto if header_line.contains('\t') => Delimiter::Tab,
        Delimiter::Auto => Delimiter::Whitespace,
        d => d,
    };

    let mut headers: Vec<String> = split_fields(header_line, delim);
    let rows: Vec<(usize, Vec<String>)> = lines
        .map(|(n, l)| (n + 1, split_fields(l, delim)))
        .collect();

    // files written with row names have no header for that column
    if let Some((_, first)) = rows.first() {
        if first.len() == headers.len() + 1 {
            headers.insert(0, "row".to_string());
        }
    }
    let mut uniq = BTreeSet::new();
    for h in &headers {
        if !uniq.insert(h.as_str()) {
            return Err(DataError::Format(format!("duplicate column '{}' in header", h)));
        }
    }

    for (line_num, fields) in &rows {
        if fields.len() != headers.len() {
            return Err(DataError::Format(format!(
                "line {} has {} fields, expected {}",
                line_num,
                fields.len(),
                headers.len()
            )));
        }
    }

    let kinds: Vec<Kind> = headers
        .iter()
        .enumerate()
        .map(|(j, name)| {
            if name == "row" && j == 0 && !options.categorical.contains(name) {
                Kind::Identifier
            } else if options.identifiers.contains(name) {
                Kind::Identifier
            } else if options.categorical.contains(name) {
                Kind::Categorical
            } else {
                match rows.first() {
                    Some((_, first)) if parse_value(&first[j]).is_none() => Kind::Categorical,
                    _ => Kind::Numeric,
                }
            }
        })
        .collect();

    let mut columns = Vec::with_capacity(headers.len());
    for (j, name) in headers.iter().enumerate() {
        let column = match kinds[j] {
            Kind::Numeric => {
                let mut values = Vec::with_capacity(rows.len());
                for (line_num, fields) in &rows {
                    let v = parse_value(&fields[j]).ok_or_else(|| {
                        DataError::Format(format!(
                            "line {}: column '{}' expects a number, found '{}'",
                            line_num, name, fields[j]
                        ))
                    })?;
                    values.push(v);
                }
                Column::Numeric(values)
            }
            Kind::Categorical | Kind::Identifier => {
                let mut labels = Vec::with_capacity(rows.len());
                for (line_num, fields) in &rows {
                    if is_missing(&fields[j]) {
                        return Err(DataError::Format(format!(
                            "line {}: missing value in non-numeric column '{}'",
                            line_num, name
                        )));
                    }
                    labels.push(fields[j].clone());
                }
                if kinds[j] == Kind::Identifier {
                    Column::Identifier(labels)
                } else {
                    categorical_from_labels(labels)
                }
            }
        };
        columns.push((name.clone(), column));
    }

    Table::new(columns)
}

/// Build a categorical column with levels sorted lexicographically.
fn categorical_from_labels(labels: Vec<String>) -> Column {
    let levels: Vec<String> = labels
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let codes = labels
        .iter()
        .map(|l| levels.binary_search(l).unwrap_or(0))
        .collect();
    Column::Categorical { levels, codes }
}

fn split_fields(line: &str, delim: Delimiter) -> Vec<String> {
    let raw: Vec<&str> = match delim {
        Delimiter::Comma => line.split(',').collect(),
        Delimiter::Tab => line.split('\t').collect(),
        Delimiter::Whitespace | Delimiter::Auto => line.split_whitespace().collect(),
    };
    raw.into_iter().map(|s| unquote(s.trim()).to_string()).collect()
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(s)
}

fn is_missing(s: &str) -> bool {
    matches!(s, "NA" | "na" | "Na" | "." | "" | "NaN" | "nan")
}

/// Parse a numeric token. Missing markers become NaN; anything else that does
/// not parse is `None`.
fn parse_value(s: &str) -> Option<f64> {
    if is_missing(s) {
        Some(f64::NAN)
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.5"), Some(1.5));
        assert!(parse_value("NA").unwrap().is_nan());
        assert!(parse_value(".").unwrap().is_nan());
        assert_eq!(parse_value("M01"), None);
    }

    #[test]
    fn test_comma_file() {
        let text = "admit,gre,gpa,rank\n0,380,3.61,3\n1,660,3.67,3\n1,800,4,1\n";
        let t = parse_str(text, &LoadOptions::default()).unwrap();
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.numeric("gre").unwrap(), &[380.0, 660.0, 800.0]);
    }

    #[test]
    fn test_whitespace_file_with_row_names() {
        // write.table layout: quoted strings and an unnamed row-name column
        let text = "\"distance\" \"age\" \"Subject\" \"Sex\"\n\
                    \"1\" 26 8 \"M01\" \"Male\"\n\
                    \"2\" 25 10 \"M01\" \"Male\"\n\
                    \"3\" 21 8 \"F01\" \"Female\"\n";
        let opts = LoadOptions {
            identifiers: vec!["Subject".into()],
            ..Default::default()
        };
        let t = parse_str(text, &opts).unwrap();
        assert_eq!(t.column_names(), &["row", "distance", "age", "Subject", "Sex"]);
        assert!(matches!(t.column("row").unwrap(), Column::Identifier(_)));
        assert!(matches!(t.column("Subject").unwrap(), Column::Identifier(_)));
        assert_eq!(t.levels("Sex").unwrap(), &["Female", "Male"]);
    }

    #[test]
    fn test_ragged_row_is_format_error() {
        let text = "a,b\n1,2\n3\n";
        let err = parse_str(text, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::Format(_)));
    }

    #[test]
    fn test_inconsistent_type_is_format_error() {
        let text = "a b\n1 2\nx 3\n";
        let err = parse_str(text, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::Format(_)));
    }

    #[test]
    fn test_declared_categorical() {
        let text = "y rank\n1 2\n0 1\n";
        let opts = LoadOptions {
            categorical: vec!["rank".into()],
            ..Default::default()
        };
        let t = parse_str(text, &opts).unwrap();
        assert_eq!(t.levels("rank").unwrap(), &["1", "2"]);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "id\ty\tx").unwrap();
        writeln!(f, "S1\t1\t45").unwrap();
        writeln!(f, "S2\tNA\t50").unwrap();

        let t = load(&path, &LoadOptions::default()).unwrap();
        assert_eq!(t.labels("id").unwrap(), vec!["S1", "S2"]);
        assert!(t.numeric("y").unwrap()[1].is_nan());
    }

    #[test]
    fn test_missing_file() {
        let err = load(Path::new("/nonexistent/mixreg.csv"), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }
}
