//! Grouped descriptive summaries (mean / sd / count per group).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    Mean,
    /// Sample standard deviation (n - 1 denominator).
    Sd,
    Count,
}

/// Aggregate `value_column` within each combination of `group_columns`.
///
/// Keys are the group labels in `group_columns` order. Missing values are
/// skipped; a group whose values are all missing reports NaN for mean/sd and
/// 0 for count. Sd of a single value is NaN.
pub fn group_summary(
    table: &Table,
    group_columns: &[&str],
    value_column: &str,
    aggregator: Aggregator,
) -> Result<BTreeMap<Vec<String>, f64>> {
    let values = table.numeric(value_column)?;
    let keys: Vec<Vec<String>> = group_columns
        .iter()
        .map(|c| table.labels(c))
        .collect::<Result<_>>()?;

    let mut groups: BTreeMap<Vec<String>, Vec<f64>> = BTreeMap::new();
    for (i, &v) in values.iter().enumerate() {
        let key: Vec<String> = keys.iter().map(|k| k[i].clone()).collect();
        let entry = groups.entry(key).or_default();
        if !v.is_nan() {
            entry.push(v);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(k, vs)| (k, aggregate(&vs, aggregator)))
        .collect())
}

fn aggregate(values: &[f64], aggregator: Aggregator) -> f64 {
    let n = values.len() as f64;
    match aggregator {
        Aggregator::Count => n,
        Aggregator::Mean => {
            if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / n
            }
        }
        Aggregator::Sd => {
            if values.len() < 2 {
                return f64::NAN;
            }
            let mean = values.iter().sum::<f64>() / n;
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn growth() -> Table {
        Table::new(vec![
            ("distance".into(), Column::Numeric(vec![21.0, 23.0, 25.0, 20.0, 22.0, f64::NAN])),
            ("age".into(), Column::Numeric(vec![8.0, 8.0, 10.0, 8.0, 8.0, 10.0])),
            (
                "Sex".into(),
                Column::Categorical {
                    levels: vec!["Female".into(), "Male".into()],
                    codes: vec![1, 1, 1, 0, 0, 0],
                },
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_mean_by_two_keys() {
        let s = group_summary(&growth(), &["Sex", "age"], "distance", Aggregator::Mean).unwrap();
        assert_eq!(s[&vec!["Male".to_string(), "8".to_string()]], 22.0);
        assert_eq!(s[&vec!["Female".to_string(), "8".to_string()]], 21.0);
        assert!(s[&vec!["Female".to_string(), "10".to_string()]].is_nan());
    }

    #[test]
    fn test_sd_and_count() {
        let sd = group_summary(&growth(), &["Sex"], "distance", Aggregator::Sd).unwrap();
        assert!((sd[&vec!["Male".to_string()]] - 2.0).abs() < 1e-12);
        let n = group_summary(&growth(), &["Sex"], "distance", Aggregator::Count).unwrap();
        assert_eq!(n[&vec!["Female".to_string()]], 2.0);
    }

    #[test]
    fn test_deterministic_order() {
        let s = group_summary(&growth(), &["Sex"], "distance", Aggregator::Mean).unwrap();
        let keys: Vec<_> = s.keys().cloned().collect();
        assert_eq!(keys, vec![vec!["Female".to_string()], vec!["Male".to_string()]]);
    }
}
