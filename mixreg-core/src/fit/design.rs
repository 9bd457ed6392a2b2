//! Design-matrix construction.
//!
//! Expands a [`ModelSpec`] against a [`Table`]: complete-case row selection,
//! treatment contrasts for categorical variables, products for interactions,
//! a rank check, and the cluster partition used by the covariance models.

use std::collections::{BTreeSet, HashMap};

use mixreg_data::{Column, Table};
use mixreg_linalg::decomposition::QrDecomp;
use mixreg_linalg::{DenseMatrix, LinalgError};
use tracing::debug;

use super::model::FitWarning;
use crate::error::{ModelError, Result};
use crate::spec::{ModelSpec, RandomEffects, Term};

pub const INTERCEPT: &str = "(Intercept)";

/// Expanded fixed-effects design over the complete-case rows.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: DenseMatrix,
    pub column_names: Vec<String>,
    /// Term label owning each column.
    pub column_terms: Vec<String>,
    pub y: Vec<f64>,
    /// Table row index of each design row.
    pub rows: Vec<usize>,
    /// Design-row indices per cluster, clusters in order of first appearance.
    pub clusters: Vec<Vec<usize>>,
    pub cluster_labels: Vec<String>,
    pub warnings: Vec<FitWarning>,
}

struct Block {
    names: Vec<String>,
    cols: Vec<Vec<f64>>,
}

impl Design {
    /// Build the design for `spec`. `extra` names further columns that must be
    /// observed for a row to be used (random-effect or variance-function
    /// variables).
    pub fn build(table: &Table, spec: &ModelSpec, extra: &[&str]) -> Result<Design> {
        let mut needed: BTreeSet<String> = spec.variables();
        needed.extend(extra.iter().map(|s| s.to_string()));
        let mut columns = Vec::with_capacity(needed.len());
        for name in &needed {
            columns.push(table.column(name)?);
        }

        let rows: Vec<usize> = (0..table.n_rows())
            .filter(|&i| columns.iter().all(|c| !c.is_missing(i)))
            .collect();
        if rows.is_empty() {
            return Err(ModelError::InvalidSpec("no complete rows".into()));
        }

        let mut warnings = Vec::new();
        let dropped = table.n_rows() - rows.len();
        if dropped > 0 {
            debug!("Dropping {} incomplete rows", dropped);
            warnings.push(FitWarning::DroppedRows { count: dropped });
        }

        let y = match table.column(&spec.response)? {
            Column::Numeric(v) => rows.iter().map(|&i| v[i]).collect::<Vec<f64>>(),
            _ => {
                return Err(ModelError::InvalidSpec(format!(
                    "response '{}' must be numeric",
                    spec.response
                )))
            }
        };

        let mut names = Vec::new();
        let mut terms = Vec::new();
        let mut cols: Vec<Vec<f64>> = Vec::new();
        if spec.intercept {
            names.push(INTERCEPT.to_string());
            terms.push(INTERCEPT.to_string());
            cols.push(vec![1.0; rows.len()]);
        }
        let mut full_dummies_used = spec.intercept;
        for term in &spec.terms {
            let full = !full_dummies_used
                && term.order() == 1
                && matches!(table.column(&term.variables()[0])?, Column::Categorical { .. });
            if full {
                full_dummies_used = true;
            }
            let block = term_block(table, term, &rows, full, &mut warnings)?;
            for (name, col) in block.names.into_iter().zip(block.cols) {
                names.push(name);
                terms.push(term.label());
                cols.push(col);
            }
        }

        let x = DenseMatrix::from_col_major(rows.len(), cols.len(), cols.concat());
        check_rank(&x, &names)?;

        let (clusters, cluster_labels) = match &spec.group {
            Some(g) => {
                let labels = table.labels(g)?;
                partition(rows.iter().map(|&i| labels[i].clone()))
            }
            None => partition(rows.iter().map(|&i| format!("{}", i + 1))),
        };

        debug!(
            "Design: {} rows x {} columns, {} clusters",
            x.nrows(),
            x.ncols(),
            clusters.len()
        );

        Ok(Design {
            x,
            column_names: names,
            column_terms: terms,
            y,
            rows,
            clusters,
            cluster_labels,
            warnings,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coef(&self) -> usize {
        self.x.ncols()
    }

    pub fn max_cluster_size(&self) -> usize {
        self.clusters.iter().map(|c| c.len()).max().unwrap_or(0)
    }

    /// Random-effects design Z over the same rows, with column names.
    pub fn random_effects_matrix(
        &mut self,
        table: &Table,
        random: &RandomEffects,
    ) -> Result<(DenseMatrix, Vec<String>)> {
        let n = self.rows.len();
        let mut names = Vec::new();
        let mut cols: Vec<Vec<f64>> = Vec::new();
        if random.intercept {
            names.push(INTERCEPT.to_string());
            cols.push(vec![1.0; n]);
        }
        for term in random.terms() {
            let block = term_block(table, &term, &self.rows, false, &mut self.warnings)?;
            names.extend(block.names);
            cols.extend(block.cols);
        }
        if cols.is_empty() {
            return Err(ModelError::InvalidSpec("no random effects".into()));
        }
        Ok((DenseMatrix::from_col_major(n, cols.len(), cols.concat()), names))
    }

    /// Level index of each design row for a stratifying column. Levels follow
    /// the column's level order when categorical, sorted labels otherwise;
    /// unobserved levels are skipped.
    pub fn strata(&self, table: &Table, column: &str) -> Result<(Vec<String>, Vec<usize>)> {
        let labels = table.labels(column)?;
        let observed: BTreeSet<&String> = self.rows.iter().map(|&i| &labels[i]).collect();
        let levels: Vec<String> = match table.column(column)? {
            Column::Categorical { levels, .. } => levels
                .iter()
                .filter(|l| observed.contains(l))
                .cloned()
                .collect(),
            _ => observed.into_iter().cloned().collect(),
        };
        let index: HashMap<&String, usize> = levels.iter().enumerate().map(|(i, l)| (l, i)).collect();
        let codes = self
            .rows
            .iter()
            .map(|&i| index.get(&labels[i]).copied().unwrap_or(0))
            .collect();
        Ok((levels, codes))
    }

    /// 64-bit FNV-1a hash of the response name, the table rows used and the
    /// response values, in little-endian byte order. Two fits see the same
    /// data exactly when their fingerprints agree; the value is stable across
    /// builds so saved models can be compared.
    pub fn fingerprint(&self, response: &str) -> u64 {
        let mut fnv = Fnv1a::default();
        fnv.write(response.as_bytes());
        fnv.write(&(self.rows.len() as u64).to_le_bytes());
        for &r in &self.rows {
            fnv.write(&(r as u64).to_le_bytes());
        }
        for v in &self.y {
            fnv.write(&v.to_bits().to_le_bytes());
        }
        fnv.0
    }
}

struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Fnv1a(0xcbf2_9ce4_8422_2325)
    }
}

impl Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }
}

fn check_rank(x: &DenseMatrix, names: &[String]) -> Result<()> {
    match QrDecomp::new(x) {
        Ok(_) => Ok(()),
        Err(LinalgError::RankDeficient { column }) => Err(ModelError::RankDeficient {
            column: names
                .get(column)
                .cloned()
                .unwrap_or_else(|| format!("#{}", column)),
        }),
        Err(e) => Err(e.into()),
    }
}

fn partition<I: Iterator<Item = String>>(labels: I) -> (Vec<Vec<usize>>, Vec<String>) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut names = Vec::new();
    for (row, label) in labels.enumerate() {
        let c = *index.entry(label.clone()).or_insert_with(|| {
            clusters.push(Vec::new());
            names.push(label);
            clusters.len() - 1
        });
        clusters[c].push(row);
    }
    (clusters, names)
}

/// Columns contributed by a term: the elementwise products of its variables'
/// columns, earlier variables varying fastest.
fn term_block(
    table: &Table,
    term: &Term,
    rows: &[usize],
    full_dummies: bool,
    warnings: &mut Vec<FitWarning>,
) -> Result<Block> {
    let mut acc = Block {
        names: vec![String::new()],
        cols: vec![vec![1.0; rows.len()]],
    };
    for var in term.variables() {
        let block = variable_block(table, var, rows, full_dummies, warnings)?;
        let mut names = Vec::with_capacity(acc.names.len() * block.names.len());
        let mut cols = Vec::with_capacity(names.capacity());
        for (bn, bc) in block.names.iter().zip(&block.cols) {
            for (an, ac) in acc.names.iter().zip(&acc.cols) {
                names.push(if an.is_empty() {
                    bn.clone()
                } else {
                    format!("{}:{}", an, bn)
                });
                cols.push(ac.iter().zip(bc).map(|(a, b)| a * b).collect());
            }
        }
        acc = Block { names, cols };
    }
    Ok(acc)
}

fn variable_block(
    table: &Table,
    var: &str,
    rows: &[usize],
    full_dummies: bool,
    warnings: &mut Vec<FitWarning>,
) -> Result<Block> {
    match table.column(var)? {
        Column::Numeric(v) => Ok(Block {
            names: vec![var.to_string()],
            cols: vec![rows.iter().map(|&i| v[i]).collect()],
        }),
        Column::Categorical { levels, codes } => {
            let mut seen = vec![false; levels.len()];
            for &i in rows {
                seen[codes[i]] = true;
            }
            for (level, _) in levels.iter().zip(&seen).filter(|(_, s)| !**s) {
                let w = FitWarning::ZeroVariance {
                    variable: var.to_string(),
                    level: level.clone(),
                };
                if !warnings.contains(&w) {
                    warnings.push(w);
                }
            }
            let kept: Vec<usize> = (0..levels.len()).filter(|&l| seen[l]).collect();
            let start = if full_dummies { 0 } else { 1 };
            Ok(Block {
                names: kept
                    .iter()
                    .skip(start)
                    .map(|&l| format!("{}{}", var, levels[l]))
                    .collect(),
                cols: kept
                    .iter()
                    .skip(start)
                    .map(|&l| {
                        rows.iter()
                            .map(|&i| if codes[i] == l { 1.0 } else { 0.0 })
                            .collect()
                    })
                    .collect(),
            })
        }
        Column::Identifier(_) => Err(ModelError::InvalidSpec(format!(
            "identifier column '{}' cannot be used as a predictor",
            var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(vec![
            ("y".into(), Column::Numeric(vec![1.0, 2.0, 3.0, 4.0, f64::NAN, 6.0])),
            ("x".into(), Column::Numeric(vec![0.5, 1.5, 2.5, 3.0, 4.0, 5.5])),
            (
                "g".into(),
                Column::Categorical {
                    levels: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    codes: vec![0, 1, 2, 0, 1, 2],
                },
            ),
            (
                "id".into(),
                Column::Identifier(vec!["s1".into(), "s1".into(), "s2".into(), "s2".into(), "s3".into(), "s3".into()]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_treatment_contrasts_and_names() {
        let spec = ModelSpec::builder("y").term("x").term("g").build().unwrap();
        let d = Design::build(&table(), &spec, &[]).unwrap();
        assert_eq!(d.column_names, vec!["(Intercept)", "x", "gb", "gc"]);
        assert_eq!(d.n_obs(), 5);
        assert_eq!(d.rows, vec![0, 1, 2, 3, 5]);
        assert!(d.warnings.contains(&FitWarning::ZeroVariance {
            variable: "g".into(),
            level: "d".into()
        }));
        assert!(d.warnings.contains(&FitWarning::DroppedRows { count: 1 }));
    }

    #[test]
    fn test_interaction_columns() {
        let spec = ModelSpec::builder("y")
            .term("x")
            .term("g")
            .interaction(&["x", "g"])
            .build()
            .unwrap();
        let d = Design::build(&table(), &spec, &[]).unwrap_err();
        // 5 rows cannot carry 6 columns
        assert!(matches!(d, ModelError::RankDeficient { .. }));

        let spec = ModelSpec::builder("x").interaction(&["y", "g"]).build().unwrap();
        let d = Design::build(&table(), &spec, &[]).unwrap();
        assert_eq!(d.column_names, vec!["(Intercept)", "y:gb", "y:gc"]);
        assert_eq!(d.x.col(1), vec![0.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rank_deficiency_names_column() {
        let t = table();
        let doubled: Vec<f64> = t.numeric("x").unwrap().iter().map(|v| 2.0 * v).collect();
        let t = Table::new(vec![
            ("y".into(), Column::Numeric(t.numeric("y").unwrap().to_vec())),
            ("x".into(), Column::Numeric(t.numeric("x").unwrap().to_vec())),
            ("x2".into(), Column::Numeric(doubled)),
        ])
        .unwrap();
        let spec = ModelSpec::builder("y").term("x").term("x2").build().unwrap();
        let err = Design::build(&t, &spec, &[]).unwrap_err();
        assert_eq!(err, ModelError::RankDeficient { column: "x2".into() });
    }

    #[test]
    fn test_no_intercept_uses_full_dummies() {
        let spec = ModelSpec::builder("y").term("g").no_intercept().build().unwrap();
        let d = Design::build(&table(), &spec, &[]).unwrap();
        assert_eq!(d.column_names, vec!["ga", "gb", "gc"]);
    }

    #[test]
    fn test_clusters_in_first_appearance_order() {
        let spec = ModelSpec::builder("y").term("x").group("id").build().unwrap();
        let d = Design::build(&table(), &spec, &[]).unwrap();
        assert_eq!(d.cluster_labels, vec!["s1", "s2", "s3"]);
        assert_eq!(d.clusters, vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(d.max_cluster_size(), 2);
    }

    #[test]
    fn test_identifier_predictor_rejected() {
        let spec = ModelSpec::builder("y").term("id").build().unwrap();
        let err = Design::build(&table(), &spec, &[]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec(_)));
    }

    #[test]
    fn test_fingerprint_tracks_rows() {
        let spec = ModelSpec::builder("y").term("x").build().unwrap();
        let a = Design::build(&table(), &spec, &[]).unwrap();
        let b = Design::build(&table(), &spec, &[]).unwrap();
        assert_eq!(a.fingerprint("y"), b.fingerprint("y"));
        let subset = table().filter_rows(|i| i != 0);
        let c = Design::build(&subset, &spec, &[]).unwrap();
        assert_ne!(a.fingerprint("y"), c.fingerprint("y"));

        // nested designs over the same rows share it
        let bigger = ModelSpec::builder("y").term("x").term("g").build().unwrap();
        let d = Design::build(&table(), &bigger, &[]).unwrap();
        assert_eq!(a.fingerprint("y"), d.fingerprint("y"));
    }

    #[test]
    fn test_fingerprint_hash_is_fixed() {
        let mut h = Fnv1a::default();
        assert_eq!(h.0, 0xcbf2_9ce4_8422_2325);
        h.write(b"a");
        assert_eq!(h.0, 0xaf63_dc4c_8601_ec8c);
    }
}
