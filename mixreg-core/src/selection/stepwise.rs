//! Greedy stepwise search over fixed-effect terms.
//!
//! At each step every admissible single-term addition and/or removal is
//! fitted (in parallel), the change with the smallest criterion is taken if
//! it strictly improves on the current model, and the search stops
//! otherwise. Exact ties go to the lexicographically first term label, so the
//! result depends only on the inputs.
//!
//! Every candidate is fitted to the same rows: those complete over the
//! response, the grouping column and every variable of the upper scope.
//! Otherwise a sparsely observed column would look attractive only because
//! fewer rows enter its likelihood.
//!
//! Additions respect marginality: a term can enter only once every scope term
//! marginal to it is present. Removals likewise never leave an interaction
//! without its lower-order terms.

use std::collections::BTreeSet;

use mixreg_data::Table;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Criterion;
use crate::error::{ModelError, Result};
use crate::fit::model::{EstimationMethod, FitWarning, FittedModel};
use crate::fit::ModelFamily;
use crate::spec::{canonical_label, ModelSpec, Term};

/// A change must lower the criterion by more than this to be taken.
const IMPROVEMENT_TOL: f64 = 1e-9;

/// Terms that must always stay (`lower`) and may ever enter (`upper`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub lower: Vec<Term>,
    pub upper: Vec<Term>,
}

impl Scope {
    pub fn new(lower: Vec<Term>, upper: Vec<Term>) -> Self {
        Self { lower, upper }
    }

    /// Scope with an empty lower bound.
    pub fn upper(upper: Vec<Term>) -> Self {
        Self {
            lower: Vec::new(),
            upper,
        }
    }

    fn in_lower(&self, term: &Term) -> bool {
        self.lower.iter().any(|t| t.same_variables(term))
    }

    fn in_upper(&self, term: &Term) -> bool {
        self.upper.iter().any(|t| t.same_variables(term))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Add,
    Drop,
}

struct Step {
    label: String,
    change: Move,
    spec: ModelSpec,
}

/// Select fixed-effect terms between `scope.lower` and `scope.upper`,
/// starting from `base`. Linear families estimated by REML are refit by ML,
/// since REML criteria are not comparable across fixed effects; the returned
/// model then carries [`FitWarning::RefitWithMl`].
pub fn stepwise_select(
    table: &Table,
    base: &ModelSpec,
    scope: &Scope,
    direction: Direction,
    criterion: Criterion,
    family: &ModelFamily,
) -> Result<FittedModel> {
    for term in &scope.lower {
        if !base.has_term(term) {
            return Err(ModelError::InvalidSpec(format!(
                "lower-scope term '{}' missing from the starting model",
                term
            )));
        }
        if !scope.in_upper(term) {
            return Err(ModelError::InvalidSpec(format!(
                "lower-scope term '{}' missing from the upper scope",
                term
            )));
        }
    }
    for term in &base.terms {
        if !scope.in_upper(term) {
            return Err(ModelError::InvalidSpec(format!(
                "starting term '{}' outside the upper scope",
                term
            )));
        }
    }

    let refit = family.method() == EstimationMethod::Reml;
    let family = if refit {
        warn!("Stepwise search refits REML models by maximum likelihood");
        family.with_ml()
    } else {
        family.clone()
    };

    let table = &common_rows(table, base, scope, &family)?;
    let mut current = family.fit(table, base)?;
    let mut score = criterion.value(&current);
    info!(
        "Stepwise start: [{}] {:?}={:.4}",
        labels(&current.spec),
        criterion,
        score
    );

    let mut step = 0;
    loop {
        let steps = admissible_steps(&current.spec, scope, direction);
        if steps.is_empty() {
            break;
        }

        let mut scored: Vec<(f64, Step, FittedModel)> = steps
            .into_par_iter()
            .filter_map(|s| match family.fit(table, &s.spec) {
                Ok(fit) => Some((criterion.value(&fit), s, fit)),
                Err(e) => {
                    warn!("Stepwise candidate {:?} '{}' failed: {}", s.change, s.label, e);
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.label.cmp(&b.1.label)));

        for (value, s, _) in &scored {
            debug!("  {:?} {}: {:.4}", s.change, s.label, value);
        }
        let Some((best, s, fit)) = scored.into_iter().next() else {
            break;
        };
        if best >= score - IMPROVEMENT_TOL {
            break;
        }
        step += 1;
        info!(
            "Step {}: {:?} {} ({:?} {:.4} -> {:.4})",
            step, s.change, s.label, criterion, score, best
        );
        current = fit;
        score = best;
    }

    info!(
        "Stepwise selected [{}] after {} steps",
        labels(&current.spec),
        step
    );
    if refit && !current.has_warning(&FitWarning::RefitWithMl) {
        current.warnings.push(FitWarning::RefitWithMl);
    }
    Ok(current)
}

/// Rows of `table` observed on every column any candidate can read.
fn common_rows(
    table: &Table,
    base: &ModelSpec,
    scope: &Scope,
    family: &ModelFamily,
) -> Result<Table> {
    let mut needed: BTreeSet<String> = base.variables();
    needed.extend(scope.upper.iter().flat_map(|t| t.variables().iter().cloned()));
    needed.extend(family.extra_variables());
    let columns = needed
        .iter()
        .map(|name| table.column(name))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let kept = table.filter_rows(|i| columns.iter().all(|c| !c.is_missing(i)));
    let dropped = table.n_rows() - kept.n_rows();
    if dropped > 0 {
        info!(
            "Stepwise search uses the {} rows complete over the scope ({} dropped)",
            kept.n_rows(),
            dropped
        );
    }
    Ok(kept)
}

fn labels(spec: &ModelSpec) -> String {
    spec.term_labels().into_iter().collect::<Vec<_>>().join(", ")
}

fn admissible_steps(spec: &ModelSpec, scope: &Scope, direction: Direction) -> Vec<Step> {
    let mut steps = Vec::new();
    if direction != Direction::Backward {
        for term in &scope.upper {
            if spec.has_term(term) {
                continue;
            }
            let supported = scope
                .upper
                .iter()
                .filter(|t| t.is_marginal_to(term))
                .all(|t| spec.has_term(t));
            if supported {
                steps.push(Step {
                    label: canonical_label(term),
                    change: Move::Add,
                    spec: spec.with_term(term.clone()),
                });
            }
        }
    }
    if direction != Direction::Forward {
        for term in &spec.terms {
            if scope.in_lower(term) {
                continue;
            }
            let needed = spec.terms.iter().any(|t| term.is_marginal_to(t));
            if !needed {
                steps.push(Step {
                    label: canonical_label(term),
                    change: Move::Drop,
                    spec: spec.without_term(term),
                });
            }
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::covariance::CovarianceStructure;
    use crate::fit::gls::GlsOptions;
    use mixreg_data::Column;

    fn table() -> Table {
        let n = 30;
        let a: Vec<f64> = (0..n).map(|i| (i % 5) as f64).collect();
        let b: Vec<f64> = (0..n).map(|i| ((i * 3) % 7) as f64).collect();
        let c: Vec<f64> = (0..n).map(|i| ((i * 11) % 4) as f64).collect();
        let noise = [0.21, -0.37, 0.05, 0.44, -0.12, -0.29, 0.33, -0.08, 0.16, -0.41];
        let y: Vec<f64> = (0..n).map(|i| 2.0 + 1.5 * a[i] + noise[i % 10] + 0.02 * c[i]).collect();
        Table::new(vec![
            ("y".into(), Column::Numeric(y)),
            ("a".into(), Column::Numeric(a)),
            ("b".into(), Column::Numeric(b)),
            ("c".into(), Column::Numeric(c)),
        ])
        .unwrap()
    }

    fn family() -> ModelFamily {
        ModelFamily::Gls {
            structure: CovarianceStructure::independent(),
            method: EstimationMethod::Reml,
            options: GlsOptions::default(),
        }
    }

    fn upper() -> Vec<Term> {
        vec![
            Term::main("a"),
            Term::main("b"),
            Term::main("c"),
            Term::interaction(&["a", "b"]),
        ]
    }

    #[test]
    fn test_forward_finds_strong_term() {
        let base = ModelSpec::builder("y").build().unwrap();
        let fit = stepwise_select(
            &table(),
            &base,
            &Scope::upper(upper()),
            Direction::Forward,
            Criterion::Aic,
            &family(),
        )
        .unwrap();
        assert!(fit.spec.has_term(&Term::main("a")));
        assert_eq!(fit.method, EstimationMethod::Ml);
        assert!(fit.has_warning(&FitWarning::RefitWithMl));
    }

    #[test]
    fn test_marginality_of_additions() {
        let spec = ModelSpec::builder("y").term("a").build().unwrap();
        let steps = admissible_steps(&spec, &Scope::upper(upper()), Direction::Forward);
        let labels: Vec<&str> = steps.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);

        let full = ModelSpec::builder("y")
            .term("a")
            .term("b")
            .interaction(&["a", "b"])
            .build()
            .unwrap();
        let drops = admissible_steps(&full, &Scope::upper(upper()), Direction::Backward);
        let labels: Vec<&str> = drops.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a:b"]);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let t = table();
        let base = ModelSpec::builder("y").build().unwrap();
        let first = stepwise_select(
            &t,
            &base,
            &Scope::upper(upper()),
            Direction::Both,
            Criterion::Aic,
            &family(),
        )
        .unwrap();
        let again = stepwise_select(
            &t,
            &first.spec,
            &Scope::upper(first.spec.terms.clone()),
            Direction::Both,
            Criterion::Aic,
            &family(),
        )
        .unwrap();
        assert_eq!(first.spec.term_labels(), again.spec.term_labels());
        assert_eq!(first.coefficients, again.coefficients);
    }

    /// `z` is observed on odd rows only and is exactly orthogonal there to
    /// the intercept, `x` and the response.
    fn sparse_noise_table() -> Table {
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut z = Vec::new();
        for i in 0..40 {
            if i % 2 == 1 {
                let k = i / 2;
                let xi = (k / 2) as f64;
                let s = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
                x.push(xi);
                y.push(1.0 + 2.0 * xi + 0.3 * s);
                z.push(if k % 2 == 0 { 1.0 } else { -1.0 });
            } else {
                let xi = (i / 4) as f64 + 0.5;
                let e = [1.8, -2.2, 2.5, -1.1, -0.9][(i / 2) % 5];
                x.push(xi);
                y.push(1.0 + 2.0 * xi + e);
                z.push(f64::NAN);
            }
        }
        Table::new(vec![
            ("y".into(), Column::Numeric(y)),
            ("x".into(), Column::Numeric(x)),
            ("z".into(), Column::Numeric(z)),
        ])
        .unwrap()
    }

    #[test]
    fn test_candidates_share_rows() {
        let table = sparse_noise_table();
        let base = ModelSpec::builder("y").term("x").build().unwrap();
        let fit = stepwise_select(
            &table,
            &base,
            &Scope::upper(vec![Term::main("x"), Term::main("z")]),
            Direction::Forward,
            Criterion::Aic,
            &family(),
        )
        .unwrap();
        assert!(!fit.spec.has_term(&Term::main("z")));
        assert_eq!(fit.n_obs, 20);

        let complete = table.filter_rows(|i| i % 2 == 1);
        let direct = family().with_ml().fit(&complete, &base).unwrap();
        assert!((fit.aic() - direct.aic()).abs() < 1e-9);
    }

    #[test]
    fn test_exact_tie_goes_to_first_label() {
        let t = table();
        let a = t.numeric("a").unwrap().to_vec();
        let twins = Table::new(vec![
            ("y".into(), Column::Numeric(t.numeric("y").unwrap().to_vec())),
            ("v".into(), Column::Numeric(a.clone())),
            ("u".into(), Column::Numeric(a)),
        ])
        .unwrap();
        let base = ModelSpec::builder("y").build().unwrap();
        let fit = stepwise_select(
            &twins,
            &base,
            &Scope::upper(vec![Term::main("v"), Term::main("u")]),
            Direction::Forward,
            Criterion::Aic,
            &family(),
        )
        .unwrap();
        assert_eq!(fit.spec.term_labels().into_iter().collect::<Vec<_>>(), vec!["u"]);
    }

    #[test]
    fn test_base_outside_scope_rejected() {
        let base = ModelSpec::builder("y").term("d").build().unwrap();
        let err = stepwise_select(
            &table(),
            &base,
            &Scope::upper(upper()),
            Direction::Both,
            Criterion::Bic,
            &family(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec(_)));
    }
}
