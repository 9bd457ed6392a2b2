//! Structured model specification.
//!
//! A model is a response, an ordered list of terms (main effects and
//! interactions), an intercept flag and an optional grouping column. Specs are
//! assembled with [`ModelSpec::builder`]; there is no formula parser.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A main effect (one variable) or an interaction (several variables).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    variables: Vec<String>,
}

impl Term {
    pub fn main(variable: &str) -> Self {
        Self {
            variables: vec![variable.to_string()],
        }
    }

    pub fn interaction(variables: &[&str]) -> Self {
        Self {
            variables: variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Parse an `a:b` label.
    pub fn parse(label: &str) -> Self {
        Self {
            variables: label.split(':').map(|v| v.trim().to_string()).collect(),
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn label(&self) -> String {
        self.variables.join(":")
    }

    pub fn order(&self) -> usize {
        self.variables.len()
    }

    /// True if every variable of `self` appears in `other` and `other` has more.
    pub fn is_marginal_to(&self, other: &Term) -> bool {
        let mine: BTreeSet<&String> = self.variables.iter().collect();
        let theirs: BTreeSet<&String> = other.variables.iter().collect();
        mine.len() < theirs.len() && mine.is_subset(&theirs)
    }

    /// Same variable set, regardless of order.
    pub fn same_variables(&self, other: &Term) -> bool {
        let mine: BTreeSet<&String> = self.variables.iter().collect();
        let theirs: BTreeSet<&String> = other.variables.iter().collect();
        mine == theirs
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Response, fixed-effect terms, intercept and grouping column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub response: String,
    pub terms: Vec<Term>,
    pub intercept: bool,
    pub group: Option<String>,
}

impl ModelSpec {
    pub fn builder(response: &str) -> ModelSpecBuilder {
        ModelSpecBuilder {
            response: response.to_string(),
            terms: Vec::new(),
            intercept: true,
            group: None,
        }
    }

    pub fn has_term(&self, term: &Term) -> bool {
        self.terms.iter().any(|t| t.same_variables(term))
    }

    /// Term labels, sorted.
    pub fn term_labels(&self) -> BTreeSet<String> {
        self.terms.iter().map(|t| canonical_label(t)).collect()
    }

    /// Copy with `term` appended.
    pub fn with_term(&self, term: Term) -> ModelSpec {
        let mut spec = self.clone();
        if !spec.has_term(&term) {
            spec.terms.push(term);
        }
        spec
    }

    /// Copy with `term` removed.
    pub fn without_term(&self, term: &Term) -> ModelSpec {
        let mut spec = self.clone();
        spec.terms.retain(|t| !t.same_variables(term));
        spec
    }

    /// Every column the spec reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars: BTreeSet<String> = self
            .terms
            .iter()
            .flat_map(|t| t.variables().iter().cloned())
            .collect();
        vars.insert(self.response.clone());
        if let Some(g) = &self.group {
            vars.insert(g.clone());
        }
        vars
    }
}

/// Order-insensitive label used for set comparisons between specs.
pub(crate) fn canonical_label(term: &Term) -> String {
    let mut vars = term.variables().to_vec();
    vars.sort();
    vars.join(":")
}

pub struct ModelSpecBuilder {
    response: String,
    terms: Vec<Term>,
    intercept: bool,
    group: Option<String>,
}

impl ModelSpecBuilder {
    pub fn term(mut self, variable: &str) -> Self {
        self.terms.push(Term::main(variable));
        self
    }

    pub fn interaction(mut self, variables: &[&str]) -> Self {
        self.terms.push(Term::interaction(variables));
        self
    }

    pub fn add_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn no_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    pub fn group(mut self, column: &str) -> Self {
        self.group = Some(column.to_string());
        self
    }

    /// Validate and build. Duplicate terms are dropped; a term may not use the
    /// response or grouping column.
    pub fn build(self) -> Result<ModelSpec> {
        if self.response.trim().is_empty() {
            return Err(ModelError::InvalidSpec("empty response name".into()));
        }
        let mut terms: Vec<Term> = Vec::with_capacity(self.terms.len());
        for term in self.terms {
            if term.variables().is_empty() || term.variables().iter().any(|v| v.is_empty()) {
                return Err(ModelError::InvalidSpec("empty term".into()));
            }
            let unique: BTreeSet<&String> = term.variables().iter().collect();
            if unique.len() != term.order() {
                return Err(ModelError::InvalidSpec(format!(
                    "term '{}' repeats a variable",
                    term
                )));
            }
            if term.variables().contains(&self.response) {
                return Err(ModelError::InvalidSpec(format!(
                    "term '{}' uses the response '{}'",
                    term, self.response
                )));
            }
            if let Some(g) = &self.group {
                if term.variables().contains(g) {
                    return Err(ModelError::InvalidSpec(format!(
                        "term '{}' uses the grouping column '{}'",
                        term, g
                    )));
                }
            }
            if !terms.iter().any(|t| t.same_variables(&term)) {
                terms.push(term);
            }
        }
        if terms.is_empty() && !self.intercept {
            return Err(ModelError::InvalidSpec("model has no terms".into()));
        }
        Ok(ModelSpec {
            response: self.response,
            terms,
            intercept: self.intercept,
            group: self.group,
        })
    }
}

/// Random-effect terms of a mixed model: an optional random intercept plus
/// random slopes, all varying by the spec's grouping column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomEffects {
    pub intercept: bool,
    pub slopes: Vec<String>,
}

impl RandomEffects {
    pub fn intercept() -> Self {
        Self {
            intercept: true,
            slopes: Vec::new(),
        }
    }

    pub fn slope(mut self, variable: &str) -> Self {
        if !self.slopes.iter().any(|s| s == variable) {
            self.slopes.push(variable.to_string());
        }
        self
    }

    pub fn slopes_only(variables: &[&str]) -> Self {
        Self {
            intercept: false,
            slopes: variables.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub(crate) fn terms(&self) -> Vec<Term> {
        self.slopes.iter().map(|s| Term::main(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = ModelSpec::builder("distance")
            .term("age")
            .term("Sex")
            .interaction(&["age", "Sex"])
            .term("age")
            .group("Subject")
            .build()
            .unwrap();
        assert_eq!(spec.terms.len(), 3);
        assert_eq!(spec.terms[2].label(), "age:Sex");
        assert!(spec.has_term(&Term::interaction(&["Sex", "age"])));
        assert_eq!(spec.group.as_deref(), Some("Subject"));
    }

    #[test]
    fn test_rejects_response_in_term() {
        let err = ModelSpec::builder("y").term("y").build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec(_)));
    }

    #[test]
    fn test_marginality() {
        let a = Term::main("age");
        let ax = Term::interaction(&["age", "Sex"]);
        assert!(a.is_marginal_to(&ax));
        assert!(!ax.is_marginal_to(&a));
        assert!(!a.is_marginal_to(&a));
    }

    #[test]
    fn test_with_and_without() {
        let spec = ModelSpec::builder("y").term("a").build().unwrap();
        let grown = spec.with_term(Term::main("b"));
        assert_eq!(grown.term_labels().len(), 2);
        let back = grown.without_term(&Term::main("b"));
        assert_eq!(back, spec);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(Term::parse("age:Sex"), Term::interaction(&["age", "Sex"]));
    }
}
