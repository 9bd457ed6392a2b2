//! Derivative-free minimization of variance-parameter objectives.
//!
//! Wraps argmin's Nelder-Mead. Objectives are plain closures over the
//! unconstrained parameter vector; points where the objective cannot be
//! evaluated should return a non-finite value, which is mapped to a large
//! finite penalty so the simplex moves away from them.

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use crate::error::{ModelError, Result};

pub(crate) const INFEASIBLE: f64 = 1e100;

#[derive(Debug, Clone)]
pub struct NelderMeadConfig {
    pub max_iter: u64,
    /// Stop once the standard deviation of the simplex costs drops below this.
    pub sd_tolerance: f64,
    /// Initial simplex edge, relative to max(|theta_i|, 1).
    pub initial_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 2000,
            sd_tolerance: 1e-10,
            initial_step: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimOutcome {
    pub theta: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
    pub converged: bool,
}

struct Objective<'a, F: Fn(&[f64]) -> f64> {
    f: &'a F,
}

impl<'a, F: Fn(&[f64]) -> f64> CostFunction for Objective<'a, F> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let v = (self.f)(theta);
        Ok(if v.is_finite() { v.min(INFEASIBLE) } else { INFEASIBLE })
    }
}

/// Minimize `f` from `theta0`. A converged run is restarted once from its
/// optimum with a smaller simplex to polish the solution.
pub fn minimize<F: Fn(&[f64]) -> f64>(
    f: &F,
    theta0: &[f64],
    config: &NelderMeadConfig,
) -> Result<OptimOutcome> {
    if theta0.is_empty() {
        return Ok(OptimOutcome {
            theta: Vec::new(),
            cost: f(&[]),
            iterations: 0,
            converged: true,
        });
    }

    let first = run(f, theta0, config.initial_step, config)?;
    if !first.converged {
        return Ok(first);
    }
    let second = run(f, &first.theta, config.initial_step * 0.1, config)?;
    let iterations = first.iterations + second.iterations;
    debug!(
        "Nelder-Mead: {} iterations, cost {:.8} -> {:.8}",
        iterations, first.cost, second.cost
    );
    let best = if second.cost <= first.cost { second } else { first };
    Ok(OptimOutcome { iterations, ..best })
}

fn run<F: Fn(&[f64]) -> f64>(
    f: &F,
    theta0: &[f64],
    step: f64,
    config: &NelderMeadConfig,
) -> Result<OptimOutcome> {
    let solver = NelderMead::new(simplex(theta0, step))
        .with_sd_tolerance(config.sd_tolerance)
        .map_err(optimizer_error)?;
    let max_iter = config.max_iter;
    let result = Executor::new(Objective { f }, solver)
        .configure(|state| state.max_iters(max_iter))
        .run()
        .map_err(optimizer_error)?;

    let state = result.state();
    let converged = !matches!(
        state.get_termination_reason(),
        Some(TerminationReason::MaxItersReached)
    );
    let theta = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| ModelError::Optimizer("no best parameter recorded".into()))?;
    Ok(OptimOutcome {
        theta,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        converged,
    })
}

fn simplex(theta0: &[f64], step: f64) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(theta0.len() + 1);
    vertices.push(theta0.to_vec());
    for i in 0..theta0.len() {
        let mut v = theta0.to_vec();
        v[i] += step * theta0[i].abs().max(1.0);
        vertices.push(v);
    }
    vertices
}

fn optimizer_error(e: Error) -> ModelError {
    ModelError::Optimizer(e.to_string())
}
