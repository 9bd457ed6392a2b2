//! Binomial family on the logit scale.

/// Fitted probabilities are kept this far from 0 and 1 inside IRLS so the
/// working weights stay positive.
pub const PROB_EPS: f64 = 1e-10;

/// log(mu / (1 - mu))
pub fn logit(mu: f64) -> f64 {
    mu.ln() - (-mu).ln_1p()
}

/// Inverse logit, evaluated without overflow for large |eta|.
pub fn expit(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// Binomial variance mu (1 - mu); also d(mu)/d(eta) under the logit link.
pub fn variance(mu: f64) -> f64 {
    mu * (1.0 - mu)
}

pub fn clamp_probability(mu: f64) -> f64 {
    mu.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// Deviance contribution of one 0/1 outcome.
pub fn unit_deviance(y: f64, mu: f64) -> f64 {
    if y > 0.5 {
        -2.0 * mu.ln()
    } else {
        -2.0 * (-mu).ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logit_inverse() {
        assert_eq!(expit(0.0), 0.5);
        assert!(logit(0.5).abs() < 1e-15);
        for mu in [1e-6, 0.3, 0.75, 1.0 - 1e-6] {
            assert!((expit(logit(mu)) - mu).abs() < 1e-12);
        }
        assert!((variance(expit(0.0)) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_expit_extremes() {
        assert_eq!(expit(-800.0), 0.0);
        assert_eq!(expit(800.0), 1.0);
        assert!(expit(-40.0) > 0.0);
        assert_eq!(clamp_probability(0.0), PROB_EPS);
        assert_eq!(clamp_probability(0.4), 0.4);
    }

    #[test]
    fn test_unit_deviance() {
        assert!((unit_deviance(1.0, 0.5) - 2.0 * std::f64::consts::LN_2).abs() < 1e-15);
        assert_eq!(unit_deviance(0.0, 0.0), 0.0);
        assert!((unit_deviance(0.0, 0.2) - unit_deviance(1.0, 0.8)).abs() < 1e-15);
    }
}
