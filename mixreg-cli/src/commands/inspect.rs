//! Inference on a saved model.
//!
//! mixreg inspect --model-file fit.mixreg.model --estimator cr2 --interval profile

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use mixreg_core::model::serialization::{load_model, model_summary};
use mixreg_core::{
    confidence_interval, odds_ratios, satterthwaite_test, term_contrast, wald_test, IntervalMethod,
};
use mixreg_linalg::DenseMatrix;

use super::{parse_estimator, print_coefficients};

#[derive(Args)]
pub struct InspectArgs {
    /// Model file written by a fit command (.mixreg.model)
    #[arg(long)]
    model_file: String,

    /// Covariance estimator: model, cr0, cr1, cr2
    #[arg(long, default_value = "model")]
    estimator: String,

    /// Confidence level
    #[arg(long, default_value = "0.95")]
    level: f64,

    /// Interval method for --coefficients: wald or profile
    #[arg(long, default_value = "wald")]
    interval: String,

    /// Coefficients to report intervals and Satterthwaite tests for (comma-separated)
    #[arg(long, default_value = "")]
    coefficients: String,

    /// Joint Wald test of every coefficient of these terms (repeatable)
    #[arg(long)]
    wald_term: Vec<String>,

    /// Joint Wald test of a contrast matrix, rows separated by ';'
    #[arg(long)]
    contrast: Option<String>,

    /// Print odds ratios (logistic models)
    #[arg(long, default_value = "false")]
    odds_ratios: bool,
}

fn parse_contrast(s: &str) -> Result<DenseMatrix> {
    let rows: Vec<Vec<f64>> = s
        .split(';')
        .filter(|r| !r.trim().is_empty())
        .map(|r| {
            r.split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
        })
        .collect::<std::result::Result<_, _>>()?;
    let Some(ncols) = rows.first().map(Vec::len) else {
        bail!("Empty contrast matrix");
    };
    if rows.iter().any(|r| r.len() != ncols) {
        bail!("Contrast rows have different lengths");
    }
    Ok(DenseMatrix::from_rows(&rows, ncols))
}

pub fn run(args: InspectArgs) -> Result<()> {
    let model = load_model(Path::new(&args.model_file))?;
    let kind = parse_estimator(&args.estimator)?;
    let method = match args.interval.to_lowercase().as_str() {
        "wald" => IntervalMethod::Wald,
        "profile" => IntervalMethod::Profile,
        _ => bail!("Unknown interval method: {}", args.interval),
    };
    info!("Loaded {} model from {}", model.family_name(), args.model_file);

    println!("Model: {}", args.model_file);
    println!("{}", model_summary(&model));
    print_coefficients(&model, kind, args.level)?;

    let names = super::split_list(&args.coefficients);
    if !names.is_empty() {
        println!(
            "\n{:<20} {:>12} {:>12} {:>10} {:>10} {:>12} {:>12}",
            "coefficient", "estimate", "std.error", "df", "p.value", "low", "high"
        );
        for name in &names {
            let test = satterthwaite_test(&model, kind, name)?;
            let (low, high) = confidence_interval(&model, name, kind, args.level, method)?;
            println!(
                "{:<20} {:>12.6} {:>12.6} {:>10.2} {:>10.3e} {:>12.6} {:>12.6}",
                name, test.estimate, test.std_error, test.df, test.p_value, low, high
            );
        }
    }

    for term in &args.wald_term {
        let contrast = term_contrast(&model, term)?;
        let test = wald_test(&model, kind, &contrast)?;
        println!(
            "\nWald test of '{}' ({}): chi2 = {:.4} on {} df, p = {:.4e}",
            term, test.estimator, test.statistic, test.df, test.p_value
        );
    }

    if let Some(contrast) = &args.contrast {
        let test = wald_test(&model, kind, &parse_contrast(contrast)?)?;
        println!(
            "\nWald test of contrast ({}): chi2 = {:.4} on {} df, p = {:.4e}",
            test.estimator, test.statistic, test.df, test.p_value
        );
    }

    if args.odds_ratios {
        println!("\nOdds ratios:");
        for or in odds_ratios(&model, kind, args.level)? {
            println!(
                "{:<20} {:>12.6} {:>12.6} {:>12.6}",
                or.term, or.odds_ratio, or.low, or.high
            );
        }
    }
    Ok(())
}
