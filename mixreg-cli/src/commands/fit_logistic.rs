//! Fit a logistic regression model.
//!
//! mixreg fit-logistic --data-file ... --response admit --terms gre,gpa,rank --categorical rank

use anyhow::Result;
use clap::Args;
use tracing::info;

use mixreg_core::{
    fit_logistic_regression, odds_ratios, FitDetails, InfluenceThresholds, LogisticOptions,
};

use super::{build_spec, load_table, parse_estimator, report_and_save, DataArgs, OutputArgs, SpecArgs};

#[derive(Args)]
pub struct FitLogisticArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    spec: SpecArgs,

    /// Maximum IRLS iterations
    #[arg(long, default_value = "25")]
    max_iter: usize,

    /// Relative deviance change declaring convergence
    #[arg(long, default_value = "1e-8")]
    tol: f64,

    /// Print odds ratios with confidence intervals
    #[arg(long, default_value = "false")]
    odds_ratios: bool,

    /// Flag observations with leverage above this value
    #[arg(long)]
    leverage_threshold: Option<f64>,

    /// Flag observations with |standardized residual| above this value
    #[arg(long)]
    residual_threshold: Option<f64>,

    /// Flag observations with Cook's distance above this value
    #[arg(long)]
    cooks_threshold: Option<f64>,

    #[command(flatten)]
    output: OutputArgs,
}

pub fn run(args: FitLogisticArgs) -> Result<()> {
    let table = load_table(&args.data)?;
    let spec = build_spec(&args.spec)?;

    info!("=== mixreg: logistic regression ===");
    let options = LogisticOptions {
        max_iter: args.max_iter,
        tol: args.tol,
    };
    let model = fit_logistic_regression(&table, &spec, &options)?;
    info!("IRLS converged after {} iterations", model.iterations);

    report_and_save(&model, &args.output)?;

    if args.odds_ratios {
        let kind = parse_estimator(&args.output.estimator)?;
        println!("\nOdds ratios ({} SE, {:.0}% CI):", kind, args.output.level * 100.0);
        println!("{:<20} {:>12} {:>12} {:>12}", "term", "odds.ratio", "low", "high");
        for or in odds_ratios(&model, kind, args.output.level)? {
            println!(
                "{:<20} {:>12.6} {:>12.6} {:>12.6}",
                or.term, or.odds_ratio, or.low, or.high
            );
        }
    }

    let thresholds = InfluenceThresholds {
        leverage: args.leverage_threshold,
        standardized_residual: args.residual_threshold,
        cooks_distance: args.cooks_threshold,
    };
    if let FitDetails::Logistic(d) = &model.details {
        let flags = d.diagnostics.flag_influential(&thresholds);
        if !flags.is_empty() {
            println!("\nInfluential observations:");
            for f in flags {
                let reasons: Vec<String> = f.reasons.iter().map(|r| format!("{:?}", r)).collect();
                println!(
                    "row {:<6} hat {:.4}  std.resid {:>8.4}  cook {:.4}  [{}]",
                    model.data.rows[f.index] + 1,
                    d.diagnostics.hat[f.index],
                    d.diagnostics.standardized_residuals[f.index],
                    d.diagnostics.cooks_distance[f.index],
                    reasons.join(", ")
                );
            }
        }
    }
    Ok(())
}
