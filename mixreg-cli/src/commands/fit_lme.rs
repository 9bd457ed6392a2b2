//! Fit a linear mixed-effects model.
//!
//! mixreg fit-lme --data-file ... --response ... --terms ... --group ... --random-slopes age

use anyhow::Result;
use clap::Args;
use tracing::info;

use mixreg_core::{fit_linear_mixed_effects, FitDetails, LmeOptions};

use super::{
    build_random, build_spec, load_table, parse_method, report_and_save, DataArgs, OutputArgs,
    RandomArgs, SpecArgs,
};

#[derive(Args)]
pub struct FitLmeArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    spec: SpecArgs,

    #[command(flatten)]
    random: RandomArgs,

    /// Variance-parameter estimation: reml or ml
    #[arg(long, default_value = "reml")]
    method: String,

    /// Relative Cholesky diagonal below which the fit is declared singular
    #[arg(long, default_value = "1e-4")]
    singular_tol: f64,

    /// Maximum Nelder-Mead iterations
    #[arg(long, default_value = "2000")]
    max_iter: u64,

    /// Print the predicted random effects of every cluster
    #[arg(long, default_value = "false")]
    print_blups: bool,

    #[command(flatten)]
    output: OutputArgs,
}

pub fn run(args: FitLmeArgs) -> Result<()> {
    let table = load_table(&args.data)?;
    let spec = build_spec(&args.spec)?;
    let random = build_random(&args.random)?;

    info!("=== mixreg: linear mixed-effects fit ===");
    info!(
        "Random effects: intercept={}, slopes=[{}]",
        random.intercept,
        random.slopes.join(", ")
    );

    let mut options = LmeOptions {
        method: parse_method(&args.method)?,
        singular_tol: args.singular_tol,
        ..Default::default()
    };
    options.optimizer.max_iter = args.max_iter;
    let model = fit_linear_mixed_effects(&table, &spec, &random, &options)?;

    report_and_save(&model, &args.output)?;

    if args.print_blups {
        if let FitDetails::LinearMixed(d) = &model.details {
            println!("\nPredicted random effects ({}):", d.effect_names.join(", "));
            for (label, blup) in model.data.cluster_labels.iter().zip(&d.blups) {
                let values: Vec<String> = blup.iter().map(|b| format!("{:>10.4}", b)).collect();
                println!("{:<12} {}", label, values.join(" "));
            }
        }
    }
    Ok(())
}
