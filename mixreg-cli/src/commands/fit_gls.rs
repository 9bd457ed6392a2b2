//! Fit a generalized least squares model.
//!
//! mixreg fit-gls --data-file ... --response ... --terms ... --group ... --correlation cs

use anyhow::Result;
use clap::Args;
use tracing::info;

use mixreg_core::{fit_generalized_least_squares, GlsOptions};

use super::{
    build_spec, build_structure, load_table, parse_method, report_and_save, DataArgs, OutputArgs,
    SpecArgs, StructureArgs,
};

#[derive(Args)]
pub struct FitGlsArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    spec: SpecArgs,

    #[command(flatten)]
    structure: StructureArgs,

    /// Variance-parameter estimation: reml or ml
    #[arg(long, default_value = "reml")]
    method: String,

    /// Maximum Nelder-Mead iterations
    #[arg(long, default_value = "2000")]
    max_iter: u64,

    #[command(flatten)]
    output: OutputArgs,
}

pub fn run(args: FitGlsArgs) -> Result<()> {
    let table = load_table(&args.data)?;
    let spec = build_spec(&args.spec)?;
    let structure = build_structure(&args.structure)?;
    let method = parse_method(&args.method)?;

    info!("=== mixreg: GLS fit ===");
    info!("Structure: {:?}, method {}", structure.correlation, method);

    let mut options = GlsOptions::default();
    options.optimizer.max_iter = args.max_iter;
    let model = fit_generalized_least_squares(&table, &spec, &structure, method, &options)?;
    info!(
        "Converged after {} iterations, logLik {:.4}",
        model.iterations, model.log_likelihood
    );

    report_and_save(&model, &args.output)
}
