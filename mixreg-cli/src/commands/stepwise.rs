//! Stepwise term selection.
//!
//! mixreg stepwise --data-file ... --response ... --terms a --upper a,b,c,a:b --family gls

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use mixreg_core::{
    stepwise_select, Criterion, Direction, GlsOptions, LmeOptions, LogisticOptions, ModelFamily,
    Scope,
};

use super::{
    build_random, build_spec, build_structure, load_table, parse_method, parse_terms,
    report_and_save, DataArgs, OutputArgs, RandomArgs, SpecArgs, StructureArgs,
};

#[derive(Args)]
pub struct StepwiseArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Starting model
    #[command(flatten)]
    spec: SpecArgs,

    /// Model family: gls, lme, or logistic
    #[arg(long, default_value = "gls")]
    family: String,

    #[command(flatten)]
    structure: StructureArgs,

    #[command(flatten)]
    random: RandomArgs,

    /// Variance-parameter estimation for linear families: reml or ml
    #[arg(long, default_value = "ml")]
    method: String,

    /// Terms that may enter the model (comma-separated)
    #[arg(long)]
    upper: String,

    /// Terms that must stay in the model (comma-separated)
    #[arg(long, default_value = "")]
    lower: String,

    /// Search direction: forward, backward, or both
    #[arg(long, default_value = "both")]
    direction: String,

    /// Selection criterion: aic or bic
    #[arg(long, default_value = "aic")]
    criterion: String,

    #[command(flatten)]
    output: OutputArgs,
}

pub fn run(args: StepwiseArgs) -> Result<()> {
    let table = load_table(&args.data)?;
    let base = build_spec(&args.spec)?;
    let method = parse_method(&args.method)?;

    let family = match args.family.to_lowercase().as_str() {
        "gls" => ModelFamily::Gls {
            structure: build_structure(&args.structure)?,
            method,
            options: GlsOptions::default(),
        },
        "lme" => ModelFamily::LinearMixed {
            random: build_random(&args.random)?,
            options: LmeOptions {
                method,
                ..Default::default()
            },
        },
        "logistic" => ModelFamily::Logistic {
            options: LogisticOptions::default(),
        },
        _ => bail!("Unknown model family: {}", args.family),
    };
    let direction = match args.direction.to_lowercase().as_str() {
        "forward" => Direction::Forward,
        "backward" => Direction::Backward,
        "both" => Direction::Both,
        _ => bail!("Unknown direction: {}", args.direction),
    };
    let criterion = match args.criterion.to_lowercase().as_str() {
        "aic" => Criterion::Aic,
        "bic" => Criterion::Bic,
        _ => bail!("Unknown criterion: {}", args.criterion),
    };
    let scope = Scope::new(parse_terms(&args.lower), parse_terms(&args.upper));

    info!("=== mixreg: stepwise selection ===");
    info!("Direction {:?}, criterion {:?}", direction, criterion);
    let model = stepwise_select(&table, &base, &scope, direction, criterion, &family)?;

    report_and_save(&model, &args.output)
}
