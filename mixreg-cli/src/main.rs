//! mixreg: mixed-effects, GLS and logistic regression from the command line.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mixreg",
    version,
    about = "Mixed-effects, GLS and logistic regression with robust inference",
    long_about = "Fits linear mixed-effects, generalized least squares and logistic\n\
                  regression models to delimited data files, reports model-based and\n\
                  cluster-robust inference, and compares or selects nested models."
)]
struct Cli {
    /// Worker threads for parallel candidate fits
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// More log output; repeat for debug (-vv) and trace (-vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grouped mean / sd / count of a numeric column
    Summarize(commands::summarize::SummarizeArgs),

    /// Fit a linear mixed-effects model
    FitLme(commands::fit_lme::FitLmeArgs),

    /// Fit a generalized least squares model
    FitGls(commands::fit_gls::FitGlsArgs),

    /// Fit a logistic regression model
    FitLogistic(commands::fit_logistic::FitLogisticArgs),

    /// Report inference for a saved model
    Inspect(commands::inspect::InspectArgs),

    /// Likelihood-ratio comparison of saved nested models
    Compare(commands::compare::CompareArgs),

    /// Stepwise term selection by AIC or BIC
    Stepwise(commands::stepwise::StepwiseArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("mixreg v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("rayon pool: {} threads", cli.threads);

    match cli.command {
        Commands::Summarize(args) => commands::summarize::run(args),
        Commands::FitLme(args) => commands::fit_lme::run(args),
        Commands::FitGls(args) => commands::fit_gls::run(args),
        Commands::FitLogistic(args) => commands::fit_logistic::run(args),
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Compare(args) => commands::compare::run(args),
        Commands::Stepwise(args) => commands::stepwise::run(args),
    }
}
