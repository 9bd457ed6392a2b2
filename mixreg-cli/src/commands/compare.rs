//! Likelihood-ratio comparison of saved models.
//!
//! mixreg compare --model-files small.mixreg.model,big.mixreg.model

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;

use mixreg_core::compare_chain;
use mixreg_core::model::serialization::load_model;

use super::split_list;

#[derive(Args)]
pub struct CompareArgs {
    /// Model files ordered from smallest to largest (comma-separated)
    #[arg(long)]
    model_files: String,
}

pub fn run(args: CompareArgs) -> Result<()> {
    let files = split_list(&args.model_files);
    if files.len() < 2 {
        bail!("compare needs at least two model files");
    }
    let models = files
        .iter()
        .map(|f| load_model(Path::new(f)))
        .collect::<mixreg_core::Result<Vec<_>>>()?;

    println!(
        "{:<30} {:>6} {:>12} {:>12} {:>12}",
        "model", "df", "AIC", "BIC", "logLik"
    );
    for (file, m) in files.iter().zip(&models) {
        println!(
            "{:<30} {:>6} {:>12.4} {:>12.4} {:>12.4}",
            file,
            m.n_params,
            m.aic(),
            m.bic(),
            m.log_likelihood
        );
    }

    let results = compare_chain(&models)?;
    println!("\n{:<30} {:>12} {:>6} {:>12}", "test", "L.Ratio", "df", "p-value");
    for (pair, r) in files.windows(2).zip(&results) {
        println!(
            "{:<30} {:>12.4} {:>6} {:>12.4e}",
            format!("{} vs {}", pair[0], pair[1]),
            r.statistic,
            r.df,
            r.p_value
        );
    }
    Ok(())
}
