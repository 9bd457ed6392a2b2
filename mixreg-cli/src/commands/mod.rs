//! Subcommands and the argument groups they share.

pub mod compare;
pub mod fit_gls;
pub mod fit_lme;
pub mod fit_logistic;
pub mod inspect;
pub mod stepwise;
pub mod summarize;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use mixreg_core::model::serialization;
use mixreg_core::{
    coefficient_table, CovarianceStructure, EstimationMethod, EstimatorKind, FittedModel, ModelSpec,
    RandomEffects, Term,
};
use mixreg_data::{coerce_categorical, Delimiter, LoadOptions, Table};

/// Input file and column typing.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Delimited data file (header row required)
    #[arg(long)]
    pub data_file: String,

    /// Field delimiter: auto, comma, tab, or whitespace
    #[arg(long, default_value = "auto")]
    pub delimiter: String,

    /// Columns to read as categorical (comma-separated)
    #[arg(long, default_value = "")]
    pub categorical: String,

    /// Columns to read as identifiers (comma-separated)
    #[arg(long, default_value = "")]
    pub identifiers: String,

    /// Explicit level order, e.g. "rank=1,2,3,4" (repeatable)
    #[arg(long)]
    pub levels: Vec<String>,
}

/// Response, fixed effects and cluster column.
#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Response column
    #[arg(long)]
    pub response: String,

    /// Fixed-effect terms (comma-separated, interactions as a:b)
    #[arg(long, default_value = "")]
    pub terms: String,

    /// Cluster / grouping column
    #[arg(long)]
    pub group: Option<String>,

    /// Drop the intercept
    #[arg(long, default_value = "false")]
    pub no_intercept: bool,
}

/// Where and how a fitted model is written.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output file prefix; the model is written to <prefix>.mixreg.model
    #[arg(long)]
    pub output_prefix: Option<String>,

    /// Also save a JSON sidecar
    #[arg(long, default_value = "false")]
    pub save_json: bool,

    /// Covariance estimator for the coefficient table: model, cr0, cr1, cr2
    #[arg(long, default_value = "model")]
    pub estimator: String,

    /// Confidence level for the coefficient table
    #[arg(long, default_value = "0.95")]
    pub level: f64,
}

pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(String::from)
        .collect()
}

pub fn load_table(args: &DataArgs) -> Result<Table> {
    let delimiter = match args.delimiter.to_lowercase().as_str() {
        "auto" => Delimiter::Auto,
        "comma" | "," => Delimiter::Comma,
        "tab" | "\\t" => Delimiter::Tab,
        "whitespace" | "space" => Delimiter::Whitespace,
        _ => bail!("Unknown delimiter: {}", args.delimiter),
    };
    let options = LoadOptions {
        delimiter,
        identifiers: split_list(&args.identifiers),
        categorical: split_list(&args.categorical),
    };
    let mut table = mixreg_data::load(Path::new(&args.data_file), &options)?;
    info!(
        "Loaded {} rows x {} columns from {}",
        table.n_rows(),
        table.n_cols(),
        args.data_file
    );

    for spec in &args.levels {
        let Some((column, levels)) = spec.split_once('=') else {
            bail!("Level order must look like column=a,b,c: {}", spec);
        };
        let levels = split_list(levels);
        let refs: Vec<&str> = levels.iter().map(String::as_str).collect();
        table = coerce_categorical(&table, column.trim(), &refs)?;
        info!("Column '{}' levels: {}", column.trim(), levels.join(", "));
    }
    Ok(table)
}

pub fn parse_terms(s: &str) -> Vec<Term> {
    split_list(s).iter().map(|t| Term::parse(t)).collect()
}

pub fn build_spec(args: &SpecArgs) -> Result<ModelSpec> {
    let mut builder = ModelSpec::builder(&args.response);
    for term in parse_terms(&args.terms) {
        builder = builder.add_term(term);
    }
    if let Some(group) = &args.group {
        builder = builder.group(group);
    }
    if args.no_intercept {
        builder = builder.no_intercept();
    }
    Ok(builder.build()?)
}

pub fn parse_estimator(s: &str) -> Result<EstimatorKind> {
    Ok(s.parse::<EstimatorKind>()?)
}

pub fn parse_method(s: &str) -> Result<EstimationMethod> {
    match s.to_lowercase().as_str() {
        "reml" => Ok(EstimationMethod::Reml),
        "ml" => Ok(EstimationMethod::Ml),
        _ => bail!("Unknown estimation method: {}", s),
    }
}

/// Residual covariance options of a GLS fit.
#[derive(Args, Debug, Clone)]
pub struct StructureArgs {
    /// Within-cluster correlation: independent, cs, or ar1
    #[arg(long, default_value = "independent")]
    pub correlation: String,

    /// Hold the correlation at this value instead of estimating it
    #[arg(long)]
    pub fixed_rho: Option<f64>,

    /// Estimate a separate residual variance per level of this column
    #[arg(long)]
    pub variance_by: Option<String>,
}

pub fn build_structure(args: &StructureArgs) -> Result<CovarianceStructure> {
    let mut structure = match args.correlation.to_lowercase().as_str() {
        "independent" | "identity" | "none" => CovarianceStructure::independent(),
        "cs" | "compound-symmetry" | "exchangeable" => CovarianceStructure::compound_symmetry(),
        "ar1" => CovarianceStructure::ar1(),
        _ => bail!("Unknown correlation structure: {}", args.correlation),
    };
    if let Some(rho) = args.fixed_rho {
        structure = structure.with_fixed_correlation(rho);
    }
    if let Some(column) = &args.variance_by {
        structure = structure.with_group_variances(column);
    }
    Ok(structure)
}

/// Random-effects options of a mixed-model fit.
#[derive(Args, Debug, Clone)]
pub struct RandomArgs {
    /// Random slopes on these columns (comma-separated)
    #[arg(long, default_value = "")]
    pub random_slopes: String,

    /// Omit the random intercept
    #[arg(long, default_value = "false")]
    pub no_random_intercept: bool,
}

pub fn build_random(args: &RandomArgs) -> Result<RandomEffects> {
    let slopes = split_list(&args.random_slopes);
    if args.no_random_intercept {
        if slopes.is_empty() {
            bail!("A model without a random intercept needs at least one random slope");
        }
        let refs: Vec<&str> = slopes.iter().map(String::as_str).collect();
        return Ok(RandomEffects::slopes_only(&refs));
    }
    Ok(slopes
        .iter()
        .fold(RandomEffects::intercept(), |r, s| r.slope(s)))
}

pub fn print_coefficients(model: &FittedModel, kind: EstimatorKind, level: f64) -> Result<()> {
    let rows = coefficient_table(model, kind, level)?;
    println!("\nCoefficients ({} SE, {:.0}% CI):", kind, level * 100.0);
    println!(
        "{:<20} {:>12} {:>12} {:>10} {:>8} {:>10} {:>12} {:>12}",
        "term", "estimate", "std.error", "statistic", "df", "p.value", "low", "high"
    );
    for r in rows {
        let df = if r.df.is_finite() {
            format!("{:.1}", r.df)
        } else {
            "Inf".to_string()
        };
        println!(
            "{:<20} {:>12.6} {:>12.6} {:>10.3} {:>8} {:>10.3e} {:>12.6} {:>12.6}",
            r.name, r.estimate, r.std_error, r.statistic, df, r.p_value, r.low, r.high
        );
    }
    Ok(())
}

/// Print the summary and coefficient table, then save if a prefix was given.
pub fn report_and_save(model: &FittedModel, out: &OutputArgs) -> Result<()> {
    for w in &model.warnings {
        tracing::warn!("{}", w);
    }
    println!("{}", serialization::model_summary(model));
    print_coefficients(model, parse_estimator(&out.estimator)?, out.level)?;

    if let Some(prefix) = &out.output_prefix {
        let model_path = Path::new(prefix).with_extension("mixreg.model");
        serialization::save_model(model, &model_path)
            .with_context(|| format!("writing {}", model_path.display()))?;
        info!("Model saved to {}", model_path.display());

        if out.save_json {
            let json_path = Path::new(prefix).with_extension("mixreg.model.json");
            serialization::save_model_json(model, &json_path)?;
            info!("JSON sidecar saved to {}", json_path.display());
        }
    }
    Ok(())
}
