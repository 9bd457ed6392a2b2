//! Grouped summaries of a numeric column.
//!
//! mixreg summarize --data-file ... --group-by Sex,age --value distance --stat mean

use anyhow::{bail, Result};
use clap::Args;

use mixreg_data::table::format_number;
use mixreg_data::{group_summary, Aggregator};

use super::{load_table, split_list, DataArgs};

#[derive(Args)]
pub struct SummarizeArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Grouping columns (comma-separated)
    #[arg(long)]
    group_by: String,

    /// Numeric column to summarize
    #[arg(long)]
    value: String,

    /// Statistics to report: mean, sd, count (comma-separated)
    #[arg(long, default_value = "mean,sd,count")]
    stat: String,
}

pub fn run(args: SummarizeArgs) -> Result<()> {
    let table = load_table(&args.data)?;
    let groups = split_list(&args.group_by);
    let refs: Vec<&str> = groups.iter().map(String::as_str).collect();

    let mut stats = Vec::new();
    for s in split_list(&args.stat) {
        let agg = match s.to_lowercase().as_str() {
            "mean" => Aggregator::Mean,
            "sd" => Aggregator::Sd,
            "count" | "n" => Aggregator::Count,
            _ => bail!("Unknown statistic: {}", s),
        };
        stats.push((s, group_summary(&table, &refs, &args.value, agg)?));
    }
    let Some((_, first)) = stats.first() else {
        bail!("No statistics requested");
    };

    let mut header: Vec<String> = groups.clone();
    header.extend(stats.iter().map(|(s, _)| s.clone()));
    println!("{}", header.join("\t"));
    for key in first.keys() {
        let mut fields = key.clone();
        for (_, values) in &stats {
            let value = values.get(key).map_or("NA".to_string(), |v| format_number(*v));
            fields.push(value);
        }
        println!("{}", fields.join("\t"));
    }
    Ok(())
}
