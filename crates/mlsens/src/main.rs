use clap::Parser;
use mlsens::{RunOptions, init_logging, run};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mlsens")]
#[command(about = "Multi-level sensitivity analysis of building energy simulations")]
struct Args {
    /// Zone-mapping table (building_id, idf_zone_name, sql_zone_name)
    #[arg(long)]
    zones: PathBuf,

    /// Equipment-assignment table (building_id, equipment_id, zone_id)
    #[arg(long)]
    equipment: Option<PathBuf>,

    /// Zone geometry table (building_id, zone_id, floor_area, volume)
    #[arg(long)]
    geometry: Option<PathBuf>,

    /// Long-format series table, baseline and variants
    #[arg(long)]
    series: PathBuf,

    /// Modification ledger table
    #[arg(long)]
    ledger: PathBuf,

    /// Saltelli evaluations (YAML)
    #[arg(long)]
    sobol: Option<PathBuf>,

    /// Analysis configuration (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for result tables and the log file
    #[arg(short, long, default_value = "mlsens-out")]
    out_dir: PathBuf,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Do not mirror warnings to stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_logging(&args.out_dir, &args.log_level, !args.quiet)?;

    let summary = run(&RunOptions {
        zones: args.zones,
        equipment: args.equipment,
        geometry: args.geometry,
        series: args.series,
        ledger: args.ledger,
        sobol: args.sobol,
        config: args.config,
        out_dir: args.out_dir,
        workers: args.workers,
    })?;

    println!(
        "{} results ({} scored), {} failed buildings",
        summary.results, summary.scored, summary.failed_units
    );
    println!("results:     {}", summary.results_path.display());
    println!("diagnostics: {}", summary.diagnostics_path.display());
    Ok(())
}
