use clap::{CommandFactory, Parser, Subcommand};
use ordmnar::seed::child_seed;
use ordmnar::{
    missing_mask, ChainedEquationsImputer, ImputeConfig, Imputer, MissingnessInjector,
    MultilevelImputer, ProportionComparator, ShiftTable, SimulationConfig,
    ThresholdShiftRelabeler,
};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a synthetic cohort and write it to CSV
    Simulate(SimulateArgs),
    /// Run the full sensitivity pipeline: inject, impute, relabel, compare, pool
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of records
    #[arg(long, default_value_t = 1000)]
    rows: usize,

    /// Number of ordered levels of the ordinal variable
    #[arg(long, default_value_t = 5)]
    levels: usize,

    /// Number of clusters (0 for none)
    #[arg(long, default_value_t = 0)]
    clusters: usize,

    /// Comma-separated stratum labels (omit for none)
    #[arg(long, value_delimiter = ',')]
    strata: Option<Vec<String>>,

    /// Master seed
    #[arg(long, default_value_t = 17)]
    seed: u64,

    /// Path of the output CSV file
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the input CSV data file
    #[arg(short, long)]
    data: PathBuf,

    /// Binary outcome column (coded 0/1)
    #[arg(long, default_value = "outcome")]
    outcome: String,

    /// Ordinal column (integer-coded 1..=levels)
    #[arg(long, default_value = "severity")]
    ordinal: String,

    /// Number of ordered levels; inferred from the data when omitted
    #[arg(long)]
    levels: Option<usize>,

    /// Row-identity column
    #[arg(long)]
    id: Option<String>,

    /// Comma-separated levels removed among outcome == 1 rows
    #[arg(long, value_delimiter = ',')]
    group_a: Option<Vec<i64>>,

    /// Removal probability for group A
    #[arg(long, default_value_t = 0.0)]
    prob_a: f64,

    /// Comma-separated levels removed among outcome == 0 rows
    #[arg(long, value_delimiter = ',')]
    group_b: Option<Vec<i64>>,

    /// Removal probability for group B
    #[arg(long, default_value_t = 0.0)]
    prob_b: f64,

    /// Imputation-model formula; defaults to "<target> ~ <outcome>"
    #[arg(long)]
    formula: Option<String>,

    /// Analysis-model formula; defaults to "<outcome> ~ <target>"
    #[arg(long)]
    analysis_formula: Option<String>,

    /// Imputation engine [choices: mice, multilevel]
    #[arg(long, default_value = "mice")]
    engine: String,

    /// Cluster column (required by the multilevel engine)
    #[arg(long)]
    cluster: Option<String>,

    /// Number of imputations
    #[arg(long, default_value_t = 5)]
    imputations: usize,

    /// Threshold-shift scenarios: vectors of levels-1 comma-separated deltas,
    /// scenarios separated by ';' (e.g. "0,0,0,0;-0.5,-0.5,-0.5,-0.5")
    #[arg(long, default_value = "0,0,0,0")]
    deltas: String,

    /// Mean of the latent noise
    #[arg(long, default_value_t = 0.0)]
    noise_mean: f64,

    /// Standard deviation of the latent noise
    #[arg(long, default_value_t = 1.0)]
    noise_sd: f64,

    /// Master seed
    #[arg(long, default_value_t = 17)]
    seed: u64,

    /// Path to export the tables as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Path to export the tables as Markdown
    #[arg(long)]
    output_markdown: Option<PathBuf>,
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn Error>> {
    let config = SimulationConfig {
        rows: args.rows,
        level_count: args.levels,
        strata: args.strata.unwrap_or_default(),
        clusters: args.clusters,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut df = ordmnar::simulate_cohort(&config, &mut rng)?;
    let file = File::create(&args.output)?;
    let mut writer = BufWriter::new(file);
    CsvWriter::new(&mut writer).finish(&mut df)?;
    println!(
        "Wrote {} rows with {} ordinal levels to {}",
        args.rows,
        args.levels,
        args.output.display()
    );
    Ok(())
}

fn parse_shift_table(spec: &str, level_count: usize) -> Result<ShiftTable, Box<dyn Error>> {
    let mut table = ShiftTable::new(level_count);
    for (index, scenario) in spec.split(';').enumerate() {
        let shifts = scenario
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| format!("invalid delta '{}': {}", scenario, e))?;
        table.scenario(&format!("delta{}", index + 1), &shifts)?;
    }
    Ok(table)
}

fn run_pipeline(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let df = LazyCsvReader::new(&args.data)
        .with_has_header(true)
        .finish()?
        .collect()?;

    let inject_requested = args.group_a.is_some() || args.group_b.is_some();
    let (df, target) = if inject_requested {
        let mut injector = MissingnessInjector::new(df, &args.outcome, &args.ordinal);
        if let Some(levels) = args.group_a.as_deref() {
            injector.group_a(levels, args.prob_a);
        }
        if let Some(levels) = args.group_b.as_deref() {
            injector.group_b(levels, args.prob_b);
        }
        if let Some(id) = &args.id {
            injector.id_column(id);
        }
        let mut rng = StdRng::seed_from_u64(child_seed(args.seed, 0, 0));
        let injected = injector.inject(&mut rng)?;
        (injected, format!("{}_mnar", args.ordinal))
    } else {
        (df, args.ordinal.clone())
    };

    let level_count = match args.levels {
        Some(k) => k,
        None => infer_level_count(&df, &args.ordinal)?,
    };
    let mask = missing_mask(&df, &target)?;
    let missing_total = mask.iter().filter(|&&m| m).count();
    println!(
        "{} of {} rows of '{}' are missing before imputation",
        missing_total,
        df.height(),
        target
    );

    let formula = args
        .formula
        .unwrap_or_else(|| format!("{} ~ {}", target, args.outcome));
    let engine: Box<dyn Imputer> = match args.engine.as_str() {
        "mice" => Box::new(ChainedEquationsImputer::new(&formula, level_count)?),
        "multilevel" => {
            let cluster = args
                .cluster
                .as_deref()
                .ok_or("the multilevel engine requires --cluster")?;
            Box::new(MultilevelImputer::new(&formula, level_count, cluster)?)
        }
        other => return Err(format!("unknown imputation engine: {}", other).into()),
    };
    let config = ImputeConfig {
        imputations: args.imputations,
        ..ImputeConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(child_seed(args.seed, 1, 0));
    let ensemble = engine.impute(&df, &config, &mut rng)?;

    let shifts = parse_shift_table(&args.deltas, level_count)?;
    let mut relabeler = ThresholdShiftRelabeler::new(level_count);
    relabeler.noise(args.noise_mean, args.noise_sd);
    let relabeled = relabeler.relabel(&ensemble, &mask, &shifts, args.seed)?;
    for count in relabeled.unresolved() {
        eprintln!(
            "warning: member {}, scenario {}: {} unresolved rows were back-filled",
            count.member, count.scenario, count.rows
        );
    }

    let proportions = ProportionComparator::compare(&relabeled, &mask)?;
    proportions.summary();

    let analysis_formula = args
        .analysis_formula
        .unwrap_or_else(|| format!("{} ~ {}", args.outcome, target));
    let pooled = ordmnar::pooled_probit(&ensemble, &analysis_formula)?;
    pooled.summary();

    if let Some(path) = args.output_json {
        let payload = serde_json::json!({
            "proportions": proportions,
            "pooled": pooled,
        });
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    }
    if let Some(path) = args.output_markdown {
        let md = format!(
            "## Imputed-category proportions (%)\n\n{}\n## Pooled analysis model\n\n{}",
            proportions.to_markdown(),
            pooled.to_markdown()
        );
        std::fs::write(path, md)?;
    }
    Ok(())
}

fn infer_level_count(df: &DataFrame, ordinal: &str) -> Result<usize, Box<dyn Error>> {
    let series = df
        .column(ordinal)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let max = series
        .i64()?
        .into_iter()
        .flatten()
        .max()
        .ok_or("ordinal column holds no values")?;
    if max < 2 {
        return Err("ordinal column must span at least 2 levels".into());
    }
    Ok(max as usize)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Simulate(args) => run_simulate(args),
        Commands::Run(args) => run_pipeline(args),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        std::process::exit(1);
    }
}
