use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medallion::{
    duck::{gold_tip_pct_by_day, silver_revenue_by, QueryEngine},
    schema::validate_silver,
    store, PipelineConfig, PipelineError,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "medallion", version, about = "Bronze → silver → gold pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, transform, validate, aggregate and query.
    Run {
        /// YAML config; defaults reproduce the tips run.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the run summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Check a silver Parquet file against the configured contract.
    Validate {
        silver: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Re-run the report queries over existing silver and gold files.
    Query {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print Parquet footer metadata.
    Inspect { path: PathBuf },
}

fn main() -> ExitCode {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the report is already multi-line; print it as-is
            if let Some(PipelineError::Validation(report)) = e.downcast_ref::<PipelineError>() {
                error!("silver failed validation");
                eprintln!("{report}");
            } else {
                error!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { config, json } => {
            let cfg = PipelineConfig::load(config.as_deref())?;
            let summary = medallion::run(&cfg)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("bronze: {}", summary.bronze.display());
                println!("silver: {} ({} rows)", summary.silver.display(), summary.silver_rows);
                println!("gold:   {} ({} rows)", summary.gold.display(), summary.gold_rows);
                println!();
                println!("{}", summary.revenue_by_sex_smoker);
                println!("{}", summary.tip_pct_by_day);
            }
        }
        Command::Validate { silver, config } => {
            let cfg = PipelineConfig::load(config.as_deref())?;
            let report = validate_silver(&silver, &cfg.contract)?;
            println!("{report}");
        }
        Command::Query { config } => {
            let cfg = PipelineConfig::load(config.as_deref())?;
            let (silver, gold) = (cfg.silver_path(), cfg.gold_path());
            let engine = QueryEngine::open()?;
            let by_sex = engine
                .run(&silver_revenue_by(&silver))
                .with_context(|| format!("querying {}", silver.display()))?;
            let by_day = engine
                .run(&gold_tip_pct_by_day(&gold))
                .with_context(|| format!("querying {}", gold.display()))?;
            println!("{by_sex}");
            println!("{by_day}");
        }
        Command::Inspect { path } => {
            let info = store::inspect(&path)
                .with_context(|| format!("inspecting {}", path.display()))?;
            print!("{info}");
        }
    }
    info!("done");
    Ok(())
}
