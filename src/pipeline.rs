// src/pipeline.rs

use serde::Serialize;
use std::{path::PathBuf, time::Instant};
use tracing::{info, instrument};

use crate::{
    aggregate::aggregate_to_gold,
    config::PipelineConfig,
    duck::{gold_tip_pct_by_day, silver_revenue_by, QueryEngine, QueryResult},
    error::Result,
    fetch::{extract_to_bronze, Source},
    process::transform_to_silver,
    schema::{validate_silver, ValidationReport},
    store::read_artifact,
};

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub bronze: PathBuf,
    pub silver: PathBuf,
    pub gold: PathBuf,
    pub silver_rows: usize,
    pub gold_rows: usize,
    pub validation: ValidationReport,
    pub revenue_by_sex_smoker: QueryResult,
    pub tip_pct_by_day: QueryResult,
}

/// Run every stage once, in order. A stage error stops the run; artifacts of
/// the stages that already finished stay on disk.
#[instrument(level = "info", skip_all, fields(source = %cfg.source))]
pub fn run(cfg: &PipelineConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let layout = cfg.layout();
    layout.create_all()?;

    // 1) bronze: raw copy
    let source = Source::parse(&cfg.source);
    let bronze = extract_to_bronze(&source, &layout.bronze(), &cfg.bronze_file)?;
    // 2) silver: cleaned and typed
    let silver = transform_to_silver(&bronze, &layout.silver(), &cfg.silver_file, &cfg.transform)?;

    // 3) hard gate; gold is never written from a failing silver
    let validation = validate_silver(&silver, &cfg.contract)?;
    // 4) gold summary
    let gold = aggregate_to_gold(&silver, &layout.gold(), &cfg.gold_file, &cfg.aggregate)?;
    let gold_rows = read_artifact(&gold)?.num_rows();

    // 5) reports straight off the Parquet files
    let engine = QueryEngine::open()?;
    let revenue_by_sex_smoker = engine.run(&silver_revenue_by(&silver))?;
    info!("[query] revenue by sex and smoker\n{}", revenue_by_sex_smoker);
    let tip_pct_by_day = engine.run(&gold_tip_pct_by_day(&gold))?;
    info!("[query] tip percentage by day\n{}", tip_pct_by_day);

    info!("run finished in {:?}", started.elapsed());
    Ok(RunSummary {
        bronze,
        silver,
        gold,
        silver_rows: validation.rows,
        gold_rows,
        validation,
        revenue_by_sex_smoker,
        tip_pct_by_day,
    })
}
