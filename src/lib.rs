//! Bronze → silver → gold pipeline over one delimited dataset, with a
//! schema-contract gate before gold and DuckDB queries over the Parquet
//! artifacts.

pub mod aggregate;
pub mod config;
pub mod duck;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod process;
pub mod schema;
pub mod store;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run, RunSummary};

#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,medallion=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
