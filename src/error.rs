//! Startup-time error type of the exporter.
//!
//! Runtime collection failures never surface here; they degrade the scrape
//! output and bump the per-collector error counters instead. This type only
//! covers the conditions under which the process refuses to start or the
//! server dies.

use crate::config::ConfigError;
use crate::readiness::ReadinessError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("no collectors enabled; enable at least one subsystem")]
    NoCollectorsEnabled,

    #[error("failed to register collector metrics: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("metrics server failed: {0}")]
    Server(#[from] std::io::Error),
}
