//! Pull-based Prometheus exporter for Linux cgroup v2 resource accounting.
//!
//! The exporter walks a cgroup v2 hierarchy, parses the per-group
//! accounting files for the CPU, memory, block I/O and process subsystems,
//! and serves the resulting samples over HTTP in the text exposition
//! format. Collection is demand-driven: nothing is read until a scrape
//! arrives, and a TTL cache absorbs closely spaced scrapes.
//!
//! Module map:
//!
//! - [`cgroup`] walks the hierarchy and parses accounting files.
//! - [`cache`] memoizes parsed records across collectors and scrapes.
//! - [`collector`] turns records into labeled metric families and owns the
//!   registry.
//! - [`server`] exposes `/metrics`, `/healthz` and `/readyz`.
//! - [`config`] resolves defaults, config file and environment overrides.

pub mod cache;
pub mod cgroup;
pub mod collector;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod readiness;
pub mod server;

use std::sync::Arc;

use cache::MetricCache;
use config::Config;
use error::Error;

/// Runs the exporter with the given configuration until the server exits.
///
/// # Errors
///
/// Fails fast when the cgroup root is not a usable cgroup v2 mount, when no
/// collector is enabled, when collectors register colliding metric names,
/// or when the listener cannot bind.
pub async fn run(config: Config) -> Result<(), Error> {
    readiness::check_cgroup_root(&config.cgroup_root)?;

    let config = Arc::new(config);
    let cache = Arc::new(MetricCache::new(config.cache_ttl()));
    let registry = collector::build_registry(Arc::clone(&config), cache)?;

    let addr = config.listen_address.clone();
    let server = server::MetricsServer::new(registry, config);
    server.listen(addr).await?;
    Ok(())
}
