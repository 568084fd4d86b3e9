//! Subsystem collectors and the pull-protocol registry.
//!
//! One collector per resource subsystem (CPU, memory, I/O, PIDs), each
//! implementing [`prometheus::core::Collector`]: `desc()` is the static
//! describe half of the pull protocol and never touches the filesystem,
//! `collect()` runs one collection pass. A pass walks the hierarchy (or
//! reuses the cached walk of the same scrape window), parses accounting
//! files per discovered group with the metric cache in between, and emits
//! labeled samples.
//!
//! Failure isolation: a parse failure in one group increments the
//! collector's error counter and that group's broken fields are simply
//! absent; the remaining groups and the other subsystems are unaffected.
//! Every collector also always emits its scrape-duration, error-count,
//! last-scrape and group-count self-metrics, so partial failure stays
//! visible from the outside.
//!
//! Collectors share behavior through [`CollectorCommon`] by composition:
//! enable flag, configuration, cache handle, walker and self-metrics. Each
//! subsystem file contributes only its parsing and sample naming.

mod cpu;
mod io;
mod memory;
mod pids;

pub use cpu::CpuCollector;
pub use io::IoCollector;
pub use memory::MemoryCollector;
pub use pids::PidsCollector;

use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

use crate::cache::MetricCache;
use crate::cgroup::stats::{KeyValueStat, Parsed, PressureStat, SingleLineStat, Subsystem};
use crate::cgroup::{CgroupNode, Walker};
use crate::config::Config;
use crate::error::Error;
use crate::fsutil;

/// Namespace of all business metrics: `cgroup_<subsystem>_<name>`.
pub const NAMESPACE: &str = "cgroup";

/// Namespace of the exporter's self-observability metrics.
pub const SELF_NAMESPACE: &str = "cgroup_exporter";

/// Label carrying the derived control-group name on every business metric.
pub const GROUP_LABEL: &str = "cgroup";

/// Microseconds to seconds; stall and usage counters are exported in
/// seconds.
pub(crate) const USEC: f64 = 1e-6;

/// Builds the collection registry from the resolved configuration.
///
/// Registers one collector per enabled subsystem into a
/// [`prometheus::Registry`], which validates metric-name uniqueness at
/// registration time.
///
/// # Errors
///
/// * [`Error::NoCollectorsEnabled`] when every subsystem is disabled.
/// * [`Error::Registry`] on a metric-name collision or invalid descriptor.
pub fn build_registry(config: Arc<Config>, cache: Arc<MetricCache>) -> Result<Registry, Error> {
    let registry = Registry::new();
    let mut enabled = 0;

    if config.collectors.cpu.enabled {
        registry.register(Box::new(CpuCollector::new(
            Arc::clone(&config),
            Arc::clone(&cache),
        )?))?;
        enabled += 1;
    }
    if config.collectors.memory.enabled {
        registry.register(Box::new(MemoryCollector::new(
            Arc::clone(&config),
            Arc::clone(&cache),
        )?))?;
        enabled += 1;
    }
    if config.collectors.io.enabled {
        registry.register(Box::new(IoCollector::new(
            Arc::clone(&config),
            Arc::clone(&cache),
        )?))?;
        enabled += 1;
    }
    if config.collectors.pids.enabled {
        registry.register(Box::new(PidsCollector::new(
            Arc::clone(&config),
            Arc::clone(&cache),
        )?))?;
        enabled += 1;
    }

    if enabled == 0 {
        return Err(Error::NoCollectorsEnabled);
    }

    log::info!("registered {enabled} subsystem collectors");
    Ok(registry)
}

/// Timing context of one collection pass.
///
/// `start` pins the cache horizon for the whole pass; `deadline` bounds
/// both the walk and the per-group parse loop so a hung virtual filesystem
/// degrades the scrape instead of hanging it.
#[derive(Debug, Clone, Copy)]
pub struct PassTimes {
    pub start: Instant,
    pub deadline: Option<Instant>,
}

impl PassTimes {
    pub fn begin(config: &Config) -> Self {
        let start = Instant::now();
        let timeout = config.scrape_timeout();
        let deadline = (!timeout.is_zero()).then(|| start + timeout);
        Self { start, deadline }
    }

    /// Whether the pass deadline has passed. The walk and the per-group
    /// parse loop both check this, so a stalled hierarchy degrades the
    /// scrape to partial output instead of overrunning the timeout.
    pub fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Self-observability metrics every collector carries, emitted even when
/// the scrape itself fails entirely.
#[derive(Debug)]
pub struct SelfMetrics {
    scrape_duration: Histogram,
    scrape_errors: IntCounter,
    last_scrape: Gauge,
    cgroups_scraped: IntGauge,
}

impl SelfMetrics {
    fn new(subsystem: Subsystem) -> prometheus::Result<Self> {
        let subsystem = subsystem.as_str();
        Ok(Self {
            scrape_duration: Histogram::with_opts(
                HistogramOpts::new("scrape_duration_seconds", "Time spent scraping metrics")
                    .namespace(SELF_NAMESPACE)
                    .subsystem(subsystem),
            )?,
            scrape_errors: IntCounter::with_opts(
                Opts::new("scrape_errors_total", "Total number of scrape errors")
                    .namespace(SELF_NAMESPACE)
                    .subsystem(subsystem),
            )?,
            last_scrape: Gauge::with_opts(
                Opts::new(
                    "last_scrape_timestamp_seconds",
                    "Unix timestamp of the last scrape",
                )
                .namespace(SELF_NAMESPACE)
                .subsystem(subsystem),
            )?,
            cgroups_scraped: IntGauge::with_opts(
                Opts::new(
                    "cgroups_scraped",
                    "Number of cgroups scraped in the last collection",
                )
                .namespace(SELF_NAMESPACE)
                .subsystem(subsystem),
            )?,
        })
    }

    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.scrape_duration.desc());
        descs.extend(self.scrape_errors.desc());
        descs.extend(self.last_scrape.desc());
        descs.extend(self.cgroups_scraped.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.scrape_duration.collect());
        families.extend(self.scrape_errors.collect());
        families.extend(self.last_scrape.collect());
        families.extend(self.cgroups_scraped.collect());
        families
    }
}

/// Capabilities shared by every subsystem collector, composed into each one.
#[derive(Debug)]
pub struct CollectorCommon {
    subsystem: Subsystem,
    enabled: bool,
    config: Arc<Config>,
    cache: Arc<MetricCache>,
    walker: Walker,
    self_metrics: SelfMetrics,
}

impl CollectorCommon {
    pub fn new(
        subsystem: Subsystem,
        enabled: bool,
        config: Arc<Config>,
        cache: Arc<MetricCache>,
    ) -> prometheus::Result<Self> {
        let walker = Walker::new(
            config.cgroup_root.clone(),
            config.max_cgroups,
            config.max_depth,
        );
        Ok(Self {
            subsystem,
            enabled,
            config,
            cache,
            walker,
            self_metrics: SelfMetrics::new(subsystem)?,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn self_descs(&self) -> Vec<&Desc> {
        self.self_metrics.desc()
    }

    pub fn self_families(&self) -> Vec<MetricFamily> {
        self.self_metrics.collect()
    }

    pub fn count_errors(&self, n: u64) {
        if n > 0 {
            self.self_metrics.scrape_errors.inc_by(n);
        }
    }

    /// Discovers the control groups of this pass, reusing a cached walk
    /// when one is fresh within the pass horizon.
    ///
    /// A walk cut short (deadline, name collision) still yields its partial
    /// node list and counts one error; only complete walks are cached.
    pub fn discover(&self, pass: &PassTimes) -> Arc<[CgroupNode]> {
        if let Some(nodes) = self.cache.get_walk(pass.start) {
            return nodes;
        }

        let (nodes, error) = self.walker.collect_nodes(pass.deadline);
        log::debug!(
            "{} collector discovered {} cgroups",
            self.subsystem,
            nodes.len()
        );
        let nodes: Arc<[CgroupNode]> = Arc::from(nodes);
        match error {
            Some(err) => {
                log::error!("{} collector: hierarchy walk failed: {err}", self.subsystem);
                self.count_errors(1);
            }
            None => self.cache.put_walk(Arc::clone(&nodes)),
        }
        nodes
    }

    /// Records the pass self-metrics. Called on every pass, failed or not.
    pub fn finish_pass(&self, pass: &PassTimes, scraped: usize) {
        self.self_metrics
            .scrape_duration
            .observe(pass.start.elapsed().as_secs_f64());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.self_metrics.last_scrape.set(now.as_secs_f64());
        self.self_metrics.cgroups_scraped.set(scraped as i64);
    }
}

fn count_parsed<T>(path: &Path, parsed: Parsed<T>, errors: &mut u64) -> Option<T> {
    if let Some(err) = &parsed.error {
        log::warn!("partial parse of `{}`: {err}", path.display());
        *errors += 1;
    }
    Some(parsed.record)
}

/// Reads and parses a key-value accounting file beneath a group.
///
/// `None` means the file is absent (not an error); parse and read failures
/// bump `errors` while still returning any partial record.
pub(crate) fn read_kv_file<T: KeyValueStat>(path: &Path, errors: &mut u64) -> Option<T> {
    match fsutil::open_optional(path) {
        Ok(Some(mut reader)) => match T::from_reader(&mut reader) {
            Ok(parsed) => count_parsed(path, parsed, errors),
            Err(err) => {
                log::warn!("failed to read `{}`: {err}", path.display());
                *errors += 1;
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            log::warn!("{err}");
            *errors += 1;
            None
        }
    }
}

/// Reads and parses a single-line accounting file beneath a group.
///
/// Unlike key-value files, a single-line record that failed to parse holds
/// no data at all; it is dropped rather than returned, so a malformed limit
/// file never reads as the unlimited sentinel.
pub(crate) fn read_line_file<T: SingleLineStat>(path: &Path, errors: &mut u64) -> Option<T> {
    match fsutil::open_optional(path) {
        Ok(Some(mut reader)) => match T::from_reader(&mut reader) {
            Ok(parsed) => {
                if let Some(err) = &parsed.error {
                    log::warn!("partial parse of `{}`: {err}", path.display());
                    *errors += 1;
                    return None;
                }
                Some(parsed.record)
            }
            Err(err) => {
                log::warn!("failed to read `{}`: {err}", path.display());
                *errors += 1;
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            log::warn!("{err}");
            *errors += 1;
            None
        }
    }
}

/// Reads and parses a `*.pressure` file beneath a group.
pub(crate) fn read_pressure_file(path: &Path, errors: &mut u64) -> Option<PressureStat> {
    match fsutil::open_optional(path) {
        Ok(Some(mut reader)) => match PressureStat::from_reader(&mut reader) {
            Ok(parsed) => count_parsed(path, parsed, errors),
            Err(err) => {
                log::warn!("failed to read `{}`: {err}", path.display());
                *errors += 1;
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            log::warn!("{err}");
            *errors += 1;
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::cgroup::CONTROLLERS_FILE;

    /// Builds a config pointing at a synthetic hierarchy root.
    pub fn test_config(root: PathBuf) -> Config {
        Config {
            cgroup_root: root,
            ..Config::default()
        }
    }

    pub fn test_cache() -> Arc<MetricCache> {
        Arc::new(MetricCache::new(Duration::from_secs(60)))
    }

    pub fn make_cgroup(path: &Path, controllers: &str) {
        fs::create_dir_all(path).unwrap();
        fs::write(path.join(CONTROLLERS_FILE), controllers).unwrap();
    }

    /// Renders metric families in the text exposition format. Families
    /// without metrics are skipped, mirroring `Registry::gather`, since the
    /// encoder rejects them.
    pub fn render(families: &[MetricFamily]) -> String {
        let families: Vec<MetricFamily> = families
            .iter()
            .filter(|family| !family.get_metric().is_empty())
            .cloned()
            .collect();
        prometheus::TextEncoder::new()
            .encode_to_string(&families)
            .unwrap()
    }

    /// Finds the value of the sample whose name matches and whose label set
    /// contains every given pair.
    pub fn sample_value(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((series, value)) = line.rsplit_once(' ') else {
                continue;
            };
            let (series_name, series_labels) = match series.split_once('{') {
                Some((n, rest)) => (n, rest.trim_end_matches('}')),
                None => (series, ""),
            };
            if series_name != name {
                continue;
            }
            let found = labels.iter().all(|(key, val)| {
                series_labels
                    .split(',')
                    .any(|pair| pair == format!("{key}=\"{val}\""))
            });
            if !found {
                continue;
            }
            return match value {
                "+Inf" => Some(f64::INFINITY),
                "-Inf" => Some(f64::NEG_INFINITY),
                other => other.parse().ok(),
            };
        }
        None
    }

    /// Counts the samples of one family, across all label sets.
    pub fn sample_count(text: &str, name: &str) -> usize {
        text.lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter(|line| line.split(['{', ' ']).next() == Some(name))
            .count()
    }

    pub fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("sample missing");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }
}
