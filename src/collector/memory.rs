//! Memory subsystem collector.
//!
//! Exports the usage, limit and breakdown gauges plus the OOM-kill event
//! counter. An unlimited group (`memory.max` reading `max`) is exported as
//! `+Inf` rather than being dropped, so limit-ratio queries stay total.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, IntCounterVec, Opts};

use crate::cache::MetricCache;
use crate::cgroup::CgroupNode;
use crate::cgroup::stats::{
    MemoryCurrent, MemoryEvents, MemoryLimit, MemorySample, MemoryStat, Subsystem, SubsystemStats,
};
use crate::config::Config;

use super::{
    CollectorCommon, GROUP_LABEL, NAMESPACE, PassTimes, USEC, read_kv_file, read_line_file,
    read_pressure_file,
};

fn bytes_gauge(name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem("memory"),
        &[GROUP_LABEL],
    )
}

/// One pass worth of memory metric families; see the CPU counterpart for
/// the fresh-per-pass rationale.
struct MemoryMetricSet {
    usage: GaugeVec,
    limit: GaugeVec,
    cache: GaugeVec,
    rss: GaugeVec,
    swap: Option<GaugeVec>,
    oom_events: IntCounterVec,
    pressure: Option<CounterVec>,
}

impl MemoryMetricSet {
    fn new(include_swap: bool, include_pressure: bool) -> prometheus::Result<Self> {
        Ok(Self {
            usage: bytes_gauge("usage_bytes", "Current memory usage")?,
            limit: bytes_gauge("limit_bytes", "Memory limit; +Inf when unlimited")?,
            cache: bytes_gauge("cache_bytes", "Page cache memory")?,
            rss: bytes_gauge("rss_bytes", "Anonymous (resident set) memory")?,
            swap: include_swap
                .then(|| bytes_gauge("swap_usage_bytes", "Current swap usage"))
                .transpose()?,
            oom_events: IntCounterVec::new(
                Opts::new("oom_events_total", "Number of OOM killer invocations")
                    .namespace(NAMESPACE)
                    .subsystem("memory"),
                &[GROUP_LABEL],
            )?,
            pressure: include_pressure
                .then(|| {
                    CounterVec::new(
                        Opts::new("pressure_seconds_total", "Total memory stall time")
                            .namespace(NAMESPACE)
                            .subsystem("memory"),
                        &[GROUP_LABEL, "type"],
                    )
                })
                .transpose()?,
        })
    }

    fn fill(&self, name: &str, sample: &MemorySample) {
        if let Some(v) = sample.current {
            self.usage.with_label_values(&[name]).set(v as f64);
        }
        if let Some(limit) = &sample.limit {
            let value = limit.limit_bytes.map_or(f64::INFINITY, |v| v as f64);
            self.limit.with_label_values(&[name]).set(value);
        }
        if let Some(v) = sample.stat.file {
            self.cache.with_label_values(&[name]).set(v as f64);
        }
        if let Some(v) = sample.stat.anon {
            self.rss.with_label_values(&[name]).set(v as f64);
        }
        if let (Some(vec), Some(v)) = (&self.swap, sample.swap_current) {
            vec.with_label_values(&[name]).set(v as f64);
        }
        if let Some(v) = sample.events.oom_kill {
            self.oom_events.with_label_values(&[name]).inc_by(v);
        }
        if let (Some(vec), Some(pressure)) = (&self.pressure, &sample.pressure) {
            if let Some(v) = pressure.some_total_usec {
                vec.with_label_values(&[name, "some"]).inc_by(v as f64 * USEC);
            }
            if let Some(v) = pressure.full_total_usec {
                vec.with_label_values(&[name, "full"]).inc_by(v as f64 * USEC);
            }
        }
    }

    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.usage.desc());
        descs.extend(self.limit.desc());
        descs.extend(self.cache.desc());
        descs.extend(self.rss.desc());
        if let Some(vec) = &self.swap {
            descs.extend(vec.desc());
        }
        descs.extend(self.oom_events.desc());
        if let Some(vec) = &self.pressure {
            descs.extend(vec.desc());
        }
        descs
    }

    fn into_families(self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.usage.collect());
        families.extend(self.limit.collect());
        families.extend(self.cache.collect());
        families.extend(self.rss.collect());
        if let Some(vec) = self.swap {
            families.extend(vec.collect());
        }
        families.extend(self.oom_events.collect());
        if let Some(vec) = self.pressure {
            families.extend(vec.collect());
        }
        families
    }
}

/// Exports memory accounting for every discovered control group.
pub struct MemoryCollector {
    common: CollectorCommon,
    include_swap: bool,
    include_pressure: bool,
    descriptors: MemoryMetricSet,
}

impl MemoryCollector {
    pub fn new(config: Arc<Config>, cache: Arc<MetricCache>) -> prometheus::Result<Self> {
        let include_swap = config.collectors.memory.include_swap;
        let include_pressure = config.collectors.memory.include_pressure;
        Ok(Self {
            common: CollectorCommon::new(
                Subsystem::Memory,
                config.collectors.memory.enabled,
                config,
                cache,
            )?,
            include_swap,
            include_pressure,
            descriptors: MemoryMetricSet::new(include_swap, include_pressure)?,
        })
    }

    fn read_node(&self, node: &CgroupNode) -> (MemorySample, u64) {
        let mut errors = 0;
        let stat = read_kv_file::<MemoryStat>(&node.path.join("memory.stat"), &mut errors)
            .unwrap_or_default();
        let current = read_line_file::<MemoryCurrent>(&node.path.join("memory.current"), &mut errors)
            .and_then(|c| c.usage_bytes);
        let limit = read_line_file::<MemoryLimit>(&node.path.join("memory.max"), &mut errors);
        let swap_current = if self.include_swap {
            read_line_file::<MemoryCurrent>(&node.path.join("memory.swap.current"), &mut errors)
                .and_then(|c| c.usage_bytes)
        } else {
            None
        };
        let events = read_kv_file::<MemoryEvents>(&node.path.join("memory.events"), &mut errors)
            .unwrap_or_default();
        let pressure = if self.include_pressure {
            read_pressure_file(&node.path.join("memory.pressure"), &mut errors)
        } else {
            None
        };

        (
            MemorySample {
                stat,
                current,
                limit,
                swap_current,
                events,
                pressure,
            },
            errors,
        )
    }

    fn sample_for(&self, node: &CgroupNode, pass: &PassTimes) -> MemorySample {
        if let Some(SubsystemStats::Memory(sample)) =
            self.common
                .cache()
                .get(&node.path, Subsystem::Memory, pass.start)
        {
            return sample;
        }

        let (sample, errors) = self.read_node(node);
        self.common.count_errors(errors);
        self.common.cache().put(
            &node.path,
            Subsystem::Memory,
            SubsystemStats::Memory(sample.clone()),
        );
        sample
    }

    fn collect_pass(&self, pass: &PassTimes) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        match MemoryMetricSet::new(self.include_swap, self.include_pressure) {
            Ok(set) => {
                let nodes = self.common.discover(pass);
                let mut scraped = 0;
                for node in nodes.iter() {
                    if pass.expired() {
                        log::warn!(
                            "memory collector: deadline exceeded with {} groups unread",
                            nodes.len() - scraped
                        );
                        self.common.count_errors(1);
                        break;
                    }
                    set.fill(&node.name, &self.sample_for(node, pass));
                    scraped += 1;
                }
                self.common.finish_pass(pass, scraped);
                families.extend(set.into_families());
            }
            Err(err) => {
                log::error!("memory collector: building metric set failed: {err}");
                self.common.count_errors(1);
                self.common.finish_pass(pass, 0);
            }
        }
        families.extend(self.common.self_families());
        families
    }
}

impl Collector for MemoryCollector {
    fn desc(&self) -> Vec<&Desc> {
        if !self.common.enabled() {
            return Vec::new();
        }
        let mut descs = self.descriptors.desc();
        descs.extend(self.common.self_descs());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        if !self.common.enabled() {
            return Vec::new();
        }
        self.collect_pass(&PassTimes::begin(self.common.config()))
    }
}
