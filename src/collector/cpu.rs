//! CPU subsystem collector.
//!
//! Exports the `cpu.stat` time and throttling counters and, when enabled,
//! the `cpu.pressure` stall totals. Time counters are converted from the
//! kernel's microseconds to seconds.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, IntCounterVec, Opts};

use crate::cache::MetricCache;
use crate::cgroup::CgroupNode;
use crate::cgroup::stats::{CpuSample, CpuStat, Subsystem, SubsystemStats};
use crate::config::Config;

use super::{
    CollectorCommon, GROUP_LABEL, NAMESPACE, PassTimes, USEC, read_kv_file, read_pressure_file,
};

fn seconds_counter(name: &str, help: &str) -> prometheus::Result<CounterVec> {
    CounterVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("cpu"),
        &[GROUP_LABEL],
    )
}

fn periods_counter(name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("cpu"),
        &[GROUP_LABEL],
    )
}

/// One pass worth of CPU metric families.
///
/// Built fresh per `collect()` call, so concurrent scrapes and vanished
/// groups never leave stale label children behind. The collector keeps one
/// long-lived instance purely as the descriptor source.
struct CpuMetricSet {
    usage: CounterVec,
    user: CounterVec,
    system: CounterVec,
    throttled: CounterVec,
    periods: IntCounterVec,
    throttled_periods: IntCounterVec,
    pressure: Option<CounterVec>,
}

impl CpuMetricSet {
    fn new(include_pressure: bool) -> prometheus::Result<Self> {
        Ok(Self {
            usage: seconds_counter("usage_seconds_total", "Total CPU time consumed")?,
            user: seconds_counter("user_seconds_total", "CPU time consumed in user mode")?,
            system: seconds_counter("system_seconds_total", "CPU time consumed in kernel mode")?,
            throttled: seconds_counter(
                "throttled_seconds_total",
                "Total time the group was throttled",
            )?,
            periods: periods_counter("periods_total", "Number of elapsed enforcement periods")?,
            throttled_periods: periods_counter(
                "throttled_periods_total",
                "Number of throttled enforcement periods",
            )?,
            pressure: include_pressure
                .then(|| {
                    CounterVec::new(
                        Opts::new("pressure_seconds_total", "Total CPU stall time")
                            .namespace(NAMESPACE)
                            .subsystem("cpu"),
                        &[GROUP_LABEL, "type"],
                    )
                })
                .transpose()?,
        })
    }

    fn fill(&self, name: &str, sample: &CpuSample) {
        let stat = &sample.stat;
        if let Some(v) = stat.usage_usec {
            self.usage.with_label_values(&[name]).inc_by(v as f64 * USEC);
        }
        if let Some(v) = stat.user_usec {
            self.user.with_label_values(&[name]).inc_by(v as f64 * USEC);
        }
        if let Some(v) = stat.system_usec {
            self.system
                .with_label_values(&[name])
                .inc_by(v as f64 * USEC);
        }
        if let Some(v) = stat.throttled_usec {
            self.throttled
                .with_label_values(&[name])
                .inc_by(v as f64 * USEC);
        }
        if let Some(v) = stat.nr_periods {
            self.periods.with_label_values(&[name]).inc_by(v);
        }
        if let Some(v) = stat.nr_throttled {
            self.throttled_periods.with_label_values(&[name]).inc_by(v);
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
        descs.extend(self.user.desc());
        descs.extend(self.system.desc());
        descs.extend(self.throttled.desc());
        descs.extend(self.periods.desc());
        descs.extend(self.throttled_periods.desc());
        if let Some(vec) = &self.pressure {
            descs.extend(vec.desc());
        }
        descs
    }

    fn into_families(self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.usage.collect());
        families.extend(self.user.collect());
        families.extend(self.system.collect());
        families.extend(self.throttled.collect());
        families.extend(self.periods.collect());
        families.extend(self.throttled_periods.collect());
        if let Some(vec) = self.pressure {
            families.extend(vec.collect());
        }
        families
    }
}

/// Exports CPU accounting for every discovered control group.
pub struct CpuCollector {
    common: CollectorCommon,
    include_pressure: bool,
    descriptors: CpuMetricSet,
}

impl CpuCollector {
    pub fn new(config: Arc<Config>, cache: Arc<MetricCache>) -> prometheus::Result<Self> {
        let include_pressure = config.collectors.cpu.include_pressure;
        Ok(Self {
            common: CollectorCommon::new(
                Subsystem::Cpu,
                config.collectors.cpu.enabled,
                config,
                cache,
            )?,
            include_pressure,
            descriptors: CpuMetricSet::new(include_pressure)?,
        })
    }

    fn read_node(&self, node: &CgroupNode) -> (CpuSample, u64) {
        let mut errors = 0;
        let stat =
            read_kv_file::<CpuStat>(&node.path.join("cpu.stat"), &mut errors).unwrap_or_default();
        let pressure = if self.include_pressure {
            read_pressure_file(&node.path.join("cpu.pressure"), &mut errors)
        } else {
            None
        };
        (CpuSample { stat, pressure }, errors)
    }

    fn sample_for(&self, node: &CgroupNode, pass: &PassTimes) -> CpuSample {
        if let Some(SubsystemStats::Cpu(sample)) =
            self.common
                .cache()
                .get(&node.path, Subsystem::Cpu, pass.start)
        {
            return sample;
        }

        let (sample, errors) = self.read_node(node);
        self.common.count_errors(errors);
        self.common
            .cache()
            .put(&node.path, Subsystem::Cpu, SubsystemStats::Cpu(sample.clone()));
        sample
    }

    fn collect_pass(&self, pass: &PassTimes) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        match CpuMetricSet::new(self.include_pressure) {
            Ok(set) => {
                let nodes = self.common.discover(pass);
                let mut scraped = 0;
                for node in nodes.iter() {
                    if pass.expired() {
                        log::warn!(
                            "cpu collector: deadline exceeded with {} groups unread",
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
                log::error!("cpu collector: building metric set failed: {err}");
                self.common.count_errors(1);
                self.common.finish_pass(pass, 0);
            }
        }
        families.extend(self.common.self_families());
        families
    }
}

impl Collector for CpuCollector {
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

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    fn collector(config: Config, cache: Arc<MetricCache>) -> CpuCollector {
        CpuCollector::new(Arc::new(config), cache).unwrap()
    }

    #[test]
    fn test_collects_usage_and_throttling() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "cpu");
        fs::write(
            tmp.path().join("cpu.stat"),
            "usage_usec 2000000\nuser_usec 1500000\nsystem_usec 500000\n\
             nr_periods 10\nnr_throttled 3\nthrottled_usec 250000\n",
        )
        .unwrap();

        let collector = collector(test_config(tmp.path().to_path_buf()), test_cache());
        let text = render(&collector.collect());

        let labels = &[(GROUP_LABEL, "root")];
        assert_close(sample_value(&text, "cgroup_cpu_usage_seconds_total", labels), 2.0);
        assert_close(sample_value(&text, "cgroup_cpu_user_seconds_total", labels), 1.5);
        assert_close(sample_value(&text, "cgroup_cpu_system_seconds_total", labels), 0.5);
        assert_close(
            sample_value(&text, "cgroup_cpu_throttled_seconds_total", labels),
            0.25,
        );
        assert_close(sample_value(&text, "cgroup_cpu_periods_total", labels), 10.0);
        assert_close(
            sample_value(&text, "cgroup_cpu_throttled_periods_total", labels),
            3.0,
        );
    }

    #[test]
    fn test_pressure_toggle() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "cpu");
        fs::write(
            tmp.path().join("cpu.pressure"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=500000\n",
        )
        .unwrap();

        let mut config = test_config(tmp.path().to_path_buf());
        config.collectors.cpu.include_pressure = false;
        let collector = collector(config, test_cache());
        let text = render(&collector.collect());
        assert_eq!(sample_count(&text, "cgroup_cpu_pressure_seconds_total"), 0);

        let mut config = test_config(tmp.path().to_path_buf());
        config.collectors.cpu.include_pressure = true;
        let collector = CpuCollector::new(Arc::new(config), test_cache()).unwrap();
        let text = render(&collector.collect());
        assert_close(
            sample_value(
                &text,
                "cgroup_cpu_pressure_seconds_total",
                &[(GROUP_LABEL, "root"), ("type", "some")],
            ),
            0.5,
        );
    }

    #[test]
    fn test_corrupted_group_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        make_cgroup(root, "cpu");
        for (name, stat) in [
            ("group1", "usage_usec 100\n"),
            ("group2", "usage_usec garbage\n"),
            ("group3", "usage_usec 300\n"),
        ] {
            let dir = root.join(name);
            make_cgroup(&dir, "cpu");
            fs::write(dir.join("cpu.stat"), stat).unwrap();
        }

        let collector = collector(test_config(root.to_path_buf()), test_cache());
        let text = render(&collector.collect());

        assert_close(
            sample_value(&text, "cgroup_cpu_usage_seconds_total", &[(GROUP_LABEL, "group1")]),
            100.0 * USEC,
        );
        assert_close(
            sample_value(&text, "cgroup_cpu_usage_seconds_total", &[(GROUP_LABEL, "group3")]),
            300.0 * USEC,
        );
        assert_eq!(
            sample_value(&text, "cgroup_cpu_usage_seconds_total", &[(GROUP_LABEL, "group2")]),
            None,
            "corrupted group must not emit a usage sample"
        );
        assert_close(
            sample_value(&text, "cgroup_exporter_cpu_scrape_errors_total", &[]),
            1.0,
        );
    }

    #[test]
    fn test_cached_sample_survives_file_change() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "cpu");
        fs::write(tmp.path().join("cpu.stat"), "usage_usec 1000000\n").unwrap();

        let cache = Arc::new(MetricCache::new(Duration::from_secs(600)));
        let collector = collector(test_config(tmp.path().to_path_buf()), Arc::clone(&cache));

        let text = render(&collector.collect());
        assert_close(
            sample_value(&text, "cgroup_cpu_usage_seconds_total", &[(GROUP_LABEL, "root")]),
            1.0,
        );

        // A second pass within the TTL serves from the cache.
        fs::write(tmp.path().join("cpu.stat"), "usage_usec 9000000\n").unwrap();
        let text = render(&collector.collect());
        assert_close(
            sample_value(&text, "cgroup_cpu_usage_seconds_total", &[(GROUP_LABEL, "root")]),
            1.0,
        );
    }

    #[test]
    fn test_expired_deadline_cuts_the_parse_phase_short() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "cpu");
        fs::write(tmp.path().join("cpu.stat"), "usage_usec 1000000\n").unwrap();

        let cache = Arc::new(MetricCache::new(Duration::from_secs(600)));
        let collector = collector(test_config(tmp.path().to_path_buf()), Arc::clone(&cache));

        // First pass warms the walk cache, so the second pass reaches the
        // parse loop instead of timing out during discovery.
        render(&collector.collect());

        let pass = PassTimes {
            start: Instant::now(),
            deadline: Some(Instant::now()),
        };
        let text = render(&collector.collect_pass(&pass));
        assert_eq!(
            sample_count(&text, "cgroup_cpu_usage_seconds_total"),
            0,
            "no group may be read past the deadline"
        );
        assert_close(
            sample_value(&text, "cgroup_exporter_cpu_scrape_errors_total", &[]),
            1.0,
        );
        assert_close(
            sample_value(&text, "cgroup_exporter_cpu_cgroups_scraped", &[]),
            0.0,
        );
    }

    #[test]
    fn test_absent_stat_file_emits_nothing_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "cpu");

        let collector = collector(test_config(tmp.path().to_path_buf()), test_cache());
        let text = render(&collector.collect());
        assert_eq!(sample_count(&text, "cgroup_cpu_usage_seconds_total"), 0);
        assert_close(
            sample_value(&text, "cgroup_exporter_cpu_scrape_errors_total", &[]),
            0.0,
        );
        assert_close(
            sample_value(&text, "cgroup_exporter_cpu_cgroups_scraped", &[]),
            1.0,
        );
    }
}
