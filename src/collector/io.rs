//! Block I/O subsystem collector.
//!
//! Exports per-device byte and operation counters from `io.stat`; devices
//! are kept apart under a `device` label carrying the `MAJ:MIN` identifier.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, IntCounterVec, Opts};

use crate::cache::MetricCache;
use crate::cgroup::CgroupNode;
use crate::cgroup::stats::{IoSample, IoStat, Subsystem, SubsystemStats};
use crate::config::Config;

use super::{CollectorCommon, GROUP_LABEL, NAMESPACE, PassTimes, USEC, read_pressure_file};

fn device_counter(name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem("io"),
        &[GROUP_LABEL, "device"],
    )
}

/// One pass worth of I/O metric families; see the CPU counterpart for the
/// fresh-per-pass rationale.
struct IoMetricSet {
    read_bytes: IntCounterVec,
    write_bytes: IntCounterVec,
    read_ops: IntCounterVec,
    write_ops: IntCounterVec,
    pressure: Option<CounterVec>,
}

impl IoMetricSet {
    fn new(include_pressure: bool) -> prometheus::Result<Self> {
        Ok(Self {
            read_bytes: device_counter("read_bytes_total", "Bytes read from the device")?,
            write_bytes: device_counter("write_bytes_total", "Bytes written to the device")?,
            read_ops: device_counter("read_operations_total", "Read operations issued")?,
            write_ops: device_counter("write_operations_total", "Write operations issued")?,
            pressure: include_pressure
                .then(|| {
                    CounterVec::new(
                        Opts::new("pressure_seconds_total", "Total I/O stall time")
                            .namespace(NAMESPACE)
                            .subsystem("io"),
                        &[GROUP_LABEL, "type"],
                    )
                })
                .transpose()?,
        })
    }

    fn fill(&self, name: &str, sample: &IoSample) {
        for device in &sample.stat.devices {
            let labels = &[name, device.device.as_str()];
            if let Some(v) = device.rbytes {
                self.read_bytes.with_label_values(labels).inc_by(v);
            }
            if let Some(v) = device.wbytes {
                self.write_bytes.with_label_values(labels).inc_by(v);
            }
            if let Some(v) = device.rios {
                self.read_ops.with_label_values(labels).inc_by(v);
            }
            if let Some(v) = device.wios {
                self.write_ops.with_label_values(labels).inc_by(v);
            }
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
        descs.extend(self.read_bytes.desc());
        descs.extend(self.write_bytes.desc());
        descs.extend(self.read_ops.desc());
        descs.extend(self.write_ops.desc());
        if let Some(vec) = &self.pressure {
            descs.extend(vec.desc());
        }
        descs
    }

    fn into_families(self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.read_bytes.collect());
        families.extend(self.write_bytes.collect());
        families.extend(self.read_ops.collect());
        families.extend(self.write_ops.collect());
        if let Some(vec) = self.pressure {
            families.extend(vec.collect());
        }
        families
    }
}

/// Exports block I/O accounting for every discovered control group.
pub struct IoCollector {
    common: CollectorCommon,
    include_pressure: bool,
    descriptors: IoMetricSet,
}

impl IoCollector {
    pub fn new(config: Arc<Config>, cache: Arc<MetricCache>) -> prometheus::Result<Self> {
        let include_pressure = config.collectors.io.include_pressure;
        Ok(Self {
            common: CollectorCommon::new(
                Subsystem::Io,
                config.collectors.io.enabled,
                config,
                cache,
            )?,
            include_pressure,
            descriptors: IoMetricSet::new(include_pressure)?,
        })
    }

    fn read_node(&self, node: &CgroupNode) -> (IoSample, u64) {
        let mut errors = 0;
        let stat = match crate::fsutil::open_optional(node.path.join("io.stat")) {
            Ok(Some(mut reader)) => match IoStat::from_reader(&mut reader) {
                Ok(parsed) => {
                    if let Some(err) = &parsed.error {
                        log::warn!(
                            "partial parse of `{}`: {err}",
                            node.path.join("io.stat").display()
                        );
                        errors += 1;
                    }
                    parsed.record
                }
                Err(err) => {
                    log::warn!(
                        "failed to read `{}`: {err}",
                        node.path.join("io.stat").display()
                    );
                    errors += 1;
                    IoStat::default()
                }
            },
            Ok(None) => IoStat::default(),
            Err(err) => {
                log::warn!("{err}");
                errors += 1;
                IoStat::default()
            }
        };
        let pressure = if self.include_pressure {
            read_pressure_file(&node.path.join("io.pressure"), &mut errors)
        } else {
            None
        };
        (IoSample { stat, pressure }, errors)
    }

    fn sample_for(&self, node: &CgroupNode, pass: &PassTimes) -> IoSample {
        if let Some(SubsystemStats::Io(sample)) =
            self.common
                .cache()
                .get(&node.path, Subsystem::Io, pass.start)
        {
            return sample;
        }

        let (sample, errors) = self.read_node(node);
        self.common.count_errors(errors);
        self.common
            .cache()
            .put(&node.path, Subsystem::Io, SubsystemStats::Io(sample.clone()));
        sample
    }

    fn collect_pass(&self, pass: &PassTimes) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        match IoMetricSet::new(self.include_pressure) {
            Ok(set) => {
                let nodes = self.common.discover(pass);
                let mut scraped = 0;
                for node in nodes.iter() {
                    if pass.expired() {
                        log::warn!(
                            "io collector: deadline exceeded with {} groups unread",
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
                log::error!("io collector: building metric set failed: {err}");
                self.common.count_errors(1);
                self.common.finish_pass(pass, 0);
            }
        }
        families.extend(self.common.self_families());
        families
    }
}

impl Collector for IoCollector {
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

    fn collector(config: Config) -> IoCollector {
        IoCollector::new(Arc::new(config), test_cache()).unwrap()
    }

    #[test]
    fn test_devices_are_kept_apart() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "io");
        fs::write(
            tmp.path().join("io.stat"),
            "8:0 rbytes=1024 wbytes=2048 rios=12 wios=24\n\
             254:0 rbytes=512 wbytes=256 rios=6 wios=3\n",
        )
        .unwrap();

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());

        assert_close(
            sample_value(
                &text,
                "cgroup_io_read_bytes_total",
                &[(GROUP_LABEL, "root"), ("device", "8:0")],
            ),
            1024.0,
        );
        assert_close(
            sample_value(
                &text,
                "cgroup_io_read_bytes_total",
                &[(GROUP_LABEL, "root"), ("device", "254:0")],
            ),
            512.0,
        );
        assert_close(
            sample_value(
                &text,
                "cgroup_io_write_operations_total",
                &[(GROUP_LABEL, "root"), ("device", "254:0")],
            ),
            3.0,
        );
        assert_eq!(sample_count(&text, "cgroup_io_read_bytes_total"), 2);
    }

    #[test]
    fn test_absent_io_stat_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "io");

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());
        assert_eq!(sample_count(&text, "cgroup_io_read_bytes_total"), 0);
        assert_close(
            sample_value(&text, "cgroup_exporter_io_scrape_errors_total", &[]),
            0.0,
        );
    }

    #[test]
    fn test_malformed_device_line_counts_one_error() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "io");
        fs::write(
            tmp.path().join("io.stat"),
            "8:0 rbytes=oops wbytes=2048\n254:0 rbytes=512\n",
        )
        .unwrap();

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());

        // The good fields of both devices still make it out.
        assert_close(
            sample_value(
                &text,
                "cgroup_io_write_bytes_total",
                &[(GROUP_LABEL, "root"), ("device", "8:0")],
            ),
            2048.0,
        );
        assert_close(
            sample_value(
                &text,
                "cgroup_io_read_bytes_total",
                &[(GROUP_LABEL, "root"), ("device", "254:0")],
            ),
            512.0,
        );
        assert_close(
            sample_value(&text, "cgroup_exporter_io_scrape_errors_total", &[]),
            1.0,
        );
    }
}
