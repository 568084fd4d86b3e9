//! Process subsystem collector, exported under the `processes` name.
//!
//! Combines the task count and limit from the pids controller with per-state
//! counts derived from `cgroup.procs` and `/proc/<pid>/stat`. An unlimited
//! group (`pids.max` reading `max`) is exported as `+Inf`.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, IntGaugeVec, Opts};

use crate::cache::MetricCache;
use crate::cgroup::CgroupNode;
use crate::cgroup::stats::{
    PidsCurrent, PidsLimit, PidsSample, ProcessStates, Subsystem, SubsystemStats, read_procs,
};
use crate::config::Config;
use crate::fsutil;

use super::{CollectorCommon, GROUP_LABEL, NAMESPACE, PassTimes, read_line_file};

fn process_gauge(name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    IntGaugeVec::new(
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem("processes"),
        &[GROUP_LABEL],
    )
}

/// One pass worth of process metric families; see the CPU counterpart for
/// the fresh-per-pass rationale.
struct PidsMetricSet {
    count: IntGaugeVec,
    limit: GaugeVec,
    running: IntGaugeVec,
    sleeping: IntGaugeVec,
    zombie: IntGaugeVec,
}

impl PidsMetricSet {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            count: process_gauge("count", "Number of tasks in the group")?,
            limit: GaugeVec::new(
                Opts::new("limit", "Task limit; +Inf when unlimited")
                    .namespace(NAMESPACE)
                    .subsystem("processes"),
                &[GROUP_LABEL],
            )?,
            running: process_gauge("running", "Processes in the running state")?,
            sleeping: process_gauge("sleeping", "Processes in a sleeping state")?,
            zombie: process_gauge("zombie", "Processes in the zombie state")?,
        })
    }

    fn fill(&self, name: &str, sample: &PidsSample) {
        if let Some(v) = sample.current {
            self.count.with_label_values(&[name]).set(v as i64);
        }
        if let Some(limit) = &sample.limit {
            let value = limit.limit.map_or(f64::INFINITY, |v| v as f64);
            self.limit.with_label_values(&[name]).set(value);
        }
        if let Some(states) = &sample.states {
            self.running
                .with_label_values(&[name])
                .set(states.running as i64);
            self.sleeping
                .with_label_values(&[name])
                .set(states.sleeping as i64);
            self.zombie
                .with_label_values(&[name])
                .set(states.zombie as i64);
        }
    }

    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.count.desc());
        descs.extend(self.limit.desc());
        descs.extend(self.running.desc());
        descs.extend(self.sleeping.desc());
        descs.extend(self.zombie.desc());
        descs
    }

    fn into_families(self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.count.collect());
        families.extend(self.limit.collect());
        families.extend(self.running.collect());
        families.extend(self.sleeping.collect());
        families.extend(self.zombie.collect());
        families
    }
}

/// Exports process accounting for every discovered control group.
pub struct PidsCollector {
    common: CollectorCommon,
    descriptors: PidsMetricSet,
}

impl PidsCollector {
    pub fn new(config: Arc<Config>, cache: Arc<MetricCache>) -> prometheus::Result<Self> {
        Ok(Self {
            common: CollectorCommon::new(
                Subsystem::Pids,
                config.collectors.pids.enabled,
                config,
                cache,
            )?,
            descriptors: PidsMetricSet::new()?,
        })
    }

    fn read_states(&self, node: &CgroupNode, errors: &mut u64) -> Option<ProcessStates> {
        match fsutil::open_optional(node.path.join("cgroup.procs")) {
            Ok(Some(mut reader)) => match read_procs(&mut reader) {
                Ok(pids) => Some(ProcessStates::from_proc(
                    &self.common.config().proc_root,
                    &pids,
                )),
                Err(err) => {
                    log::warn!(
                        "failed to read `{}`: {err}",
                        node.path.join("cgroup.procs").display()
                    );
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

    fn read_node(&self, node: &CgroupNode) -> (PidsSample, u64) {
        let mut errors = 0;
        let current = read_line_file::<PidsCurrent>(&node.path.join("pids.current"), &mut errors)
            .and_then(|c| c.current);
        let limit = read_line_file::<PidsLimit>(&node.path.join("pids.max"), &mut errors);
        let states = self.read_states(node, &mut errors);

        (
            PidsSample {
                current,
                limit,
                states,
            },
            errors,
        )
    }

    fn sample_for(&self, node: &CgroupNode, pass: &PassTimes) -> PidsSample {
        if let Some(SubsystemStats::Pids(sample)) =
            self.common
                .cache()
                .get(&node.path, Subsystem::Pids, pass.start)
        {
            return sample;
        }

        let (sample, errors) = self.read_node(node);
        self.common.count_errors(errors);
        self.common.cache().put(
            &node.path,
            Subsystem::Pids,
            SubsystemStats::Pids(sample.clone()),
        );
        sample
    }

    fn collect_pass(&self, pass: &PassTimes) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        match PidsMetricSet::new() {
            Ok(set) => {
                let nodes = self.common.discover(pass);
                let mut scraped = 0;
                for node in nodes.iter() {
                    if pass.expired() {
                        log::warn!(
                            "processes collector: deadline exceeded with {} groups unread",
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
                log::error!("processes collector: building metric set failed: {err}");
                self.common.count_errors(1);
                self.common.finish_pass(pass, 0);
            }
        }
        families.extend(self.common.self_families());
        families
    }
}

impl Collector for PidsCollector {
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

    fn collector(config: Config) -> PidsCollector {
        PidsCollector::new(Arc::new(config), test_cache()).unwrap()
    }

    #[test]
    fn test_collects_count_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "pids");
        fs::write(tmp.path().join("pids.current"), "17\n").unwrap();
        fs::write(tmp.path().join("pids.max"), "4096\n").unwrap();

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());

        let labels = &[(GROUP_LABEL, "root")];
        assert_close(sample_value(&text, "cgroup_processes_count", labels), 17.0);
        assert_close(sample_value(&text, "cgroup_processes_limit", labels), 4096.0);
    }

    #[test]
    fn test_unlimited_group_exports_infinite_limit() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "pids");
        fs::write(tmp.path().join("pids.max"), "max\n").unwrap();

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());
        assert_eq!(
            sample_value(&text, "cgroup_processes_limit", &[(GROUP_LABEL, "root")]),
            Some(f64::INFINITY)
        );
    }

    #[test]
    fn test_counts_process_states_from_proc() {
        let tmp = tempfile::tempdir().unwrap();
        let proc_root = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "pids");
        fs::write(tmp.path().join("cgroup.procs"), "10\n11\n12\n").unwrap();
        for (pid, state) in [(10, 'R'), (11, 'S'), (12, 'Z')] {
            let dir = proc_root.path().join(pid.to_string());
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("stat"), format!("{pid} (worker) {state} 1 0")).unwrap();
        }

        let mut config = test_config(tmp.path().to_path_buf());
        config.proc_root = proc_root.path().to_path_buf();
        let collector = collector(config);
        let text = render(&collector.collect());

        let labels = &[(GROUP_LABEL, "root")];
        assert_close(sample_value(&text, "cgroup_processes_running", labels), 1.0);
        assert_close(sample_value(&text, "cgroup_processes_sleeping", labels), 1.0);
        assert_close(sample_value(&text, "cgroup_processes_zombie", labels), 1.0);
    }

    #[test]
    fn test_absent_pids_files_are_silent() {
        let tmp = tempfile::tempdir().unwrap();
        make_cgroup(tmp.path(), "pids");

        let collector = collector(test_config(tmp.path().to_path_buf()));
        let text = render(&collector.collect());
        assert_eq!(sample_count(&text, "cgroup_processes_count"), 0);
        assert_close(
            sample_value(&text, "cgroup_exporter_processes_scrape_errors_total", &[]),
            0.0,
        );
    }
}
