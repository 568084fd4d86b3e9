//! Parsing for CPU accounting as reported in cgroup v2 `cpu.stat` files.
//!
//! The file is a multi-line whitespace-separated key-value format:
//!
//! ```text
//! usage_usec 1234567
//! user_usec 600000
//! system_usec 400000
//! nr_periods 10
//! nr_throttled 2
//! throttled_usec 50000
//! ```
//!
//! All counters are cumulative and monotonic; they are re-exposed unchanged
//! (the scrape client computes rates). Fields missing from the file stay
//! `None` so the collector can omit the corresponding metric rather than
//! report zero usage.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;

/// Parsed contents of a cgroup `cpu.stat` file.
///
/// All `_usec` fields are microseconds, `nr_*` fields are counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Total CPU time consumed (user + system).
    pub usage_usec: Option<u64>,
    /// Time spent in user space.
    pub user_usec: Option<u64>,
    /// Time spent in kernel space.
    pub system_usec: Option<u64>,
    /// Number of scheduling periods the group was eligible to run.
    pub nr_periods: Option<u64>,
    /// Number of periods in which the group was throttled.
    pub nr_throttled: Option<u64>,
    /// Total time the group spent throttled.
    pub throttled_usec: Option<u64>,
}

type Setter = fn(&mut CpuStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(6);

    m.insert("usage_usec", |s, v| s.usage_usec = Some(v));
    m.insert("user_usec", |s, v| s.user_usec = Some(v));
    m.insert("system_usec", |s, v| s.system_usec = Some(v));
    m.insert("nr_periods", |s, v| s.nr_periods = Some(v));
    m.insert("nr_throttled", |s, v| s.nr_throttled = Some(v));
    m.insert("throttled_usec", |s, v| s.throttled_usec = Some(v));

    m
});

impl KeyValueStat for CpuStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_VALUES: usize = 0;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}
