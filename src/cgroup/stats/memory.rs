//! Parsing for memory accounting as reported in cgroup v2 files.
//!
//! Covers four file shapes:
//!
//! - `memory.stat`: multi-line key-value usage breakdown. `file` is the page
//!   cache, `anon` the resident anonymous set.
//! - `memory.events`: multi-line key-value event counters (`oom_kill`).
//! - `memory.current` / `memory.swap.current`: a single byte count.
//! - `memory.max`: a single byte count, or the literal `max` meaning the
//!   group is unlimited. `max` is a valid value, not a parse failure; it maps
//!   to `None` and is exposed as `+Inf`.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use super::parser::{KeyValueStat, Parsed};
use super::{SingleLineStat, StatParseError};

/// Breakdown of memory usage from `memory.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryStat {
    /// Anonymous (resident set) memory in bytes.
    pub anon: Option<u64>,
    /// Page-cache memory in bytes.
    pub file: Option<u64>,
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(2);

    m.insert("anon", |s, v| s.anon = Some(v));
    m.insert("file", |s, v| s.file = Some(v));

    m
});

impl KeyValueStat for MemoryStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_VALUES: usize = 0;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// Event counters from `memory.events`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryEvents {
    /// Number of times the OOM killer was invoked against the group.
    pub oom_kill: Option<u64>,
}

type EventSetter = fn(&mut MemoryEvents, u64);

static EVENT_SETTERS: LazyLock<HashMap<&'static str, EventSetter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, EventSetter> = HashMap::with_capacity(1);

    m.insert("oom_kill", |s, v| s.oom_kill = Some(v));

    m
});

impl KeyValueStat for MemoryEvents {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_VALUES: usize = 0;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &EVENT_SETTERS
    }
}

/// Instantaneous byte count from `memory.current` or `memory.swap.current`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryCurrent {
    pub usage_bytes: Option<u64>,
}

impl SingleLineStat for MemoryCurrent {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut line = String::new();
        buf.read_line(&mut line)?;
        let line = line.trim();

        match line.parse::<u64>() {
            Ok(value) => Ok(Parsed::complete(MemoryCurrent {
                usage_bytes: Some(value),
            })),
            Err(source) => Ok(Parsed {
                record: MemoryCurrent::default(),
                error: Some(StatParseError::InvalidValue {
                    value: line.to_string(),
                    line: 1,
                    source,
                }),
            }),
        }
    }
}

/// Memory limit from `memory.max`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryLimit {
    /// Limit in bytes; `None` is the `max` sentinel, i.e. unlimited.
    pub limit_bytes: Option<u64>,
}

impl SingleLineStat for MemoryLimit {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut line = String::new();
        buf.read_line(&mut line)?;

        match line.trim() {
            // Only the literal sentinel means unlimited; an empty line is
            // malformed and falls through to the parse error below.
            "max" => Ok(Parsed::complete(MemoryLimit { limit_bytes: None })),
            value => match value.parse::<u64>() {
                Ok(limit) => Ok(Parsed::complete(MemoryLimit {
                    limit_bytes: Some(limit),
                })),
                Err(source) => Ok(Parsed {
                    record: MemoryLimit::default(),
                    error: Some(StatParseError::InvalidValue {
                        value: value.to_string(),
                        line: 1,
                        source,
                    }),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_memory_stat() {
        let data = "";
        let parsed = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record, MemoryStat::default());
    }

    #[test]
    fn test_parse_complete_memory_stat() {
        let data = "\
anon 1000
file 2000
kernel_stack 300
slab 400
";
        let parsed = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.anon, Some(1000));
        assert_eq!(parsed.record.file, Some(2000));
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_parse_invalid_memory_stat_keeps_partial_record() {
        let data = "\
anon abc
file 2000
";
        let parsed = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.anon, None);
        assert_eq!(parsed.record.file, Some(2000));
        match parsed.error {
            Some(StatParseError::InvalidKeyValue { key, line, .. }) => {
                assert_eq!(key, "anon");
                assert_eq!(line, 1);
            }
            other => panic!("expected InvalidKeyValue error, got {other:?}"),
        }
    }

    #[test]
    fn test_extra_whitespace() {
        let data = "\
    anon     1000
file     2000
";
        let parsed = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.anon, Some(1000));
        assert_eq!(parsed.record.file, Some(2000));
    }

    #[test]
    fn test_parse_memory_events() {
        let data = "\
low 0
high 0
max 0
oom 1
oom_kill 3
";
        let parsed = MemoryEvents::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.oom_kill, Some(3));
    }

    #[test]
    fn test_parse_complete_memory_current() {
        let data = "104857600\n";
        let parsed = MemoryCurrent::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.usage_bytes, Some(104_857_600));
    }

    #[test]
    fn test_parse_invalid_memory_current() {
        let data = "abcd\n";
        let parsed = MemoryCurrent::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.usage_bytes, None);
        match parsed.error {
            Some(StatParseError::InvalidValue { value, line, .. }) => {
                assert_eq!(value, "abcd");
                assert_eq!(line, 1);
            }
            other => panic!("expected InvalidValue error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_memory_limit_max_sentinel() {
        let data = "max\n";
        let parsed = MemoryLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit_bytes, None);
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_parse_memory_limit_numeric() {
        let data = "104857600\n";
        let parsed = MemoryLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit_bytes, Some(104_857_600));
    }

    #[test]
    fn test_parse_memory_limit_garbage_is_an_error() {
        let data = "abc\n";
        let parsed = MemoryLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit_bytes, None);
        assert!(parsed.is_partial());
    }

    #[test]
    fn test_parse_memory_limit_empty_is_an_error() {
        let data = "";
        let parsed = MemoryLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit_bytes, None);
        assert!(parsed.is_partial());
    }
}
