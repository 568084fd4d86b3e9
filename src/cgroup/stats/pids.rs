//! Parsing for process accounting of a control group.
//!
//! Combines three sources:
//!
//! - `pids.current`: single-line count of tasks in the group,
//! - `pids.max`: single-line task limit, with the `max` sentinel meaning
//!   unlimited (maps to `None`, exposed as `+Inf`),
//! - `cgroup.procs` plus `/proc/<pid>/stat`: per-state process counts.
//!
//! State counting is best-effort by nature: a process listed in
//! `cgroup.procs` can exit before its `/proc` entry is read, so per-PID read
//! failures are skipped silently.

use std::io::BufRead;
use std::path::Path;

use super::parser::Parsed;
use super::{SingleLineStat, StatParseError};

/// Task count from `pids.current`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PidsCurrent {
    pub current: Option<u64>,
}

impl SingleLineStat for PidsCurrent {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut line = String::new();
        buf.read_line(&mut line)?;
        let line = line.trim();

        match line.parse::<u64>() {
            Ok(value) => Ok(Parsed::complete(PidsCurrent {
                current: Some(value),
            })),
            Err(source) => Ok(Parsed {
                record: PidsCurrent::default(),
                error: Some(StatParseError::InvalidValue {
                    value: line.to_string(),
                    line: 1,
                    source,
                }),
            }),
        }
    }
}

/// Task limit from `pids.max`; `None` is the `max` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PidsLimit {
    pub limit: Option<u64>,
}

impl SingleLineStat for PidsLimit {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut line = String::new();
        buf.read_line(&mut line)?;

        match line.trim() {
            // Only the literal sentinel means unlimited; an empty line is
            // malformed and falls through to the parse error below.
            "max" => Ok(Parsed::complete(PidsLimit { limit: None })),
            value => match value.parse::<u64>() {
                Ok(limit) => Ok(Parsed::complete(PidsLimit { limit: Some(limit) })),
                Err(source) => Ok(Parsed {
                    record: PidsLimit::default(),
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

/// Process counts by scheduler state, derived from `/proc/<pid>/stat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessStates {
    pub running: u64,
    pub sleeping: u64,
    pub zombie: u64,
}

impl ProcessStates {
    /// Counts the states of the given PIDs under a procfs root.
    ///
    /// PIDs whose stat file cannot be read or parsed are skipped; they have
    /// usually exited between listing and reading.
    pub fn from_proc(proc_root: impl AsRef<Path>, pids: &[u32]) -> Self {
        let proc_root = proc_root.as_ref();
        let mut states = ProcessStates::default();

        for pid in pids {
            let path = proc_root.join(pid.to_string()).join("stat");
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            match extract_state(&contents) {
                Some('R') => states.running += 1,
                Some('Z') => states.zombie += 1,
                Some(_) => states.sleeping += 1,
                None => {}
            }
        }

        states
    }
}

/// Extracts the state character from `/proc/<pid>/stat` contents.
///
/// The state is the first field after the parenthesized command name; the
/// name itself may contain spaces and parentheses, so scan from the last `)`.
fn extract_state(stat_line: &str) -> Option<char> {
    let after_comm = &stat_line[stat_line.rfind(')')? + 1..];
    after_comm.split_whitespace().next()?.chars().next()
}

/// Reads the PID list from a `cgroup.procs` reader.
///
/// Lines that do not parse as a PID are skipped.
pub fn read_procs<R: BufRead>(buf: &mut R) -> std::io::Result<Vec<u32>> {
    let mut pids = Vec::new();
    for line in buf.lines() {
        let line = line?;
        if let Ok(pid) = line.trim().parse::<u32>() {
            pids.push(pid);
        }
    }
    Ok(pids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_pids_current() {
        let data = "17\n";
        let parsed = PidsCurrent::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.current, Some(17));
    }

    #[test]
    fn test_parse_pids_current_garbage() {
        let data = "seventeen\n";
        let parsed = PidsCurrent::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.current, None);
        assert!(parsed.is_partial());
    }

    #[test]
    fn test_parse_pids_limit_max_sentinel() {
        let data = "max\n";
        let parsed = PidsLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit, None);
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_parse_pids_limit_empty_is_an_error() {
        let data = "\n";
        let parsed = PidsLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit, None);
        assert!(parsed.is_partial());
    }

    #[test]
    fn test_parse_pids_limit_numeric() {
        let data = "4096\n";
        let parsed = PidsLimit::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.limit, Some(4096));
    }

    #[test]
    fn test_read_procs() {
        let data = "1\n42\nnot-a-pid\n4711\n";
        let pids = read_procs(&mut data.as_bytes()).unwrap();
        assert_eq!(pids, vec![1, 42, 4711]);
    }

    #[test]
    fn test_extract_state_with_hostile_comm() {
        let line = "42 (a) b) ( name) R 1 42 42 0 -1";
        assert_eq!(extract_state(line), Some('R'));
    }

    #[test]
    fn test_process_states_from_fake_proc() {
        let proc_root = tempfile::tempdir().unwrap();
        for (pid, state) in [(10, 'R'), (11, 'S'), (12, 'Z'), (13, 'D')] {
            let dir = proc_root.path().join(pid.to_string());
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("stat"), format!("{pid} (proc-{pid}) {state} 1 0")).unwrap();
        }

        // 99 has no stat file; it exited between listing and reading.
        let states = ProcessStates::from_proc(proc_root.path(), &[10, 11, 12, 13, 99]);
        assert_eq!(states.running, 1);
        assert_eq!(states.sleeping, 2);
        assert_eq!(states.zombie, 1);
    }
}
