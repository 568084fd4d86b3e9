//! Typed records for cgroup v2 accounting files.
//!
//! One parser per resource subsystem turns the kernel's accounting files into
//! flat records with explicitly optional fields; absent is distinct from zero
//! throughout so collectors can omit metrics instead of reporting false
//! zeros. The per-subsystem sample bundles ([`CpuSample`], [`MemorySample`],
//! [`IoSample`], [`PidsSample`]) group everything one collector reads for a
//! single control group, and [`SubsystemStats`] is the tagged union the
//! metric cache stores.

mod cpu;
mod error;
mod io;
mod memory;
mod parser;
mod pids;
mod pressure;

pub use cpu::CpuStat;
pub use error::StatParseError;
pub use io::{DeviceIoStat, IoStat};
pub use memory::{MemoryCurrent, MemoryEvents, MemoryLimit, MemoryStat};
pub use parser::{KeyValueStat, Parsed, SingleLineStat};
pub use pids::{PidsCurrent, PidsLimit, ProcessStates, read_procs};
pub use pressure::PressureStat;

/// Everything the CPU collector reads for one control group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuSample {
    pub stat: CpuStat,
    pub pressure: Option<PressureStat>,
}

/// Everything the memory collector reads for one control group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemorySample {
    pub stat: MemoryStat,
    /// Current usage in bytes from `memory.current`.
    pub current: Option<u64>,
    /// Limit from `memory.max`; `None` when the file is absent,
    /// `Some(MemoryLimit { limit_bytes: None })` when unlimited.
    pub limit: Option<MemoryLimit>,
    /// Swap usage in bytes from `memory.swap.current` (feature-toggled).
    pub swap_current: Option<u64>,
    pub events: MemoryEvents,
    pub pressure: Option<PressureStat>,
}

/// Everything the I/O collector reads for one control group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoSample {
    pub stat: IoStat,
    pub pressure: Option<PressureStat>,
}

/// Everything the PIDs collector reads for one control group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PidsSample {
    /// Task count from `pids.current`.
    pub current: Option<u64>,
    /// Limit from `pids.max`; `None` when the file is absent.
    pub limit: Option<PidsLimit>,
    /// Per-state counts; `None` when `cgroup.procs` was unreadable.
    pub states: Option<ProcessStates>,
}

/// Tagged union of per-subsystem samples, keyed by subsystem at the cache
/// boundary instead of an untyped value bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsystemStats {
    Cpu(CpuSample),
    Memory(MemorySample),
    Io(IoSample),
    Pids(PidsSample),
}

/// Resource subsystems the exporter knows about.
///
/// `as_str` values are the metric subsystem names and must stay stable: they
/// are part of the exported naming contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Cpu,
    Memory,
    Io,
    Pids,
}

impl Subsystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Subsystem::Cpu => "cpu",
            Subsystem::Memory => "memory",
            Subsystem::Io => "io",
            Subsystem::Pids => "processes",
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
