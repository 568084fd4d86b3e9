//! Control-group discovery and accounting-file parsing.
//!
//! This module is the filesystem-facing half of the exporter: it walks the
//! cgroup v2 hierarchy to find live control groups and parses their
//! accounting files into typed records.
//!
//! # Key components
//!
//! - [`Walker`] — bounded, deterministic, lazy discovery of control groups.
//! - [`stats`] — per-subsystem parsers (CPU, memory, I/O, PIDs, pressure).
//!
//! # Consumed kernel interface (read-only)
//!
//! - `cgroup.controllers` marks a directory as a control group and lists its
//!   active controllers.
//! - `cpu.stat`, `cpu.pressure`
//! - `memory.current`, `memory.max`, `memory.stat`, `memory.events`,
//!   `memory.swap.current`, `memory.pressure`
//! - `io.stat`, `io.pressure`
//! - `pids.current`, `pids.max`, `cgroup.procs` (plus `/proc/<pid>/stat`)
//!
//! # Platform requirements
//!
//! - Linux with cgroup v2 support.
//! - Read access to the hierarchy root (usually `/sys/fs/cgroup`).

pub mod stats;
mod walker;

pub use walker::{CONTROLLERS_FILE, CgroupNode, ROOT_NAME, Walk, WalkError, Walker};
