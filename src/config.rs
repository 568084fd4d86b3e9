//! Exporter configuration.
//!
//! Defaults work unchanged on a standard cgroup v2 host. A JSON file named
//! by the `CGROUP_EXPORTER_CONFIG` environment variable overrides the
//! defaults, and a handful of single-value environment variables override
//! the file in turn, for container deployments that only need to tweak one
//! knob.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value `{value}` for environment variable `{name}`")]
    InvalidEnv { name: &'static str, value: String },

    #[error("max_cgroups must be at least 1")]
    ZeroMaxCgroups,

    #[error("max_depth must be at least 1")]
    ZeroMaxDepth,
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_listen_address() -> String {
    "0.0.0.0:9753".to_string()
}

const DEFAULT_MAX_CGROUPS: usize = 10_000;
const DEFAULT_MAX_DEPTH: usize = 32;
const DEFAULT_CACHE_TTL_MS: u64 = 60_000;
const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 10_000;

/// Top-level exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the cgroup v2 hierarchy to walk.
    pub cgroup_root: PathBuf,
    /// Root of procfs, used for per-process state counting.
    pub proc_root: PathBuf,
    /// Address the HTTP server binds to.
    pub listen_address: String,
    /// Hard cap on control groups discovered per walk.
    pub max_cgroups: usize,
    /// Hard cap on walk depth below the root.
    pub max_depth: usize,
    /// Metric cache TTL in milliseconds; zero disables caching.
    pub cache_ttl_ms: u64,
    /// Per-pass walk deadline in milliseconds; zero disables the deadline.
    pub scrape_timeout_ms: u64,
    pub collectors: Collectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cgroup_root: default_cgroup_root(),
            proc_root: default_proc_root(),
            listen_address: default_listen_address(),
            max_cgroups: DEFAULT_MAX_CGROUPS,
            max_depth: DEFAULT_MAX_DEPTH,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            scrape_timeout_ms: DEFAULT_SCRAPE_TIMEOUT_MS,
            collectors: Collectors::default(),
        }
    }
}

/// Per-subsystem collector toggles. Everything is on by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Collectors {
    pub cpu: CpuCollectorConfig,
    pub memory: MemoryCollectorConfig,
    pub io: IoCollectorConfig,
    pub pids: PidsCollectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuCollectorConfig {
    pub enabled: bool,
    pub include_pressure: bool,
}

impl Default for CpuCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_pressure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCollectorConfig {
    pub enabled: bool,
    pub include_pressure: bool,
    pub include_swap: bool,
}

impl Default for MemoryCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_pressure: true,
            include_swap: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoCollectorConfig {
    pub enabled: bool,
    pub include_pressure: bool,
}

impl Default for IoCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_pressure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidsCollectorConfig {
    pub enabled: bool,
}

impl Default for PidsCollectorConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Resolves the effective configuration: defaults, then the JSON file
    /// named by `CGROUP_EXPORTER_CONFIG` (if set), then environment
    /// overrides, then validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read or parsed,
    /// when an override variable carries a non-numeric value, or when
    /// validation rejects the resolved values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("CGROUP_EXPORTER_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file; absent keys keep their defaults.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(root) = std::env::var_os("CGROUP_EXPORTER_CGROUP_ROOT") {
            self.cgroup_root = PathBuf::from(root);
        }
        if let Ok(addr) = std::env::var("CGROUP_EXPORTER_LISTEN_ADDRESS") {
            self.listen_address = addr;
        }
        if let Ok(value) = std::env::var("CGROUP_EXPORTER_CACHE_TTL_MS") {
            self.cache_ttl_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "CGROUP_EXPORTER_CACHE_TTL_MS",
                value,
            })?;
        }
        if let Ok(value) = std::env::var("CGROUP_EXPORTER_MAX_CGROUPS") {
            self.max_cgroups = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "CGROUP_EXPORTER_MAX_CGROUPS",
                value,
            })?;
        }
        Ok(())
    }

    /// Rejects configurations that would make collection unbounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cgroups == 0 {
            return Err(ConfigError::ZeroMaxCgroups);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroMaxDepth);
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.listen_address, "0.0.0.0:9753");
        assert_eq!(config.max_cgroups, 10_000);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert!(config.collectors.cpu.enabled);
        assert!(config.collectors.memory.include_swap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "cgroup_root": "/custom/cgroup",
                "cache_ttl_ms": 0,
                "collectors": {{ "io": {{ "enabled": false }} }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cgroup_root, PathBuf::from("/custom/cgroup"));
        assert_eq!(config.cache_ttl_ms, 0);
        assert!(!config.collectors.io.enabled);
        // Untouched keys keep their defaults.
        assert!(config.collectors.io.include_pressure);
        assert_eq!(config.max_cgroups, 10_000);
        assert!(config.collectors.cpu.enabled);
    }

    #[test]
    fn test_from_file_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_from_missing_file_is_an_error() {
        assert!(matches!(
            Config::from_file("/definitely/does/not/exist.json"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = Config::default();
        config.max_cgroups = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroMaxCgroups)
        ));

        let mut config = Config::default();
        config.max_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxDepth)));
    }
}
