/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduler configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! system:
//!   period_ns: 1000000
//!   event_capacity: 64
//!   events_per_period: 16
//!   max_devices: 64
//!   max_threads: 64
//! task:
//!   name: "rtxi-rt"
//!   realtime: true
//!   priority: 80
//!   cpu_affinity: 2
//!   lock_memory: true
//!   require_realtime: false
//! ```
//!
//! Every key is optional; absent keys take the defaults shown above
//! (`cpu_affinity` defaults to unpinned).

pub mod prefs;

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::os::TaskConfig;

/// Default loop period: 1 ms.
pub const DEFAULT_PERIOD_NS: u64 = 1_000_000;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_EVENTS_PER_PERIOD: usize = 16;
pub const DEFAULT_MAX_UNITS: usize = 64;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    system: LoopEntry,
    #[serde(default)]
    task: TaskEntry,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoopEntry {
    #[serde(default = "default_period_ns")]
    period_ns: u64,
    #[serde(default = "default_event_capacity")]
    event_capacity: usize,
    #[serde(default = "default_events_per_period")]
    events_per_period: usize,
    #[serde(default = "default_max_units")]
    max_devices: usize,
    #[serde(default = "default_max_units")]
    max_threads: usize,
}

impl Default for LoopEntry {
    fn default() -> Self {
        Self {
            period_ns: default_period_ns(),
            event_capacity: default_event_capacity(),
            events_per_period: default_events_per_period(),
            max_devices: default_max_units(),
            max_threads: default_max_units(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskEntry {
    name: Option<String>,
    realtime: Option<bool>,
    priority: Option<i32>,
    cpu_affinity: Option<usize>,
    lock_memory: Option<bool>,
    require_realtime: Option<bool>,
}

fn default_period_ns() -> u64 {
    DEFAULT_PERIOD_NS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_events_per_period() -> usize {
    DEFAULT_EVENTS_PER_PERIOD
}

fn default_max_units() -> usize {
    DEFAULT_MAX_UNITS
}

// ── Public data structures ────────────────────────────────────────────────────

/// Loop sizing and cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Initial period in nanoseconds.  Strictly positive.
    pub period_ns: u64,
    /// Bound of the inbound event channel.
    pub event_capacity: usize,
    /// Most events executed in one period.
    pub events_per_period: usize,
    /// Pre-sized Device collection.
    pub max_devices: usize,
    /// Pre-sized Thread collection.
    pub max_threads: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        let e = LoopEntry::default();
        Self {
            period_ns: e.period_ns,
            event_capacity: e.event_capacity,
            events_per_period: e.events_per_period,
            max_devices: e.max_devices,
            max_threads: e.max_threads,
        }
    }
}

/// Everything [`System::initiate`](crate::System::initiate) needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemConfig {
    pub system: LoopConfig,
    pub task: TaskConfig,
}

impl SystemConfig {
    /// Default sizing without realtime scheduling or memory locking.  Used by
    /// tests and unprivileged tools.
    pub fn testing() -> Self {
        Self {
            system: LoopConfig::default(),
            task: TaskConfig::minimal(),
        }
    }

    pub fn with_period_ns(mut self, period_ns: u64) -> Self {
        self.system.period_ns = period_ns;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.system.event_capacity = capacity;
        self
    }

    pub fn with_events_per_period(mut self, n: usize) -> Self {
        self.system.events_per_period = n;
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.task = task;
        self
    }

    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is invalid
    /// or contains unknown keys, or a value fails [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading system configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))?;

        info!(
            period_ns = config.system.period_ns,
            event_capacity = config.system.event_capacity,
            events_per_period = config.system.events_per_period,
            priority = config.task.priority,
            cpu = ?config.task.cpu_affinity,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        let file: ConfigFile = if content.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };

        let defaults = TaskConfig::default();
        let t = file.task;
        let config = Self {
            system: LoopConfig {
                period_ns: file.system.period_ns,
                event_capacity: file.system.event_capacity,
                events_per_period: file.system.events_per_period,
                max_devices: file.system.max_devices,
                max_threads: file.system.max_threads,
            },
            task: TaskConfig {
                name: t.name.unwrap_or(defaults.name),
                realtime: t.realtime.unwrap_or(defaults.realtime),
                priority: t.priority.unwrap_or(defaults.priority),
                cpu_affinity: t.cpu_affinity.or(defaults.cpu_affinity),
                lock_memory: t.lock_memory.unwrap_or(defaults.lock_memory),
                require_realtime: t.require_realtime.unwrap_or(defaults.require_realtime),
            },
        };
        debug!(?config, "Parsed configuration");

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.system;
        if s.period_ns == 0 {
            bail!("system.period_ns must be strictly positive");
        }
        if s.event_capacity == 0 {
            bail!("system.event_capacity must be at least 1");
        }
        if s.events_per_period == 0 {
            bail!("system.events_per_period must be at least 1");
        }
        if s.max_devices == 0 || s.max_threads == 0 {
            bail!("system.max_devices and system.max_threads must be at least 1");
        }
        if !(1..=99).contains(&self.task.priority) {
            bail!(
                "task.priority {} outside SCHED_FIFO range 1..=99",
                self.task.priority
            );
        }
        if self.task.name.is_empty() {
            bail!("task.name must not be empty");
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_config_has_expected_values() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.system.period_ns, 1_000_000);
        assert_eq!(cfg.system.event_capacity, 64);
        assert_eq!(cfg.system.events_per_period, 16);
        assert_eq!(cfg.system.max_devices, 64);
        assert_eq!(cfg.system.max_threads, 64);
        assert_eq!(cfg.task, TaskConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn testing_config_disables_realtime() {
        let cfg = SystemConfig::testing();
        assert!(!cfg.task.realtime);
        assert!(!cfg.task.lock_memory);
    }

    // ── load_from_file ────────────────────────────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
system:
  period_ns: 250000
  event_capacity: 8
  events_per_period: 4
  max_devices: 16
  max_threads: 32
task:
  name: "rt-loop"
  priority: 90
  cpu_affinity: 3
  lock_memory: false
  require_realtime: true
"#;
        let f = yaml_tempfile(yaml);
        let cfg = SystemConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.system.period_ns, 250_000);
        assert_eq!(cfg.system.event_capacity, 8);
        assert_eq!(cfg.system.events_per_period, 4);
        assert_eq!(cfg.system.max_devices, 16);
        assert_eq!(cfg.system.max_threads, 32);
        assert_eq!(cfg.task.name, "rt-loop");
        assert_eq!(cfg.task.priority, 90);
        assert_eq!(cfg.task.cpu_affinity, Some(3));
        assert!(cfg.task.realtime);
        assert!(!cfg.task.lock_memory);
        assert!(cfg.task.require_realtime);
    }

    #[test]
    fn missing_keys_use_defaults() {
        let f = yaml_tempfile("system:\n  period_ns: 500000\n");
        let cfg = SystemConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.system.period_ns, 500_000);
        assert_eq!(cfg.system.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(cfg.task, TaskConfig::default());
    }

    #[test]
    fn empty_file_is_default_config() {
        let f = yaml_tempfile("");
        let cfg = SystemConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, SystemConfig::default());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = SystemConfig::load_from_file(Path::new("/nonexistent/path/rtxi.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(SystemConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let f = yaml_tempfile("system:\n  perod_ns: 1000\n");
        assert!(SystemConfig::load_from_file(f.path()).is_err());
    }

    // ── validate ──────────────────────────────────────────────────────────────

    #[test]
    fn zero_period_is_rejected() {
        let err = SystemConfig::from_yaml_str("system:\n  period_ns: 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("period_ns"));
    }

    #[test]
    fn zero_drain_cap_is_rejected() {
        let cfg = SystemConfig::default().with_events_per_period(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        for p in [0, 100, -1] {
            let cfg = SystemConfig::default().with_task(TaskConfig::new().with_priority(p));
            assert!(cfg.validate().is_err(), "priority {p} accepted");
        }
    }
}
