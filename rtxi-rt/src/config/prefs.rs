/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Persistent user preferences.
//!
//! Typed settings consumed by plugins and front ends, never by the
//! scheduler itself.  Stored as YAML:
//!
//! ```yaml
//! dirs:
//!   setfiles: /home/user
//!   dynamomodels: /home/user
//!   data: /home/user
//! system:
//!   hdf_buffer_mb: 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default data-recorder buffer size.
pub const DEFAULT_HDF_BUFFER_MB: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirPrefs {
    /// Where workspace settings files are opened from and saved to.
    #[serde(default = "home_dir")]
    pub setfiles: PathBuf,
    /// Where model description files are looked up.
    #[serde(default = "home_dir")]
    pub dynamomodels: PathBuf,
    /// Where recorded data files are written.
    #[serde(default = "home_dir")]
    pub data: PathBuf,
}

impl Default for DirPrefs {
    fn default() -> Self {
        Self {
            setfiles: home_dir(),
            dynamomodels: home_dir(),
            data: home_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPrefs {
    /// Data-recorder buffer size in MB.
    #[serde(default = "default_hdf_buffer_mb")]
    pub hdf_buffer_mb: u32,
}

impl Default for SystemPrefs {
    fn default() -> Self {
        Self {
            hdf_buffer_mb: DEFAULT_HDF_BUFFER_MB,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrefs {
    #[serde(default)]
    pub dirs: DirPrefs,
    #[serde(default)]
    pub system: SystemPrefs,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_hdf_buffer_mb() -> u32 {
    DEFAULT_HDF_BUFFER_MB
}

impl UserPrefs {
    /// Read `path`.  A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No preferences at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open preferences file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let prefs: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        info!("Loaded preferences from: {}", path.display());
        Ok(prefs)
    }

    /// Write to `path`, creating its parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory: {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize preferences")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Cannot write preferences file: {}", path.display()))?;
        info!("Saved preferences to: {}", path.display());
        Ok(())
    }

    /// Restore every setting to its default.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn setfiles_dir(&self) -> &Path {
        &self.dirs.setfiles
    }

    pub fn set_setfiles_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.setfiles = dir.into();
    }

    pub fn dynamomodels_dir(&self) -> &Path {
        &self.dirs.dynamomodels
    }

    pub fn set_dynamomodels_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.dynamomodels = dir.into();
    }

    pub fn data_dir(&self) -> &Path {
        &self.dirs.data
    }

    pub fn set_data_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.data = dir.into();
    }

    pub fn hdf_buffer_mb(&self) -> u32 {
        self.system.hdf_buffer_mb
    }

    /// Buffer size in bytes, as a recorder would allocate it.
    pub fn hdf_buffer_bytes(&self) -> usize {
        self.system.hdf_buffer_mb as usize * 1024 * 1024
    }

    pub fn set_hdf_buffer_mb(&mut self, mb: u32) -> Result<()> {
        if mb == 0 {
            bail!("HDF buffer size must be at least 1 MB");
        }
        self.system.hdf_buffer_mb = mb;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
