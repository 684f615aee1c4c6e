//! Application settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use sen_link::LinkConfig;
use sen_protocol::EmptyExportPolicy;
use sen_sim::VirtualMonitorConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Baud rate of the monitor firmware's console
pub const DEFAULT_BAUD: u32 = 115_200;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Port used when none is given on the command line
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Directory for downloaded files (default: current directory)
    pub output_dir: Option<PathBuf>,
    /// Write an export that holds comments but no header or rows
    pub write_comment_only_exports: bool,
    /// Timing of the serial link
    pub link: LinkConfig,
    /// Virtual monitor used when the port is `VSIM`
    pub simulator: VirtualMonitorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD,
            output_dir: None,
            write_comment_only_exports: false,
            link: LinkConfig::default(),
            simulator: VirtualMonitorConfig {
                preload_rows: 5,
                ..Default::default()
            },
        }
    }
}

impl Settings {
    /// Get the XDG config directory for sen66
    /// Uses $XDG_CONFIG_HOME/sen66 on Linux/macOS, falls back to ~/.config/sen66
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("sen66"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("sen66"))
    }

    /// Get the default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`, or from the default location
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::settings_path) else {
            return Self::default();
        };

        let Ok(text) = std::fs::read_to_string(&path) else {
            debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        };

        match serde_json::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring invalid settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to `path`, or to the default location
    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::settings_path)
            .context("could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        Ok(())
    }

    pub fn export_policy(&self) -> EmptyExportPolicy {
        if self.write_comment_only_exports {
            EmptyExportPolicy::AllowCommentsOnly
        } else {
            EmptyExportPolicy::SkipEmpty
        }
    }

    /// Resolve `name` against the output directory
    pub fn output_path(&self, name: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if name.is_relative() => dir.join(name),
            _ => name.to_path_buf(),
        }
    }
}
