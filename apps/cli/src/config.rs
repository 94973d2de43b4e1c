// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI configuration loaded from environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use octsurf_surface::Settings;

const DEFAULT_LOG_FILTER: &str = "info,octsurf_octree=info,octsurf_surface=info";

/// Defaults that command-line flags may override.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconstruction settings file.
    pub settings_path: Option<PathBuf>,
    /// tracing filter directive.
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            settings_path: std::env::var_os("OCTSURF_SETTINGS").map(PathBuf::from),
            log_filter: std::env::var("OCTSURF_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        }
    }

    /// Settings from `flag` if given, else from the environment, else the
    /// defaults.
    pub fn settings(&self, flag: Option<&Path>) -> Result<Settings> {
        match flag.or(self.settings_path.as_deref()) {
            Some(path) => Settings::from_json_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display())),
            None => Ok(Settings::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_takes_precedence() {
        let path = std::env::temp_dir().join(format!("octsurf-cli-settings-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "max_colinearity": 0.5 }"#).unwrap();

        let config = Config {
            settings_path: Some(PathBuf::from("/nonexistent/settings.json")),
            log_filter: DEFAULT_LOG_FILTER.into(),
        };
        let s = config.settings(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(s.max_colinearity, 0.5);

        assert!(config.settings(None).is_err());
    }

    #[test]
    fn no_settings_means_defaults() {
        let config = Config {
            settings_path: None,
            log_filter: DEFAULT_LOG_FILTER.into(),
        };
        assert_eq!(config.settings(None).unwrap(), Settings::default());
    }
}
