/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Configuration management with validation and defaults.
//!
//! Everything the pipeline reads from its environment lives here so tests can
//! point each stage at arbitrary paths and endpoints.

use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BuilderError, BuilderResult};

const CONFIG_FILE_NAME: &str = "resolve-builder.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vendor API configuration
    pub api: ApiConfig,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Metainfo generation
    pub metainfo: MetainfoConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Vendor API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the vendor JSON API
    pub base_url: String,

    /// Public site, used for Origin/Referer headers and release notes links
    pub site_url: String,

    /// Product tag queried on the release endpoints
    pub app_tag: String,

    /// Referral id sent with every request
    pub refer_id: String,

    /// Timeout for API calls in seconds
    pub timeout_secs: u64,

    /// Timeout for the artifact transfer in seconds
    pub download_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.blackmagicdesign.com/api".to_string(),
            site_url: "https://www.blackmagicdesign.com".to_string(),
            app_tag: "davinci-resolve".to_string(),
            refer_id: "77ef91f67a9e411bbbe299e595b4cfcc".to_string(),
            timeout_secs: 30,
            download_timeout_secs: 3600,
        }
    }
}

/// Filesystem locations used by the pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the sandbox tree
    pub prefix: PathBuf,

    /// Build-scoped working directory; scratch trees are created here
    pub work_dir: PathBuf,

    /// Where downloaded artifacts are cached
    pub cache_dir: PathBuf,

    /// Desktop entry and metainfo templates
    pub templates_dir: PathBuf,

    /// Installer archive supplied by the user instead of downloading
    pub artifact: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("/app"),
            work_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("./cache"),
            templates_dir: PathBuf::from("."),
            artifact: None,
        }
    }
}

/// Metainfo generation options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetainfoConfig {
    /// Add previous releases from the vendor downloads listing
    pub release_history: bool,
}

impl Default for MetainfoConfig {
    fn default() -> Self {
        Self {
            release_history: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. ~/.config/resolve-builder/config.toml (user)
    /// 2. ./resolve-builder.toml (build directory)
    /// 3. `explicit`, when given; unlike the others it must exist and parse
    /// 4. Environment variables (RESOLVE_BUILDER_*)
    ///
    /// Files are layered key by key: any key a later file sets wins, even
    /// when it restores the built-in default.
    pub fn load(explicit: Option<&Path>) -> BuilderResult<Self> {
        let mut layered = toml::Table::new();

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("resolve-builder").join("config.toml");
            merge_optional(&mut layered, &user_config);
        }

        merge_optional(&mut layered, Path::new(CONFIG_FILE_NAME));

        if let Some(path) = explicit {
            merge_tables(&mut layered, read_table(path)?);
        }

        let config = Self::from_table(layered, Path::new("<merged configuration>"))?
            .apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a single configuration file
    pub fn from_file(path: &Path) -> BuilderResult<Self> {
        Self::from_table(read_table(path)?, path)
    }

    fn from_table(table: toml::Table, origin: &Path) -> BuilderResult<Self> {
        toml::Value::Table(table).try_into().map_err(|e| {
            BuilderError::config(format!("invalid configuration in '{}': {}", origin.display(), e))
        })
    }

    /// Apply environment variable overrides read through `lookup`
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RESOLVE_BUILDER_PREFIX") {
            self.paths.prefix = PathBuf::from(val);
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_WORK_DIR") {
            self.paths.work_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_CACHE_DIR") {
            self.paths.cache_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_TEMPLATES_DIR") {
            self.paths.templates_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_REFER_ID") {
            self.api.refer_id = val;
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_API_URL") {
            self.api.base_url = val;
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_RELEASE_HISTORY") {
            self.metainfo.release_history = val == "1" || val.to_lowercase() == "true";
        }
        if let Some(val) = lookup("RESOLVE_BUILDER_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> BuilderResult<()> {
        if self.api.app_tag.trim().is_empty() {
            return Err(BuilderError::config("api.app_tag must not be empty"));
        }
        if self.api.refer_id.trim().is_empty() {
            return Err(BuilderError::config("api.refer_id must not be empty"));
        }
        if self.api.timeout_secs == 0 || self.api.download_timeout_secs == 0 {
            return Err(BuilderError::config("timeouts must be at least 1 second"));
        }
        for (key, value) in [("api.base_url", &self.api.base_url), ("api.site_url", &self.api.site_url)] {
            match url::Url::parse(value) {
                Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
                _ => {
                    return Err(BuilderError::config(format!(
                        "{} must be an http(s) URL, got '{}'",
                        key, value
                    )))
                }
            }
        }

        // Installing clears everything below the prefix
        let prefix = absolute(&self.paths.prefix);
        for (key, dir) in [
            ("paths.work_dir", &self.paths.work_dir),
            ("paths.cache_dir", &self.paths.cache_dir),
            ("paths.templates_dir", &self.paths.templates_dir),
        ] {
            if absolute(dir).starts_with(&prefix) {
                return Err(BuilderError::config(format!(
                    "{} '{}' lies inside paths.prefix '{}'",
                    key,
                    dir.display(),
                    self.paths.prefix.display()
                )));
            }
        }
        Ok(())
    }
}

/// Anchor `path` at the current directory and drop `.` and `..` lexically
fn absolute(path: &Path) -> PathBuf {
    let joined = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };
    let mut normal = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }
    normal
}

impl ApiConfig {
    /// Base URL without a trailing slash
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Referer header expected by the vendor endpoints
    pub fn referer(&self) -> String {
        format!(
            "{}/support/download/{}/Linux",
            self.site_url.trim_end_matches('/'),
            self.refer_id
        )
    }
}

impl PathsConfig {
    /// Directory holding the `.desktop` templates
    pub fn desktop_dir(&self) -> PathBuf {
        self.templates_dir.join("desktop")
    }

    /// Directory holding the metainfo templates
    pub fn metainfo_template_dir(&self) -> PathBuf {
        self.templates_dir.join("metainfo")
    }
}

/// Read a file as a raw table, rejecting values that do not fit `Config`
fn read_table(path: &Path) -> BuilderResult<toml::Table> {
    let content = fs::read_to_string(path).map_err(|e| {
        BuilderError::config(format!("cannot read '{}': {}", path.display(), e))
    })?;
    let table: toml::Table = content.parse().map_err(|e| {
        BuilderError::config(format!("invalid TOML in '{}': {}", path.display(), e))
    })?;
    Config::from_table(table.clone(), path)?;
    Ok(table)
}

fn merge_optional(layered: &mut toml::Table, path: &Path) {
    if !path.exists() {
        return;
    }
    match read_table(path) {
        Ok(table) => {
            debug!(path = %path.display(), "loaded configuration");
            merge_tables(layered, table);
        }
        Err(e) => warn!("ignoring {}", e),
    }
}

/// Overlay `upper` onto `base`; nested tables merge, any other value replaces
fn merge_tables(base: &mut toml::Table, upper: toml::Table) {
    for (key, value) in upper {
        match value {
            toml::Value::Table(upper) => match base.get_mut(&key) {
                Some(toml::Value::Table(lower)) => merge_tables(lower, upper),
                _ => {
                    base.insert(key, toml::Value::Table(upper));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
