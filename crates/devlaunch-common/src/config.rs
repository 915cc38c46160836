//! ---
//! dl_section: "01-core-functionality"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "TOML configuration loading and validation."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_runtime_version() -> String {
    "1.0.0".to_owned()
}

fn default_allow_development_mode() -> bool {
    true
}

fn default_launcher_bundle_url() -> String {
    "http://localhost:8090/launcher/index.bundle".to_owned()
}

fn default_update_scheme() -> String {
    "update".to_owned()
}

fn default_recent_apps_path() -> PathBuf {
    PathBuf::from("target/devlaunch/recent_apps.json")
}

fn default_recent_apps_capacity() -> usize {
    10
}

fn default_recent_apps_max_age() -> Duration {
    Duration::from_secs(3 * 24 * 60 * 60)
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("target/devlaunch/updates")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the launcher and the update store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub updates: UpdatesConfig,
    #[serde(default)]
    pub launcher: LauncherSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "DEVLAUNCH_CONFIG";

    /// Load configuration from disk, respecting the `DEVLAUNCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.updates.validate()?;
        self.launcher.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Accepted shape of runtime version strings.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeVersionFormat {
    /// Any non-empty string.
    #[default]
    Any,
    /// Must parse as a SemVer version.
    Semver,
}

impl RuntimeVersionFormat {
    pub fn accepts(&self, runtime_version: &str) -> bool {
        if runtime_version.trim().is_empty() {
            return false;
        }
        match self {
            RuntimeVersionFormat::Any => true,
            RuntimeVersionFormat::Semver => semver::Version::parse(runtime_version).is_ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesConfig {
    #[serde(default = "default_runtime_version")]
    pub expected_runtime_version: String,
    #[serde(default)]
    pub runtime_version_format: RuntimeVersionFormat,
    #[serde(default = "default_allow_development_mode")]
    pub allow_development_mode: bool,
    #[serde(default)]
    pub require_asset_hashes: bool,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            expected_runtime_version: default_runtime_version(),
            runtime_version_format: RuntimeVersionFormat::default(),
            allow_development_mode: default_allow_development_mode(),
            require_asset_hashes: false,
        }
    }
}

impl UpdatesConfig {
    pub fn validate(&self) -> Result<()> {
        if !self
            .runtime_version_format
            .accepts(&self.expected_runtime_version)
        {
            return Err(anyhow!(
                "expected runtime version '{}' does not match format {:?}",
                self.expected_runtime_version,
                self.runtime_version_format
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherSettings {
    #[serde(default = "default_launcher_bundle_url")]
    pub launcher_bundle_url: String,
    #[serde(default = "default_update_scheme")]
    pub update_scheme: String,
    /// Schemes accepted by deep-link intake; empty accepts every scheme.
    #[serde(default)]
    pub allowed_deep_link_schemes: Vec<String>,
    #[serde(default)]
    pub recent_apps: RecentAppsConfig,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            launcher_bundle_url: default_launcher_bundle_url(),
            update_scheme: default_update_scheme(),
            allowed_deep_link_schemes: Vec::new(),
            recent_apps: RecentAppsConfig::default(),
        }
    }
}

impl LauncherSettings {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.launcher_bundle_url).with_context(|| {
            format!(
                "launcher bundle url '{}' is not a valid url",
                self.launcher_bundle_url
            )
        })?;
        if self.update_scheme.trim().is_empty() {
            return Err(anyhow!("launcher update_scheme must not be empty"));
        }
        if self.recent_apps.capacity == 0 {
            return Err(anyhow!("recent_apps.capacity must be at least 1"));
        }
        Ok(())
    }

    /// Whether a deep link with the given scheme should be accepted.
    pub fn accepts_scheme(&self, scheme: &str) -> bool {
        self.allowed_deep_link_schemes.is_empty()
            || self
                .allowed_deep_link_schemes
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentAppsConfig {
    #[serde(default = "default_recent_apps_path")]
    pub path: PathBuf,
    #[serde(default = "default_recent_apps_capacity")]
    pub capacity: usize,
    #[serde(default = "default_recent_apps_max_age")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_age: Duration,
}

impl Default for RecentAppsConfig {
    fn default() -> Self {
        Self {
            path: default_recent_apps_path(),
            capacity: default_recent_apps_capacity(),
            max_age: default_recent_apps_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config: AppConfig = r#"
            [updates]
            expected_runtime_version = "40.0.0"
            runtime_version_format = "semver"
            require_asset_hashes = true

            [launcher]
            allowed_deep_link_schemes = ["myapp"]

            [launcher.recent_apps]
            capacity = 3
            max_age = 60
        "#
        .parse()
        .unwrap();
        assert_eq!(config.updates.expected_runtime_version, "40.0.0");
        assert!(config.updates.allow_development_mode);
        assert_eq!(config.launcher.recent_apps.capacity, 3);
        assert_eq!(config.launcher.recent_apps.max_age, Duration::from_secs(60));
        assert_eq!(config.launcher.update_scheme, "update");
        assert!(config.launcher.accepts_scheme("MyApp"));
        assert!(!config.launcher.accepts_scheme("other"));
    }

    #[test]
    fn rejects_non_semver_runtime_when_required() {
        let err = r#"
            [updates]
            expected_runtime_version = "exposdk:40"
            runtime_version_format = "semver"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("does not match format"));
    }

    #[test]
    fn rejects_invalid_launcher_url() {
        let err = r#"
            [launcher]
            launcher_bundle_url = "not a url"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("launcher bundle url"));
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devlaunch.toml");
        fs::write(&path, "[storage]\ndirectory = \"/tmp/devlaunch-store\"\n").unwrap();
        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(
            loaded.config.storage.directory,
            PathBuf::from("/tmp/devlaunch-store")
        );
    }
}
