/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load operator configuration (channel, check cadence,
    endpoints, external commands, paths) from TOML.

  Security / Safety Notes:
    Commands configured here run with user privileges only and
    are passed as argv vectors, never through a shell.

  Dependencies:
    serde + toml for parsing, dirs for platform locations.

  Operational Scope:
    Read once at start-up by the binary entry point; values are
    passed explicitly to every component.

  Revision History:
    2025-11-12 COD  Authored Syn-Upd configuration surface.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Absent file means defaults; malformed file is fatal
    - Explicit validation of numeric bounds
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::decision::Channel;
use crate::error::{Result, SynupdError};

const APP_DIR: &str = "syn-upd";
const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_INTERVAL_MINUTES: u64 = 4 * 60;
pub const MIN_INTERVAL_MINUTES: u64 = 15;

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynupdConfig {
    pub channel: Channel,
    pub check: CheckConfig,
    pub endpoints: EndpointConfig,
    pub http: HttpConfig,
    pub installed: InstalledConfig,
    pub install: CommandConfig,
    pub notify: CommandConfig,
    pub paths: PathConfig,
}

/// Periodic check settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

/// Update server locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    pub version_base: String,
    pub download_base: String,
    /// Application name embedded in manifest file names.
    pub app: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            version_base: "https://www.aqua-mail.com/version".into(),
            download_base: "https://www.aqua-mail.com/download".into(),
            app: "AquaMail".into(),
        }
    }
}

impl EndpointConfig {
    pub fn stable_manifest_url(&self) -> String {
        format!(
            "{}/xversion-{}-market.txt",
            self.version_base.trim_end_matches('/'),
            self.app
        )
    }

    pub fn beta_manifest_url(&self) -> String {
        format!(
            "{}/xversion-{}-market-beta.txt",
            self.version_base.trim_end_matches('/'),
            self.app
        )
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds.
    pub timeout: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            user_agent: concat!("Syn-Upd-Core/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Where the installed version comes from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstalledConfig {
    pub version: Option<String>,
    pub command: Vec<String>,
}

/// Optional external command, argv form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    pub command: Vec<String>,
}

/// Filesystem locations; unset entries resolve to platform defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    pub state_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl SynupdConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path, true),
            None => match default_config_path() {
                Some(path) => Self::load(&path, false),
                None => Ok(Self::default()),
            },
        }
    }

    fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(SynupdError::Config(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|err| {
            SynupdError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|err| SynupdError::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SynupdConfig =
            toml::from_str(text).map_err(|err| SynupdError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.check.interval_minutes < MIN_INTERVAL_MINUTES {
            return Err(SynupdError::Config(format!(
                "check.interval_minutes must be at least {MIN_INTERVAL_MINUTES}, got {}",
                self.check.interval_minutes
            )));
        }
        if self.http.timeout == 0 {
            return Err(SynupdError::Config("http.timeout must be positive".into()));
        }
        if self.endpoints.app.trim().is_empty() {
            return Err(SynupdError::Config("endpoints.app must not be empty".into()));
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.paths
            .state_file
            .clone()
            .unwrap_or_else(|| data_dir().join("state.json"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.paths.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.paths
            .log_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("logs"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}
