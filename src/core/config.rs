//! Installer configuration
//!
//! Read from TOML. Lookup order: explicit path, `$SHED_INSTALLER_CONFIG`,
//! `<config_dir>/toolshed-installer/config.toml`, then built-in defaults.
//! `TOOL_DEPENDENCY_DIR` and `SHED_TOOL_PATH` override the file.

use crate::core::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const CONFIG_ENV: &str = "SHED_INSTALLER_CONFIG";

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigToml {
    tool_dependency_dir: Option<PathBuf>,
    tool_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    shed_tool_conf: Option<String>,
    migrated_tools_config: Option<String>,
    manage_dependency_relationships: Option<bool>,
    http_timeout_secs: Option<u64>,
    platform: Option<PlatformToml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PlatformToml {
    os: Option<String>,
    architecture: Option<String>,
}

/// Resolved installer settings.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Root of all tool dependency installations. Installing tool
    /// dependencies is refused when unset.
    pub tool_dependency_dir: Option<PathBuf>,
    /// Where repositories are cloned.
    pub tool_path: PathBuf,
    /// Where installation status is persisted.
    pub state_dir: PathBuf,
    pub shed_tool_conf: Option<String>,
    pub migrated_tools_config: Option<String>,
    pub manage_dependency_relationships: bool,
    pub http_timeout: Duration,
    pub os_override: Option<String>,
    pub architecture_override: Option<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolshed-installer");
        Self {
            tool_dependency_dir: None,
            tool_path: data.join("shed_tools"),
            state_dir: data.join("state"),
            shed_tool_conf: None,
            migrated_tools_config: None,
            manage_dependency_relationships: false,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            os_override: None,
            architecture_override: None,
        }
    }
}

impl InstallerConfig {
    /// Load configuration, falling back to defaults when no file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| {
                dirs::config_dir().map(|d| d.join("toolshed-installer").join("config.toml"))
            });

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if explicit.is_some() => {
                return Err(ConfigError::InvalidConfigFile {
                    path,
                    message: "file does not exist".into(),
                });
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a single TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|message| ConfigError::InvalidConfigFile {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let parsed: ConfigToml = toml::from_str(text).map_err(|e| e.to_string())?;
        let mut config = Self::default();
        config.merge(parsed);
        Ok(config)
    }

    fn merge(&mut self, other: ConfigToml) {
        if other.tool_dependency_dir.is_some() {
            self.tool_dependency_dir = other.tool_dependency_dir;
        }
        if let Some(tool_path) = other.tool_path {
            self.tool_path = tool_path;
        }
        if let Some(state_dir) = other.state_dir {
            self.state_dir = state_dir;
        }
        if other.shed_tool_conf.is_some() {
            self.shed_tool_conf = other.shed_tool_conf;
        }
        if other.migrated_tools_config.is_some() {
            self.migrated_tools_config = other.migrated_tools_config;
        }
        if let Some(manage) = other.manage_dependency_relationships {
            self.manage_dependency_relationships = manage;
        }
        if let Some(secs) = other.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(platform) = other.platform {
            if platform.os.is_some() {
                self.os_override = platform.os;
            }
            if platform.architecture.is_some() {
                self.architecture_override = platform.architecture;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("TOOL_DEPENDENCY_DIR") {
            self.tool_dependency_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = std::env::var_os("SHED_TOOL_PATH") {
            self.tool_path = PathBuf::from(dir);
        }
    }

    /// The dependency root, or the configuration error that forbids
    /// installing tool dependencies.
    pub fn require_tool_dependency_dir(&self) -> Result<&Path, ConfigError> {
        self.tool_dependency_dir
            .as_deref()
            .ok_or(ConfigError::ToolDependencyDirNotSet)
    }
}
