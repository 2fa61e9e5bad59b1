//! Configuration management.
//!
//! Settings come from three places, later ones winning:
//! 1. Built-in defaults (`primary` `SQLite` level in front of a `cache` memory level)
//! 2. A TOML file (`--config`, or `<config dir>/storechain/config.toml`)
//! 3. `STORECHAIN_*` environment variables
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `STORECHAIN_DATA_DIR` | directory relative `SQLite` paths resolve against |
//! | `STORECHAIN_LOG_LEVEL` | `logging.level` |
//! | `STORECHAIN_LOG_FORMAT` | `logging.format` (`pretty` or `json`) |
//! | `STORECHAIN_LOG_FILE` | `logging.file` |

use crate::models::Document;
use crate::observability::{LogFormat, LoggingConfig};
use crate::storage::{Backend, InMemoryBackend, SqliteBackend};
use crate::store::Store;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default `SQLite` table name.
pub const DEFAULT_TABLE: &str = "records";

/// Which backend a level uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// [`InMemoryBackend`]; contents last as long as the process.
    #[default]
    Memory,
    /// [`SqliteBackend`] on a database file.
    Sqlite,
}

impl BackendKind {
    /// Returns the name used in configuration files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

/// One level of the chain. Level 0 is listed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Level name, used in logs and metrics.
    pub name: String,
    /// Backend kind.
    #[serde(default)]
    pub backend: BackendKind,
    /// Database file for `sqlite` levels; relative paths resolve against
    /// the data directory. Defaults to `<name>.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Table for `sqlite` levels.
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

impl LevelConfig {
    /// Creates an in-memory level.
    #[must_use]
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: BackendKind::Memory,
            path: None,
            table: default_table(),
        }
    }

    /// Creates a `SQLite` level.
    #[must_use]
    pub fn sqlite(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            backend: BackendKind::Sqlite,
            path: Some(path.into()),
            table: default_table(),
        }
    }
}

/// Configuration file structure (all fields optional).
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<String>,
    logging: Option<LoggingFile>,
    levels: Option<Vec<LevelConfig>>,
}

/// `[logging]` section.
#[derive(Debug, Default, Deserialize)]
struct LoggingFile {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChainConfig {
    /// Directory relative `SQLite` paths resolve against.
    pub data_dir: PathBuf,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Chain levels, level 0 first.
    pub levels: Vec<LevelConfig>,
}

impl Default for StoreChainConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            logging: LoggingConfig::default(),
            levels: vec![
                LevelConfig::sqlite("primary", "primary.db"),
                LevelConfig::memory("cache"),
            ],
        }
    }
}

/// Returns the platform data directory for storechain.
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".storechain"),
        |dirs| dirs.data_local_dir().join("storechain"),
    )
}

impl StoreChainConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or holds an unknown
    /// log format.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Returns default configuration if no config file is found or it
    /// cannot be loaded.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let path = base_dirs.config_dir().join("storechain").join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Loads `path` if given, otherwise the default location, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides())
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            if let Some(format) = logging.format {
                config.logging.format = format.parse()?;
            }
            config.logging.file = logging.file.map(PathBuf::from);
        }
        if let Some(levels) = file.levels {
            config.levels = levels;
        }

        Ok(config)
    }

    /// Applies `STORECHAIN_*` environment variables.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("STORECHAIN_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("STORECHAIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("STORECHAIN_LOG_FORMAT")
            && let Ok(parsed) = format.parse::<LogFormat>()
        {
            self.logging.format = parsed;
        }
        if let Some(file) = lookup("STORECHAIN_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Replaces the chain levels.
    #[must_use]
    pub fn with_levels(mut self, levels: Vec<LevelConfig>) -> Self {
        self.levels = levels;
        self
    }

    /// Returns the database file for a `sqlite` level.
    #[must_use]
    pub fn database_path(&self, level: &LevelConfig) -> PathBuf {
        let path = level
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.db", level.name)));
        if path.is_absolute() {
            path
        } else {
            self.data_dir.join(path)
        }
    }

    /// Checks that at least one level exists and names are unique.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(Error::InvalidInput(
                "at least one level must be configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for level in &self.levels {
            if level.name.trim().is_empty() {
                return Err(Error::InvalidInput("level names must not be empty".to_string()));
            }
            if !seen.insert(level.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate level name: {}",
                    level.name
                )));
            }
        }
        Ok(())
    }

    /// Opens every backend and links the levels, returning level 0.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or a backend cannot be opened.
    pub fn build_chain(&self) -> Result<Arc<Store<Document>>> {
        self.validate()?;

        let mut chain: Option<Arc<Store<Document>>> = None;
        for level in self.levels.iter().rev() {
            let store = Store::from_shared(level.name.clone(), self.open_backend(level)?);
            let store = match chain.take() {
                Some(next) => store.link_to(next),
                None => store,
            };
            tracing::debug!(level = %level.name, backend = level.backend.as_str(), "opened level");
            chain = Some(Arc::new(store));
        }

        chain.ok_or_else(|| Error::InvalidInput("at least one level must be configured".to_string()))
    }

    fn open_backend(&self, level: &LevelConfig) -> Result<Arc<dyn Backend<Document>>> {
        let backend: Arc<dyn Backend<Document>> = match level.backend {
            BackendKind::Memory => Arc::new(InMemoryBackend::<Document>::new()),
            BackendKind::Sqlite => Arc::new(SqliteBackend::<Document>::open(
                self.database_path(level),
                level.table.clone(),
            )?),
        };
        Ok(backend)
    }
}
