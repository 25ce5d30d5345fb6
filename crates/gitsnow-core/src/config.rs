//! Configuration schema (gitsnow.toml)
//!
//! Built once at process start and passed by reference to every component that
//! formats, parses or connects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// File name looked up next to the scripts directory
pub const CONFIG_FILE_NAME: &str = "gitsnow.toml";

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// Snowflake SQL dialect
    #[default]
    Snowflake,

    /// PostgreSQL SQL dialect
    Postgres,

    /// Generic ANSI SQL
    Ansi,
}

/// Formatter options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Rewrite `CREATE [OR REPLACE] TABLE` to `CREATE OR ALTER TABLE` so tables are never replaced
    pub force_create_or_alter_table: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            force_create_or_alter_table: true,
        }
    }
}

/// Live catalog enumeration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Schemas never exported or diffed
    pub ignored_schemas: Vec<String>,

    /// Databases never enumerated
    pub ignored_databases: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ignored_schemas: vec!["INFORMATION_SCHEMA".to_string(), "PUBLIC".to_string()],
            ignored_databases: vec!["SNOWFLAKE".to_string()],
        }
    }
}

impl CatalogConfig {
    /// Check whether a schema is excluded (case-insensitive)
    pub fn is_schema_ignored(&self, schema: &str) -> bool {
        self.ignored_schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
    }

    /// Check whether a database is excluded (case-insensitive)
    pub fn is_database_ignored(&self, database: &str) -> bool {
        self.ignored_databases.iter().any(|d| d.eq_ignore_ascii_case(database))
    }
}

/// Generated script options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Tool name written in script headers
    pub header_tool_name: String,

    /// Stage holding the scripts directory; enables the staged-execution script
    pub stage: Option<String>,

    /// Objects excluded from deployment (glob patterns on `SCHEMA.NAME`)
    pub skip_objects: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            header_tool_name: "gitsnow".to_string(),
            stage: None,
            skip_objects: Vec::new(),
        }
    }
}

impl ScriptConfig {
    /// Check if an object should be skipped
    pub fn is_object_skipped(&self, object: &str) -> bool {
        self.skip_objects.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(&pattern.to_uppercase(), &object.to_uppercase())
            } else {
                pattern.eq_ignore_ascii_case(object)
            }
        })
    }
}

/// Lineage trace options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum number of hops followed from the traced column
    pub max_depth: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { max_depth: 10 }
    }
}

/// Warehouse connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Warehouse type (snowflake, mock)
    #[serde(rename = "type")]
    pub warehouse_type: String,

    /// Connection settings (warehouse-specific)
    #[serde(flatten)]
    pub settings: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            warehouse_type: "snowflake".to_string(),
            settings: HashMap::new(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQL dialect
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Formatter options
    #[serde(default)]
    pub format: FormatConfig,

    /// Catalog enumeration options
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Script generation options
    #[serde(default)]
    pub scripts: ScriptConfig,

    /// Lineage trace options
    #[serde(default)]
    pub trace: TraceConfig,

    /// Warehouse connection
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,

    /// Directory the config was loaded from
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Find `gitsnow.toml` next to the scripts directory (in its parent), or fall back to defaults
    pub fn discover(scripts_dir: &std::path::Path) -> Result<Self, ConfigError> {
        let candidate = scripts_dir
            .parent()
            .map(|p| p.join(CONFIG_FILE_NAME))
            .filter(|p| p.exists());

        match candidate {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Simple glob matching (single `*` wildcard)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }

    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];

        text.len() >= prefix.len() + suffix.len() && text.starts_with(prefix) && text.ends_with(suffix)
    } else {
        pattern == text
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
