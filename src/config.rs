//! Configuration for schema-forge
//!
//! Layered, later sources win:
//! - Default values
//! - Config file (schema-forge.toml, .schema-forge.toml, config/schema-forge.toml)
//! - User config directory
//! - An explicit file passed on the command line
//! - Environment variables (SCHEMA_FORGE__*)
//!
//! ## Example config file (schema-forge.toml):
//! ```toml
//! [database]
//! path = "./schema-forge.db"
//!
//! [migration]
//! ledger_table = "_schema_migrations"
//!
//! [types]
//! text = "CLOB"
//! json = "TEXT"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::sqlite::DEFAULT_LEDGER_TABLE;
use crate::types::{LogicalType, TypeResolver};

const CONFIG_FILE: &str = "schema-forge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    /// Physical type name overrides keyed by logical type name
    #[serde(default)]
    pub types: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding both the entity tables and the schema records
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Table recording applied migration unit ids
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("schema-forge.db")
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            ledger_table: default_ledger_table(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, adding `config_path` as a required source
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        for location in ["schema-forge", ".schema-forge", "config/schema-forge"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "schema-forge", "schema-forge") {
            let user_config = dirs.config_dir().join(CONFIG_FILE);
            if user_config.exists() {
                builder = builder.add_source(File::from(user_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_FORGE")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SchemaError::Storage(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Database path, relative paths resolved against the working directory
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.database.path)
        }
    }

    /// Type resolver with the configured overrides
    pub fn resolver(&self) -> Result<TypeResolver> {
        let overrides = self
            .types
            .iter()
            .map(|(name, physical)| {
                let logical = name
                    .parse::<LogicalType>()
                    .map_err(|e| SchemaError::InvalidSchema(format!("[types] {e}")))?;
                Ok((logical, physical.clone()))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(TypeResolver::with_overrides(overrides))
    }
}
