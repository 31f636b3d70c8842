//! Logical-to-physical column type resolution

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_STRING_LENGTH: u32 = 255;
const DEFAULT_DECIMAL_PRECISION: u32 = 10;
const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// Logical type of a field as chosen by an editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    #[serde(alias = "varchar")]
    String,
    Text,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "bigint")]
    Long,
    Decimal,
    #[serde(alias = "float")]
    Double,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    Datetime,
    Json,
}

impl LogicalType {
    pub const ALL: [LogicalType; 10] = [
        LogicalType::String,
        LogicalType::Text,
        LogicalType::Integer,
        LogicalType::Long,
        LogicalType::Decimal,
        LogicalType::Double,
        LogicalType::Boolean,
        LogicalType::Date,
        LogicalType::Datetime,
        LogicalType::Json,
    ];

    /// Canonical lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Text => "text",
            LogicalType::Integer => "integer",
            LogicalType::Long => "long",
            LogicalType::Decimal => "decimal",
            LogicalType::Double => "double",
            LogicalType::Boolean => "boolean",
            LogicalType::Date => "date",
            LogicalType::Datetime => "datetime",
            LogicalType::Json => "json",
        }
    }

    fn base_physical(&self) -> &'static str {
        match self {
            LogicalType::String => "VARCHAR",
            LogicalType::Text => "TEXT",
            LogicalType::Integer => "INTEGER",
            LogicalType::Long => "BIGINT",
            LogicalType::Decimal => "DECIMAL",
            LogicalType::Double => "DOUBLE",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Date => "DATE",
            LogicalType::Datetime => "TIMESTAMP",
            LogicalType::Json => "JSON",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "varchar" => Ok(LogicalType::String),
            "text" => Ok(LogicalType::Text),
            "integer" | "int" => Ok(LogicalType::Integer),
            "long" | "bigint" => Ok(LogicalType::Long),
            "decimal" => Ok(LogicalType::Decimal),
            "double" | "float" => Ok(LogicalType::Double),
            "boolean" | "bool" => Ok(LogicalType::Boolean),
            "date" => Ok(LogicalType::Date),
            "datetime" | "timestamp" => Ok(LogicalType::Datetime),
            "json" => Ok(LogicalType::Json),
            other => Err(format!("unknown logical type '{other}'")),
        }
    }
}

/// Maps a logical type plus length/scale to a physical column type string.
///
/// Pure lookup; the only state is the override table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TypeResolver {
    overrides: HashMap<LogicalType, String>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver whose base names are replaced by `overrides`
    pub fn with_overrides(overrides: HashMap<LogicalType, String>) -> Self {
        Self { overrides }
    }

    /// Resolve the physical type, e.g. `("decimal", 10, 2)` -> `DECIMAL(10,2)`
    pub fn resolve(&self, logical: LogicalType, length: Option<u32>, scale: Option<u32>) -> String {
        let base = self
            .overrides
            .get(&logical)
            .map(String::as_str)
            .unwrap_or_else(|| logical.base_physical());

        match logical {
            LogicalType::String => {
                format!("{}({})", base, length.unwrap_or(DEFAULT_STRING_LENGTH))
            }
            LogicalType::Decimal => format!(
                "{}({},{})",
                base,
                length.unwrap_or(DEFAULT_DECIMAL_PRECISION),
                scale.unwrap_or(DEFAULT_DECIMAL_SCALE)
            ),
            _ => base.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let resolver = TypeResolver::new();
        assert_eq!(resolver.resolve(LogicalType::String, Some(64), None), "VARCHAR(64)");
        assert_eq!(resolver.resolve(LogicalType::String, None, None), "VARCHAR(255)");
        assert_eq!(resolver.resolve(LogicalType::Decimal, Some(10), Some(2)), "DECIMAL(10,2)");
        assert_eq!(resolver.resolve(LogicalType::Decimal, Some(12), None), "DECIMAL(12,2)");
        assert_eq!(resolver.resolve(LogicalType::Long, Some(20), None), "BIGINT");
        assert_eq!(resolver.resolve(LogicalType::Datetime, None, None), "TIMESTAMP");
    }

    #[test]
    fn test_overrides_keep_length_suffix() {
        let mut overrides = HashMap::new();
        overrides.insert(LogicalType::String, "NVARCHAR".to_string());
        overrides.insert(LogicalType::Text, "CLOB".to_string());
        let resolver = TypeResolver::with_overrides(overrides);

        assert_eq!(resolver.resolve(LogicalType::String, Some(32), None), "NVARCHAR(32)");
        assert_eq!(resolver.resolve(LogicalType::Text, None, None), "CLOB");
        assert_eq!(resolver.resolve(LogicalType::Integer, None, None), "INTEGER");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("varchar".parse::<LogicalType>().unwrap(), LogicalType::String);
        assert_eq!("BIGINT".parse::<LogicalType>().unwrap(), LogicalType::Long);
        assert_eq!("timestamp".parse::<LogicalType>().unwrap(), LogicalType::Datetime);
        assert!("blob".parse::<LogicalType>().is_err());

        let parsed: LogicalType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(parsed, LogicalType::Integer);
    }
}
