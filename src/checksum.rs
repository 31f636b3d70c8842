//! Checksum utilities for documents and change lists

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::Change;
use crate::document::SchemaDocument;

/// SHA256 checksum of serialized content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Checksum of a serializable value's JSON form.
    ///
    /// Struct fields serialize in declaration order, so equal values always
    /// produce equal checksums.
    pub fn of<T: Serialize>(value: &T) -> Self {
        let canonical = serde_json::to_vec(value).unwrap_or_default();
        Self::from_bytes(&canonical)
    }

    pub fn of_document(document: &SchemaDocument) -> Self {
        Self::of(document)
    }

    pub fn of_changes(changes: &[Change]) -> Self {
        Self::of(&changes)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_column(name: &str) -> Change {
        Change::DropColumn {
            column: name.to_string(),
        }
    }

    #[test]
    fn test_change_checksum_consistency() {
        let a = Checksum::of_changes(&[drop_column("legacy")]);
        let b = Checksum::of_changes(&[drop_column("legacy")]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_change_checksum_is_order_sensitive() {
        let a = Checksum::of_changes(&[drop_column("a"), drop_column("b")]);
        let b = Checksum::of_changes(&[drop_column("b"), drop_column("a")]);
        assert_ne!(a, b);
    }
}
