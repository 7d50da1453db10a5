//! Destination identifiers.
//!
//! A [`DestinationKey`] names the table a row belongs to. Writers fan a
//! destination out over several [`ShardedKey`]s, and the load stages resolve it
//! to a [`TableRef`] when talking to the table store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// Identifier of a target table, resolved per row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationKey(String);

impl DestinationKey {
    pub fn new(table: impl Into<String>) -> Self {
        Self(table.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reproducible digest of the destination, used inside job ids.
    ///
    /// # Examples
    ///
    /// ```
    /// use drift::destination::DestinationKey;
    ///
    /// let key = DestinationKey::new("dataset.events");
    /// assert_eq!(key.digest(), DestinationKey::new("dataset.events").digest());
    /// assert_ne!(key.digest(), DestinationKey::new("dataset.users").digest());
    /// assert_eq!(key.digest().len(), 32);
    /// ```
    pub fn digest(&self) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.0.as_bytes())
            .simple()
            .to_string()
    }

    /// Resolve to a table reference.
    pub fn table(&self) -> Result<TableRef, StoreError> {
        self.0.parse()
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DestinationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A destination plus the shard its rows are written under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardedKey {
    pub destination: DestinationKey,
    pub shard: u32,
}

impl ShardedKey {
    pub fn new(destination: DestinationKey, shard: u32) -> Self {
        Self { destination, shard }
    }
}

impl fmt::Display for ShardedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.destination, self.shard)
    }
}

/// Fully parsed table name: `[project:]dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// A sibling table in the same project and dataset.
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.into(),
        }
    }
}

impl FromStr for TableRef {
    type Err = StoreError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidTable {
            spec: spec.to_string(),
        };

        let (project, rest) = match spec.split_once(':') {
            Some((project, rest)) if !project.is_empty() => (Some(project.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, spec),
        };
        let (dataset, table) = rest.split_once('.').ok_or_else(invalid)?;
        if dataset.is_empty() || table.is_empty() || table.contains(['.', ':']) {
            return Err(invalid());
        }

        Ok(Self {
            project,
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{project}:")?;
        }
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_ref() {
        let table: TableRef = "proj:dataset.events".parse().unwrap();
        assert_eq!(table.project.as_deref(), Some("proj"));
        assert_eq!(table.dataset, "dataset");
        assert_eq!(table.table, "events");
        assert_eq!(table.to_string(), "proj:dataset.events");

        let table: TableRef = "dataset.events".parse().unwrap();
        assert_eq!(table.project, None);
        assert_eq!(table.to_string(), "dataset.events");
    }

    #[test]
    fn test_parse_table_ref_rejects_malformed() {
        for spec in ["events", ":dataset.events", "dataset.", ".events", "a.b.c"] {
            assert!(spec.parse::<TableRef>().is_err(), "{spec} should not parse");
        }
    }

    #[test]
    fn test_sibling_keeps_dataset() {
        let table: TableRef = "proj:dataset.events".parse().unwrap();
        let temp = table.sibling("tmp_events");
        assert_eq!(temp.to_string(), "proj:dataset.tmp_events");
    }

    #[test]
    fn test_sharded_key_display() {
        let key = ShardedKey::new(DestinationKey::new("dataset.events"), 7);
        assert_eq!(key.to_string(), "dataset.events#7");
    }
}
