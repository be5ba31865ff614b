//! Resolution of references to other authority records.

use std::collections::HashMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The parts of another authority record a referring record needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub id: String,
    pub preferred: String,
}

/// Looks up authority records by identifier.
///
/// Shared by all workers, so implementations must be thread-safe.
pub trait AuthorityLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<AuthorityRecord>;
}

/// Lookup backed by a map, typically filled from an earlier run.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLookup {
    records: HashMap<String, AuthorityRecord>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, preferred: impl Into<String>) {
        let id = id.into();
        let record = AuthorityRecord {
            id: id.clone(),
            preferred: preferred.into(),
        };
        self.records.insert(id, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load records from a stream of JSON objects, such as the output of an
    /// earlier run. Only `id` and `preferred` are read from each object.
    pub fn from_json_lines<R: Read>(reader: R) -> Result<Self, ConfigError> {
        serde_json::Deserializer::from_reader(reader)
            .into_iter::<AuthorityRecord>()
            .map(|record| record.map_err(ConfigError::from))
            .collect()
    }
}

impl FromIterator<AuthorityRecord> for InMemoryLookup {
    fn from_iter<I: IntoIterator<Item = AuthorityRecord>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        }
    }
}

impl AuthorityLookup for InMemoryLookup {
    fn lookup(&self, id: &str) -> Option<AuthorityRecord> {
        self.records.get(id).cloned()
    }
}
