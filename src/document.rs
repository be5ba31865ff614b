//! Per-record field accumulator.

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use regex::Regex;
use serde::Serialize;

/// Resolved primary identifier.
pub const ID: &str = "id";
/// Alternate identifiers.
pub const SAME_AS: &str = "sameAs";
pub const PREFERRED: &str = "preferred";
pub const SYNONYMS: &str = "synonyms";
pub const RELATED: &str = "related";
pub const RELATED_IDS: &str = "relatedIds";
pub const SEE_ALSO: &str = "seeAlso";
pub const COORDINATES: &str = "coordinates";
pub const DDC: &str = "ddc";
pub const AUTHORITY_TYPE: &str = "authorityType";
pub const QUALITY_LEVEL: &str = "qualityLevel";
/// Set when the record only refers to the real entity.
pub const LOOK4ME: &str = "look4me";
/// Raw record markup.
pub const FULLRECORD: &str = "fullrecord";

/// Stored value of one document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unique(String),
    Multi(Vec<String>),
}

/// Fields accumulated for one record.
///
/// Unique fields hold at most one value; multi-valued fields hold an
/// ordered list without duplicates. Serializes as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn label(&self) -> &str {
        self.unique(ID).unwrap_or("<no id>")
    }

    /// Store `value` unless `field` already has a value. Returns whether it
    /// was stored.
    pub fn store_unique(&mut self, field: &str, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        if self.fields.contains_key(field) {
            warn!(
                "{}: ignoring second value \"{value}\" for unique field {field}",
                self.label()
            );
            return false;
        }
        trace!("{}: {field} = \"{value}\"", self.label());
        self.fields
            .insert(field.to_string(), FieldValue::Unique(value.to_string()));
        true
    }

    /// Overwrite `field` and return its previous value. When `archive` is
    /// given, a previous value that differs is kept there as a multi-valued
    /// entry.
    pub fn replace_unique(&mut self, field: &str, value: &str, archive: Option<&str>) -> Option<String> {
        if value.is_empty() {
            return None;
        }
        let previous = match self
            .fields
            .insert(field.to_string(), FieldValue::Unique(value.to_string()))
        {
            Some(FieldValue::Unique(previous)) => Some(previous),
            Some(FieldValue::Multi(values)) => {
                warn!("{value}: multi-valued field {field} replaced by a unique value");
                values.into_iter().next()
            }
            None => None,
        };
        if let Some(previous) = previous.as_deref().filter(|previous| *previous != value) {
            debug!("{value}: replaces {previous} in {field}");
            if let Some(archive) = archive {
                self.store_multi(archive, previous);
            }
        }
        previous
    }

    /// Append `value` to a multi-valued field unless already present.
    pub fn store_multi(&mut self, field: &str, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        let values = match self.fields.get_mut(field) {
            Some(FieldValue::Multi(values)) => values,
            Some(FieldValue::Unique(_)) => {
                warn!(
                    "{}: cannot append \"{value}\" to unique field {field}",
                    self.label()
                );
                return false;
            }
            None => {
                self.fields
                    .insert(field.to_string(), FieldValue::Multi(vec![value.to_string()]));
                return true;
            }
        };
        if values.iter().any(|existing| existing == value) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Like [`store_multi`](Self::store_multi), but silently skips values
    /// matched by `exclude`. The pattern is expected to be anchored.
    pub fn store_filtered(&mut self, field: &str, value: &str, exclude: &Regex) -> bool {
        if exclude.is_match(value) {
            trace!("{}: skip \"{value}\" for {field}", self.label());
            return false;
        }
        self.store_multi(field, value)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Value of a unique field.
    pub fn unique(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Unique(value)) => Some(value),
            _ => None,
        }
    }

    /// Values of a multi-valued field; empty when absent.
    pub fn multi(&self, field: &str) -> &[String] {
        match self.fields.get(field) {
            Some(FieldValue::Multi(values)) => values,
            _ => &[],
        }
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.unique(ID)
    }

    pub fn alternate_ids(&self) -> &[String] {
        self.multi(SAME_AS)
    }

    pub fn preferred(&self) -> Option<&str> {
        self.unique(PREFERRED)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
