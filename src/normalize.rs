//! Cleanup of raw metadata-store query results.
//!
//! Query rows arrive keyed by `<namespace>.<field>` with every value wrapped in a list.
//! Normalization strips the namespace, unwraps singleton lists and drops the store's own
//! bookkeeping properties.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrackerError;

/// Namespaces the query service prefixes field names with.
pub const NAMESPACES: &[&str] = &["entity", "file", "folder", "project", "data"];

/// Properties maintained by the store itself rather than by uploaders.
pub const BOOKKEEPING_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "modifiedOn",
    "modifiedByPrincipalId",
    "createdOn",
    "createdByPrincipalId",
    "versionLabel",
    "versionComment",
    "versionNumber",
    "nodeType",
    "concreteType",
    "benefactorId",
    "parentId",
    "eTag",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(BTreeMap<String, Value>);

impl RawRecord {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(BTreeMap<String, Value>);

impl NormalizedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Text view of a scalar field. Lists and nulls have none.
    pub fn get_str(&self, key: &str) -> Option<String> {
        scalar_text(self.0.get(key)?)
    }

    /// Every text value of a field, whether it holds a scalar or a list.
    pub fn get_strs(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(value) => scalar_text(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for NormalizedRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Retain set used when building reconciliation batches.
pub fn default_retain() -> BTreeSet<String> {
    ["id", "name"].into_iter().map(str::to_string).collect()
}

pub fn normalize_records(
    records: &[RawRecord],
    retain: &BTreeSet<String>,
) -> Result<Vec<NormalizedRecord>, TrackerError> {
    records
        .iter()
        .map(|record| normalize_record(record, retain))
        .collect()
}

pub fn normalize_record(
    record: &RawRecord,
    retain: &BTreeSet<String>,
) -> Result<NormalizedRecord, TrackerError> {
    let mut fields = BTreeMap::new();
    for (key, value) in record.fields() {
        let field = strip_namespace(key)?;
        if BOOKKEEPING_FIELDS.contains(&field) && !retain.contains(field) {
            continue;
        }
        fields.insert(field.to_string(), unlist_singleton(value.clone()));
    }
    Ok(NormalizedRecord(fields))
}

pub fn strip_namespace(key: &str) -> Result<&str, TrackerError> {
    match key.split_once('.') {
        Some((namespace, field)) if NAMESPACES.contains(&namespace) && !field.is_empty() => {
            Ok(field)
        }
        _ => Err(TrackerError::MalformedField(key.to_string())),
    }
}

/// Collapses length-1 lists, including nested ones, to their element.
pub fn unlist_singleton(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => unlist_singleton(items.remove(0)),
        other => other,
    }
}
