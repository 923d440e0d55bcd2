//! Entity set name resolution
//!
//! With `use_entity_names` enabled, callers address tables by their logical
//! name (`account`) and the client swaps in the entity set name
//! (`accounts`) before building the URL. Lookups go through
//! `EntityDefinitions` once per name and are cached for the lifetime of the
//! client and its children.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::api::operations::{Collection, MetadataOperation, Operation};
use crate::api::query::QueryOptions;
use crate::api::query::keys::validate_segment;
use crate::api::error::Result;

/// Logical name -> entity set name
#[derive(Debug, Default)]
pub struct EntitySetCache {
    entries: RwLock<HashMap<String, String>>,
}

impl EntitySetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, logical_name: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&logical_name.to_lowercase())
            .cloned()
    }

    pub fn insert(&self, logical_name: &str, entity_set: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(logical_name.to_lowercase(), entity_set.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Metadata query that finds the entity set of `logical_name`
pub fn entity_set_lookup(logical_name: &str) -> Result<Operation> {
    validate_segment(logical_name, "resolve_entity_set", "collection")?;
    Ok(Operation::Metadata(MetadataOperation::RetrieveEntities {
        query: QueryOptions::new()
            .select(&["EntitySetName", "LogicalName"])
            .filter(format!("LogicalName eq '{}'", logical_name.to_lowercase())),
    }))
}

/// Picks the entity set out of a lookup response
pub fn entity_set_from(collection: &Collection, logical_name: &str) -> Option<String> {
    collection
        .value
        .iter()
        .find(|definition| {
            definition
                .get("LogicalName")
                .and_then(Value::as_str)
                .is_none_or(|name| name.eq_ignore_ascii_case(logical_name))
        })
        .and_then(|definition| definition.get("EntitySetName"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
