//! Core Operation types for Dynamics 365 Web API calls
//!
//! Each [`Operation`] variant carries only the fields its URL and body need.
//! Header-level knobs that apply to every call live in [`RequestOptions`];
//! a [`Request`] pairs the two.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::query::QueryOptions;

/// Represents a single operation that can be executed against Dynamics 365
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Retrieve one record, a navigation property of it, or a `$ref`
    Retrieve {
        /// Entity set name (e.g., "contacts", "accounts")
        collection: String,
        /// GUID or alternate key; may be omitted for singleton-like paths
        key: Option<String>,
        query: QueryOptions,
    },
    /// Retrieve one page of records
    RetrieveMultiple {
        collection: String,
        query: QueryOptions,
        /// Absolute `@odata.nextLink` / `@odata.deltaLink` to resume from
        continuation: Option<String>,
    },
    /// Count records; `GET collection/$count` when there is no filter
    Count {
        collection: String,
        filter: Option<String>,
    },
    /// Create a new record
    Create {
        collection: String,
        /// Record data as JSON
        data: Value,
        /// `$select`/`$expand` applied to the returned representation
        query: QueryOptions,
    },
    /// Update an existing record
    Update {
        collection: String,
        key: String,
        data: Value,
        query: QueryOptions,
    },
    /// Set a single property with `PUT collection(key)/field`
    UpdateSingleProperty {
        collection: String,
        key: String,
        field: String,
        value: Value,
        query: QueryOptions,
    },
    /// Create or update depending on whether the key matches a record
    Upsert {
        collection: String,
        /// GUID or alternate key (e.g. `emailaddress1='a@b.c'`)
        key: String,
        data: Value,
        query: QueryOptions,
    },
    /// Delete a record, or clear one of its properties when `field` is set
    Delete {
        collection: String,
        key: String,
        field: Option<String>,
    },
    /// Associate records via collection-valued navigation property
    /// POST /entities(id)/relationship/$ref with body {"@odata.id": "target"}
    Associate {
        collection: String,
        /// Record ID or Content-ID reference (e.g., "guid" or "$1")
        primary_key: String,
        relationship: String,
        related_collection: String,
        /// Record ID or Content-ID reference
        related_key: String,
    },
    /// Remove an N:N or 1:N association
    /// DELETE /entities(id)/relationship(target_id)/$ref
    Disassociate {
        collection: String,
        primary_key: String,
        relationship: String,
        related_key: String,
    },
    /// Set a single-valued navigation property
    /// PUT /entities(id)/navigation_property/$ref
    AssociateSingleValued {
        collection: String,
        primary_key: String,
        navigation_property: String,
        related_collection: String,
        related_key: String,
    },
    /// Clear a single-valued navigation property
    DisassociateSingleValued {
        collection: String,
        primary_key: String,
        navigation_property: String,
    },
    /// Call an OData function, bound when `collection` is set
    CallFunction {
        name: String,
        parameters: Map<String, Value>,
        collection: Option<String>,
        key: Option<String>,
        query: QueryOptions,
    },
    /// Call an OData action, bound when `collection` is set
    CallAction {
        name: String,
        data: Option<Value>,
        collection: Option<String>,
        key: Option<String>,
    },
    /// Execute a FetchXML query, one page at a time
    FetchXml {
        collection: String,
        fetch_xml: String,
        /// Defaults to 1
        page_number: Option<u32>,
        /// XML-escaped cookie from the previous page
        paging_cookie: Option<String>,
    },
    /// Schema/metadata operation
    Metadata(MetadataOperation),
}

/// Operations against the metadata endpoints
///
/// Keys are metadata ids or alternate keys such as `LogicalName='account'`.
/// `cast_type` selects a derived metadata type, e.g. `PicklistAttributeMetadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataOperation {
    /// POST /EntityDefinitions
    CreateEntity { data: Value },
    /// PUT /EntityDefinitions(MetadataId), id taken from `data.MetadataId`
    UpdateEntity { data: Value },
    RetrieveEntity { key: String, query: QueryOptions },
    RetrieveEntities { query: QueryOptions },
    /// POST /EntityDefinitions({entity_key})/Attributes
    CreateAttribute { entity_key: String, data: Value },
    /// PUT /EntityDefinitions({entity_key})/Attributes(MetadataId)
    /// Schema updates use PUT, not PATCH
    UpdateAttribute {
        entity_key: String,
        data: Value,
        cast_type: Option<String>,
    },
    DeleteAttribute {
        entity_key: String,
        attribute_key: String,
    },
    RetrieveAttribute {
        entity_key: String,
        attribute_key: String,
        cast_type: Option<String>,
        query: QueryOptions,
    },
    RetrieveAttributes {
        entity_key: String,
        cast_type: Option<String>,
        query: QueryOptions,
    },
    CreateRelationship { data: Value },
    UpdateRelationship {
        data: Value,
        cast_type: Option<String>,
    },
    DeleteRelationship { key: String },
    RetrieveRelationship {
        key: String,
        cast_type: Option<String>,
        query: QueryOptions,
    },
    RetrieveRelationships {
        cast_type: Option<String>,
        query: QueryOptions,
    },
    CreateGlobalOptionSet { data: Value },
    UpdateGlobalOptionSet { data: Value },
    DeleteGlobalOptionSet { key: String },
    RetrieveGlobalOptionSet {
        key: String,
        cast_type: Option<String>,
        query: QueryOptions,
    },
    RetrieveGlobalOptionSets {
        cast_type: Option<String>,
        query: QueryOptions,
    },
    /// GET /$metadata as CSDL XML
    RetrieveCsdl { include_annotations: bool },
}

/// Header-level options shared by every operation.
///
/// Unset options fall back to the client [`Config`](crate::api::Config).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// `MSCRMCallerID` (systemuserid GUID)
    pub impersonate: Option<String>,
    /// `CallerObjectId` (Azure AD object id GUID)
    pub impersonate_aad: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub return_representation: Option<bool>,
    pub include_annotations: Option<String>,
    pub max_page_size: Option<u32>,
    pub track_changes: bool,
    pub continue_on_error: bool,
    /// Raw Prefer directives, merged into the structured fields above
    pub prefer: Vec<String>,
    /// Bearer token used verbatim instead of asking the token provider
    pub token: Option<String>,
    /// Content-ID inside a batch change set
    pub content_id: Option<String>,
    /// Set to `false` to keep a write out of the batch change set
    pub in_change_set: Option<bool>,
    pub duplicate_detection: bool,
    pub bypass_custom_plugin_execution: bool,
    pub no_cache: bool,
    pub merge_labels: Option<bool>,
    pub solution_unique_name: Option<String>,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

/// An operation plus its options
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<Operation> for Request {
    fn from(operation: Operation) -> Self {
        Request::new(operation)
    }
}

impl Operation {
    /// Create a new Retrieve operation
    pub fn retrieve(collection: impl Into<String>, key: impl Into<String>, query: QueryOptions) -> Self {
        Self::Retrieve {
            collection: collection.into(),
            key: Some(key.into()),
            query,
        }
    }

    /// Create a new RetrieveMultiple operation
    pub fn retrieve_multiple(collection: impl Into<String>, query: QueryOptions) -> Self {
        Self::RetrieveMultiple {
            collection: collection.into(),
            query,
            continuation: None,
        }
    }

    /// Create a new Create operation
    pub fn create(collection: impl Into<String>, data: Value) -> Self {
        Self::Create {
            collection: collection.into(),
            data,
            query: QueryOptions::default(),
        }
    }

    /// Create a record with references to previous operations in a batch.
    /// Uses $<content-id> syntax, e.g. {"parentcustomerid_account@odata.bind": "$1"}
    pub fn create_with_refs(
        collection: impl Into<String>,
        data: Value,
        content_id_refs: HashMap<String, String>,
    ) -> Self {
        let mut data = data;
        if let Value::Object(map) = &mut data {
            for (field, reference) in content_id_refs {
                map.insert(field, Value::String(reference));
            }
        }
        Self::create(collection, data)
    }

    /// Create a new Update operation
    pub fn update(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self::Update {
            collection: collection.into(),
            key: key.into(),
            data,
            query: QueryOptions::default(),
        }
    }

    /// Create a new Upsert operation
    pub fn upsert(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self::Upsert {
            collection: collection.into(),
            key: key.into(),
            data,
            query: QueryOptions::default(),
        }
    }

    /// Create a new Delete operation
    pub fn delete(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.into(),
            key: key.into(),
            field: None,
        }
    }

    /// Create a new Associate operation
    pub fn associate(
        collection: impl Into<String>,
        primary_key: impl Into<String>,
        relationship: impl Into<String>,
        related_collection: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self::Associate {
            collection: collection.into(),
            primary_key: primary_key.into(),
            relationship: relationship.into(),
            related_collection: related_collection.into(),
            related_key: related_key.into(),
        }
    }

    /// Create a new Disassociate operation
    pub fn disassociate(
        collection: impl Into<String>,
        primary_key: impl Into<String>,
        relationship: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self::Disassociate {
            collection: collection.into(),
            primary_key: primary_key.into(),
            relationship: relationship.into(),
            related_key: related_key.into(),
        }
    }

    /// Create an unbound function call
    pub fn function(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self::CallFunction {
            name: name.into(),
            parameters,
            collection: None,
            key: None,
            query: QueryOptions::default(),
        }
    }

    /// Create an unbound action call
    pub fn action(name: impl Into<String>, data: Option<Value>) -> Self {
        Self::CallAction {
            name: name.into(),
            data,
            collection: None,
            key: None,
        }
    }

    /// Create a new FetchXml operation for the first page
    pub fn fetch_xml(collection: impl Into<String>, fetch_xml: impl Into<String>) -> Self {
        Self::FetchXml {
            collection: collection.into(),
            fetch_xml: fetch_xml.into(),
            page_number: None,
            paging_cookie: None,
        }
    }

    /// Get the HTTP method for this operation
    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Retrieve { .. } => "GET",
            Self::RetrieveMultiple { .. } => "GET",
            Self::Count { .. } => "GET",
            Self::Create { .. } => "POST",
            Self::Update { .. } => "PATCH",
            Self::UpdateSingleProperty { .. } => "PUT",
            Self::Upsert { .. } => "PATCH", // Upsert uses PATCH with specific headers
            Self::Delete { .. } => "DELETE",
            Self::Associate { .. } => "POST",
            Self::Disassociate { .. } => "DELETE",
            Self::AssociateSingleValued { .. } => "PUT",
            Self::DisassociateSingleValued { .. } => "DELETE",
            Self::CallFunction { .. } => "GET",
            Self::CallAction { .. } => "POST",
            Self::FetchXml { .. } => "GET",
            Self::Metadata(op) => op.http_method(),
        }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Retrieve { .. } => "retrieve",
            Self::RetrieveMultiple { .. } => "retrieve_multiple",
            Self::Count { .. } => "count",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::UpdateSingleProperty { .. } => "update_single_property",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
            Self::Associate { .. } => "associate",
            Self::Disassociate { .. } => "disassociate",
            Self::AssociateSingleValued { .. } => "associate_single_valued",
            Self::DisassociateSingleValued { .. } => "disassociate_single_valued",
            Self::CallFunction { .. } => "call_function",
            Self::CallAction { .. } => "call_action",
            Self::FetchXml { .. } => "fetch_xml",
            Self::Metadata(op) => op.operation_type(),
        }
    }

    /// Entity set names this operation puts into its URL or body
    pub fn collection_names_mut(&mut self) -> Vec<&mut String> {
        match self {
            Self::Retrieve { collection, .. }
            | Self::RetrieveMultiple { collection, .. }
            | Self::Count { collection, .. }
            | Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::UpdateSingleProperty { collection, .. }
            | Self::Upsert { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Disassociate { collection, .. }
            | Self::DisassociateSingleValued { collection, .. }
            | Self::FetchXml { collection, .. } => vec![collection],
            Self::Associate {
                collection,
                related_collection,
                ..
            }
            | Self::AssociateSingleValued {
                collection,
                related_collection,
                ..
            } => vec![collection, related_collection],
            Self::CallFunction { collection, .. } | Self::CallAction { collection, .. } => {
                collection.iter_mut().collect()
            }
            Self::Metadata(_) => Vec::new(),
        }
    }
}

impl MetadataOperation {
    pub fn http_method(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. }
            | Self::CreateAttribute { .. }
            | Self::CreateRelationship { .. }
            | Self::CreateGlobalOptionSet { .. } => "POST",
            Self::UpdateEntity { .. }
            | Self::UpdateAttribute { .. }
            | Self::UpdateRelationship { .. }
            | Self::UpdateGlobalOptionSet { .. } => "PUT",
            Self::DeleteAttribute { .. }
            | Self::DeleteRelationship { .. }
            | Self::DeleteGlobalOptionSet { .. } => "DELETE",
            Self::RetrieveEntity { .. }
            | Self::RetrieveEntities { .. }
            | Self::RetrieveAttribute { .. }
            | Self::RetrieveAttributes { .. }
            | Self::RetrieveRelationship { .. }
            | Self::RetrieveRelationships { .. }
            | Self::RetrieveGlobalOptionSet { .. }
            | Self::RetrieveGlobalOptionSets { .. }
            | Self::RetrieveCsdl { .. } => "GET",
        }
    }

    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => "create_entity",
            Self::UpdateEntity { .. } => "update_entity",
            Self::RetrieveEntity { .. } => "retrieve_entity",
            Self::RetrieveEntities { .. } => "retrieve_entities",
            Self::CreateAttribute { .. } => "create_attribute",
            Self::UpdateAttribute { .. } => "update_attribute",
            Self::DeleteAttribute { .. } => "delete_attribute",
            Self::RetrieveAttribute { .. } => "retrieve_attribute",
            Self::RetrieveAttributes { .. } => "retrieve_attributes",
            Self::CreateRelationship { .. } => "create_relationship",
            Self::UpdateRelationship { .. } => "update_relationship",
            Self::DeleteRelationship { .. } => "delete_relationship",
            Self::RetrieveRelationship { .. } => "retrieve_relationship",
            Self::RetrieveRelationships { .. } => "retrieve_relationships",
            Self::CreateGlobalOptionSet { .. } => "create_global_option_set",
            Self::UpdateGlobalOptionSet { .. } => "update_global_option_set",
            Self::DeleteGlobalOptionSet { .. } => "delete_global_option_set",
            Self::RetrieveGlobalOptionSet { .. } => "retrieve_global_option_set",
            Self::RetrieveGlobalOptionSets { .. } => "retrieve_global_option_sets",
            Self::RetrieveCsdl { .. } => "retrieve_csdl_metadata",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_methods() {
        assert_eq!(Operation::create("accounts", json!({})).http_method(), "POST");
        assert_eq!(Operation::update("accounts", "k='v'", json!({})).http_method(), "PATCH");
        assert_eq!(Operation::upsert("accounts", "k='v'", json!({})).http_method(), "PATCH");
        assert_eq!(Operation::delete("accounts", "k='v'").http_method(), "DELETE");
        assert_eq!(Operation::action("WinOpportunity", None).http_method(), "POST");
        assert_eq!(
            Operation::Metadata(MetadataOperation::UpdateAttribute {
                entity_key: "LogicalName='account'".into(),
                data: json!({}),
                cast_type: None,
            })
            .http_method(),
            "PUT"
        );
    }

    #[test]
    fn test_create_with_refs_merges_bindings() {
        let mut refs = HashMap::new();
        refs.insert("parentaccountid@odata.bind".to_string(), "$1".to_string());
        let op = Operation::create_with_refs("contacts", json!({"firstname": "Jane"}), refs);

        match op {
            Operation::Create { data, .. } => {
                assert_eq!(data["parentaccountid@odata.bind"], "$1");
                assert_eq!(data["firstname"], "Jane");
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_collection_names_mut() {
        let mut op = Operation::associate("accounts", "$1", "rel", "contacts", "$2");
        for name in op.collection_names_mut() {
            name.push('!');
        }
        match op {
            Operation::Associate {
                collection,
                related_collection,
                ..
            } => {
                assert_eq!(collection, "accounts!");
                assert_eq!(related_collection, "contacts!");
            }
            other => panic!("unexpected operation {:?}", other),
        }

        assert!(Operation::function("WhoAmI", Map::new())
            .collection_names_mut()
            .is_empty());
    }
}
