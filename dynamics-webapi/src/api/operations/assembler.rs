//! Request assembly
//!
//! Turns a [`Request`] and the current [`Config`] into an [`HttpRequest`]
//! plus the [`ResponseContext`] needed to read its answer. Nothing in here
//! touches the network, so the same output feeds both direct calls and
//! `$batch` serialization.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde_json::{Map, Value};

use super::interpreter::{ResponseContext, ResponseKind};
use super::operation::{MetadataOperation, Operation, Request, RequestOptions};
use crate::api::config::Config;
use crate::api::constants::{annotations, headers, prefer};
use crate::api::error::{DynamicsError, Result};
use crate::api::query::keys::{
    encode_component, extract_uuid, is_content_id_reference, key_parameter, validate_segment,
};
use crate::api::query::{QueryOptions, compose, inject_paging};
use crate::api::transport::{Body, Headers, HttpRequest};

static BRACED_GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\{([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\}\)")
        .expect("valid guid regex")
});

const METADATA_NAMESPACE: &str = "Microsoft.Dynamics.CRM.";

/// A request ready to be sent on its own or queued into a batch
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub http: HttpRequest,
    pub context: ResponseContext,
    /// Whether the request joins the surrounding change set when batched
    pub in_change_set: bool,
}

/// Method, path and body of one operation, before headers are applied
struct Target {
    method: Method,
    path: String,
    body: Option<Body>,
    kind: ResponseKind,
    default_if_match: bool,
    default_merge_labels: bool,
    accept_xml: bool,
    page_number: u32,
}

impl Target {
    fn new(method: Method, path: String, kind: ResponseKind) -> Self {
        Self {
            method,
            path,
            body: None,
            kind,
            default_if_match: false,
            default_merge_labels: false,
            accept_xml: false,
            page_number: 1,
        }
    }

    fn body(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }
}

/// Builds the HTTP call for `request` under `config`
pub fn assemble(request: &Request, config: &Config) -> Result<PreparedRequest> {
    let operation = &request.operation;
    let options = &request.options;
    let op_name = operation.operation_type();
    let data_api_url = config.data_api_url();

    if let Some(token) = &options.cancellation
        && token.is_cancelled()
    {
        return Err(DynamicsError::Cancelled);
    }

    let mut target = target(operation, op_name)?;
    if let Some(Body::Json(data)) = &target.body {
        target.body = Some(Body::Json(process_data(data, &data_api_url)));
    }

    let url = if is_content_id_reference(&target.path)
        || target.path.starts_with("http://")
        || target.path.starts_with("https://")
    {
        target.path.clone()
    } else {
        format!("{}{}", data_api_url, target.path)
    };

    let mut http = HttpRequest::new(target.method.clone(), url);
    http.body = target.body.take();

    let keep_annotations = options.include_annotations.is_some()
        || config.include_annotations.is_some()
        || raw_prefer_directives(options)
            .iter()
            .any(|d| d.starts_with(prefer::INCLUDE_ANNOTATIONS));

    if let Some(prefer_header) = build_prefer(options, config, &target) {
        http.set_header(headers::PREFER, prefer_header);
    }
    let conditional = apply_conditional_headers(&mut http, options, &target, op_name)?;
    apply_request_headers(&mut http, options, config, &target, op_name)?;

    let in_change_set = http.method != Method::GET && options.in_change_set.unwrap_or(true);

    log::trace!("Assembled {} {} for {}", http.method, http.url, op_name);

    Ok(PreparedRequest {
        http,
        context: ResponseContext {
            kind: target.kind,
            operation: op_name.to_string(),
            keep_annotations,
            conditional,
            page_number: target.page_number,
        },
        in_change_set,
    })
}

/// Headers derived from the options alone, for calls that are not described
/// by an [`Operation`] such as chunked file transfers
pub fn option_headers(options: &RequestOptions, config: &Config, op: &str) -> Result<Headers> {
    let mut http = HttpRequest::new(Method::GET, String::new());
    let target = Target::new(Method::GET, String::new(), ResponseKind::Empty);
    apply_request_headers(&mut http, options, config, &target, op)?;
    Ok(http.headers)
}

fn target(operation: &Operation, op: &str) -> Result<Target> {
    let target = match operation {
        Operation::Retrieve {
            collection,
            key,
            query,
        } => {
            let composed = compose(query, true, op)?;
            let kind = if query.is_reference() {
                ResponseKind::Reference
            } else {
                ResponseKind::Entity
            };
            let path = record_path(collection, key.as_deref(), op)?;
            Target::new(Method::GET, format!("{}{}", path, composed.suffix()), kind)
        }
        Operation::RetrieveMultiple {
            collection,
            query,
            continuation,
        } => match continuation {
            Some(link) => Target::new(Method::GET, link.clone(), ResponseKind::Collection),
            None => {
                let composed = compose(query, false, op)?;
                let path = record_path(collection, None, op)?;
                Target::new(
                    Method::GET,
                    format!("{}{}", path, composed.suffix()),
                    ResponseKind::Collection,
                )
            }
        },
        Operation::Count { collection, filter } => {
            let path = record_path(collection, None, op)?;
            match filter.as_deref().filter(|f| !f.is_empty()) {
                None => Target::new(Method::GET, format!("{}/$count", path), ResponseKind::Count),
                Some(filter) => {
                    let query = QueryOptions::new().filter(filter).count(true);
                    let composed = compose(&query, false, op)?;
                    Target::new(
                        Method::GET,
                        format!("{}{}", path, composed.suffix()),
                        ResponseKind::Count,
                    )
                }
            }
        }
        Operation::Create {
            collection,
            data,
            query,
        } => {
            require_object(data, op, "data")?;
            let composed = compose(query, false, op)?;
            let path = record_path(collection, None, op)?;
            Target::new(
                Method::POST,
                format!("{}{}", path, composed.query),
                ResponseKind::Create,
            )
            .body(data.clone())
        }
        Operation::Update {
            collection,
            key,
            data,
            query,
        } => {
            require_object(data, op, "data")?;
            let composed = compose(query, false, op)?;
            let path = record_path(collection, Some(key), op)?;
            let mut target = Target::new(
                Method::PATCH,
                format!("{}{}", path, composed.query),
                ResponseKind::Update,
            )
            .body(data.clone());
            target.default_if_match = true;
            target
        }
        Operation::UpdateSingleProperty {
            collection,
            key,
            field,
            value,
            query,
        } => {
            validate_segment(field, op, "field")?;
            let composed = compose(query, false, op)?;
            let path = record_path(collection, Some(key), op)?;
            Target::new(
                Method::PUT,
                format!("{}/{}{}", path, field, composed.query),
                ResponseKind::Update,
            )
            .body(serde_json::json!({ "value": value }))
        }
        Operation::Upsert {
            collection,
            key,
            data,
            query,
        } => {
            require_object(data, op, "data")?;
            let composed = compose(query, false, op)?;
            let path = record_path(collection, Some(key), op)?;
            Target::new(
                Method::PATCH,
                format!("{}{}", path, composed.query),
                ResponseKind::Update,
            )
            .body(data.clone())
        }
        Operation::Delete {
            collection,
            key,
            field,
        } => {
            let mut path = record_path(collection, Some(key), op)?;
            if let Some(field) = field {
                validate_segment(field, op, "field")?;
                path = format!("{}/{}", path, field);
            }
            let mut target = Target::new(Method::DELETE, path, ResponseKind::Delete);
            target.default_if_match = field.is_none();
            target
        }
        Operation::Associate {
            collection,
            primary_key,
            relationship,
            related_collection,
            related_key,
        } => {
            validate_segment(relationship, op, "relationship")?;
            let primary = entity_path(collection, primary_key, op)?;
            let related = entity_path(related_collection, related_key, op)?;
            Target::new(
                Method::POST,
                format!("{}/{}/$ref", primary, relationship),
                ResponseKind::Empty,
            )
            .body(odata_id(related))
        }
        Operation::Disassociate {
            collection,
            primary_key,
            relationship,
            related_key,
        } => {
            validate_segment(relationship, op, "relationship")?;
            let primary = entity_path(collection, primary_key, op)?;
            let related = key_parameter(related_key, op, "related_key")?;
            Target::new(
                Method::DELETE,
                format!("{}/{}({})/$ref", primary, relationship, related),
                ResponseKind::Empty,
            )
        }
        Operation::AssociateSingleValued {
            collection,
            primary_key,
            navigation_property,
            related_collection,
            related_key,
        } => {
            validate_segment(navigation_property, op, "navigation_property")?;
            let primary = entity_path(collection, primary_key, op)?;
            let related = entity_path(related_collection, related_key, op)?;
            Target::new(
                Method::PUT,
                format!("{}/{}/$ref", primary, navigation_property),
                ResponseKind::Empty,
            )
            .body(odata_id(related))
        }
        Operation::DisassociateSingleValued {
            collection,
            primary_key,
            navigation_property,
        } => {
            validate_segment(navigation_property, op, "navigation_property")?;
            let primary = entity_path(collection, primary_key, op)?;
            Target::new(
                Method::DELETE,
                format!("{}/{}/$ref", primary, navigation_property),
                ResponseKind::Empty,
            )
        }
        Operation::CallFunction {
            name,
            parameters,
            collection,
            key,
            query,
        } => {
            validate_segment(name, op, "name")?;
            let (segment, aliases) = function_call(name, parameters);
            let path = bound_path(collection.as_deref(), key.as_deref(), &segment, op)?;
            let composed = compose(query, false, op)?;

            let mut parts = aliases;
            if let Some(query) = composed.query.strip_prefix('?') {
                parts.push(query.to_string());
            }
            let query = if parts.is_empty() {
                String::new()
            } else {
                format!("?{}", parts.join("&"))
            };
            Target::new(Method::GET, format!("{}{}", path, query), ResponseKind::Json)
        }
        Operation::CallAction {
            name,
            data,
            collection,
            key,
        } => {
            validate_segment(name, op, "name")?;
            let path = bound_path(collection.as_deref(), key.as_deref(), name, op)?;
            let mut target = Target::new(Method::POST, path, ResponseKind::Json);
            if let Some(data) = data {
                target = target.body(data.clone());
            }
            target
        }
        Operation::FetchXml {
            collection,
            fetch_xml,
            page_number,
            paging_cookie,
        } => {
            let page = page_number.unwrap_or(1).max(1);
            let xml = inject_paging(fetch_xml, page, paging_cookie.as_deref(), op)?;
            let path = record_path(collection, None, op)?;
            let mut target = Target::new(
                Method::GET,
                format!("{}?fetchXml={}", path, encode_component(&xml)),
                ResponseKind::FetchXml,
            );
            target.page_number = page;
            target
        }
        Operation::Metadata(metadata) => metadata_target(metadata, op)?,
    };
    Ok(target)
}

fn metadata_target(operation: &MetadataOperation, op: &str) -> Result<Target> {
    const ENTITIES: &str = "EntityDefinitions";
    const RELATIONSHIPS: &str = "RelationshipDefinitions";
    const OPTION_SETS: &str = "GlobalOptionSetDefinitions";

    let target = match operation {
        MetadataOperation::CreateEntity { data } => create_target(ENTITIES.to_string(), data, op)?,
        MetadataOperation::UpdateEntity { data } => {
            update_target(ENTITIES.to_string(), data, None, op)?
        }
        MetadataOperation::RetrieveEntity { key, query } => {
            let path = format!("{}({})", ENTITIES, key_parameter(key, op, "key")?);
            retrieve_target(path, None, query, true, op)?
        }
        MetadataOperation::RetrieveEntities { query } => {
            retrieve_target(ENTITIES.to_string(), None, query, false, op)?
        }
        MetadataOperation::CreateAttribute { entity_key, data } => {
            create_target(attributes_path(entity_key, op)?, data, op)?
        }
        MetadataOperation::UpdateAttribute {
            entity_key,
            data,
            cast_type,
        } => update_target(attributes_path(entity_key, op)?, data, cast_type.as_deref(), op)?,
        MetadataOperation::DeleteAttribute {
            entity_key,
            attribute_key,
        } => Target::new(
            Method::DELETE,
            format!(
                "{}({})",
                attributes_path(entity_key, op)?,
                key_parameter(attribute_key, op, "attribute_key")?
            ),
            ResponseKind::Delete,
        ),
        MetadataOperation::RetrieveAttribute {
            entity_key,
            attribute_key,
            cast_type,
            query,
        } => {
            let path = format!(
                "{}({})",
                attributes_path(entity_key, op)?,
                key_parameter(attribute_key, op, "attribute_key")?
            );
            retrieve_target(path, cast_type.as_deref(), query, true, op)?
        }
        MetadataOperation::RetrieveAttributes {
            entity_key,
            cast_type,
            query,
        } => retrieve_target(
            attributes_path(entity_key, op)?,
            cast_type.as_deref(),
            query,
            false,
            op,
        )?,
        MetadataOperation::CreateRelationship { data } => {
            create_target(RELATIONSHIPS.to_string(), data, op)?
        }
        MetadataOperation::UpdateRelationship { data, cast_type } => {
            update_target(RELATIONSHIPS.to_string(), data, cast_type.as_deref(), op)?
        }
        MetadataOperation::DeleteRelationship { key } => Target::new(
            Method::DELETE,
            format!("{}({})", RELATIONSHIPS, key_parameter(key, op, "key")?),
            ResponseKind::Delete,
        ),
        MetadataOperation::RetrieveRelationship {
            key,
            cast_type,
            query,
        } => {
            let path = format!("{}({})", RELATIONSHIPS, key_parameter(key, op, "key")?);
            retrieve_target(path, cast_type.as_deref(), query, true, op)?
        }
        MetadataOperation::RetrieveRelationships { cast_type, query } => retrieve_target(
            RELATIONSHIPS.to_string(),
            cast_type.as_deref(),
            query,
            false,
            op,
        )?,
        MetadataOperation::CreateGlobalOptionSet { data } => {
            create_target(OPTION_SETS.to_string(), data, op)?
        }
        MetadataOperation::UpdateGlobalOptionSet { data } => {
            update_target(OPTION_SETS.to_string(), data, None, op)?
        }
        MetadataOperation::DeleteGlobalOptionSet { key } => Target::new(
            Method::DELETE,
            format!("{}({})", OPTION_SETS, key_parameter(key, op, "key")?),
            ResponseKind::Delete,
        ),
        MetadataOperation::RetrieveGlobalOptionSet {
            key,
            cast_type,
            query,
        } => {
            let path = format!("{}({})", OPTION_SETS, key_parameter(key, op, "key")?);
            retrieve_target(path, cast_type.as_deref(), query, true, op)?
        }
        MetadataOperation::RetrieveGlobalOptionSets { cast_type, query } => retrieve_target(
            OPTION_SETS.to_string(),
            cast_type.as_deref(),
            query,
            false,
            op,
        )?,
        MetadataOperation::RetrieveCsdl { .. } => {
            let mut target = Target::new(Method::GET, "$metadata".to_string(), ResponseKind::Text);
            target.accept_xml = true;
            target
        }
    };
    Ok(target)
}

fn attributes_path(entity_key: &str, op: &str) -> Result<String> {
    Ok(format!(
        "EntityDefinitions({})/Attributes",
        key_parameter(entity_key, op, "entity_key")?
    ))
}

fn create_target(path: String, data: &Value, op: &str) -> Result<Target> {
    require_object(data, op, "data")?;
    Ok(Target::new(Method::POST, path, ResponseKind::Create).body(data.clone()))
}

/// Schema updates replace the whole definition with PUT, keyed by `MetadataId`
fn update_target(base: String, data: &Value, cast_type: Option<&str>, op: &str) -> Result<Target> {
    require_object(data, op, "data")?;
    let metadata_id = data
        .get("MetadataId")
        .and_then(Value::as_str)
        .ok_or_else(|| DynamicsError::invalid(op, "data.MetadataId is required"))?;
    let mut path = format!("{}({})", base, key_parameter(metadata_id, op, "data.MetadataId")?);
    if let Some(cast) = cast_type {
        path.push_str(&cast_segment(cast, op)?);
    }
    let mut target = Target::new(Method::PUT, path, ResponseKind::Update).body(data.clone());
    target.default_merge_labels = true;
    Ok(target)
}

fn retrieve_target(
    mut path: String,
    cast_type: Option<&str>,
    query: &QueryOptions,
    single_record: bool,
    op: &str,
) -> Result<Target> {
    if let Some(cast) = cast_type {
        path.push_str(&cast_segment(cast, op)?);
    }
    let composed = compose(query, single_record, op)?;
    let kind = if single_record {
        ResponseKind::Entity
    } else {
        ResponseKind::Collection
    };
    Ok(Target::new(Method::GET, format!("{}{}", path, composed.suffix()), kind))
}

fn cast_segment(cast_type: &str, op: &str) -> Result<String> {
    validate_segment(cast_type, op, "cast_type")?;
    if cast_type.starts_with(METADATA_NAMESPACE) {
        Ok(format!("/{}", cast_type))
    } else {
        Ok(format!("/{}{}", METADATA_NAMESPACE, cast_type))
    }
}

/// `collection` or `collection(key)`; a content-id collection stands for a record
fn record_path(collection: &str, key: Option<&str>, op: &str) -> Result<String> {
    if is_content_id_reference(collection) {
        return Ok(collection.to_string());
    }
    validate_segment(collection, op, "collection")?;
    match key {
        Some(key) => Ok(format!("{}({})", collection, key_parameter(key, op, "key")?)),
        None => Ok(collection.to_string()),
    }
}

/// Like [`record_path`], but a `$N` key replaces the whole path
fn entity_path(collection: &str, key: &str, op: &str) -> Result<String> {
    if is_content_id_reference(key) {
        return Ok(key.to_string());
    }
    record_path(collection, Some(key), op)
}

fn bound_path(collection: Option<&str>, key: Option<&str>, segment: &str, op: &str) -> Result<String> {
    match collection {
        Some(collection) => Ok(format!("{}/{}", record_path(collection, key, op)?, segment)),
        None => Ok(segment.to_string()),
    }
}

/// Renders `Name(a=@p1,b=@p2)` and the matching `@pN=value` aliases.
/// Null parameters are skipped but still consume their alias number.
fn function_call(name: &str, parameters: &Map<String, Value>) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let mut aliases = Vec::new();

    for (index, (parameter, value)) in parameters.iter().enumerate() {
        if value.is_null() {
            continue;
        }
        let alias = format!("@p{}", index + 1);
        names.push(format!("{}={}", parameter, alias));
        aliases.push(format!("{}={}", alias, function_value(value)));
    }

    (format!("{}({})", name, names.join(",")), aliases)
}

fn function_value(value: &Value) -> String {
    match value {
        Value::String(text) => {
            if let Some(uuid) = extract_uuid(text) {
                uuid
            } else if text.starts_with(METADATA_NAMESPACE) || text.starts_with('@') {
                encode_component(text)
            } else {
                encode_component(&format!("'{}'", text.replace('\'', "''")))
            }
        }
        Value::Object(_) | Value::Array(_) => encode_component(&value.to_string()),
        other => other.to_string(),
    }
}

fn odata_id(link: String) -> Value {
    let mut map = Map::new();
    map.insert(annotations::ID.to_string(), Value::String(link));
    Value::Object(map)
}

fn require_object(data: &Value, op: &str, parameter: &str) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(DynamicsError::invalid(op, format!("{} must be a JSON object", parameter)))
    }
}

fn raw_prefer_directives(options: &RequestOptions) -> Vec<String> {
    options
        .prefer
        .iter()
        .flat_map(|raw| raw.split(','))
        .map(|directive| directive.trim().to_string())
        .filter(|directive| !directive.is_empty())
        .collect()
}

/// Merges structured options, raw directives and config defaults into one
/// `Prefer` value. Request-level values win over config values.
fn build_prefer(options: &RequestOptions, config: &Config, target: &Target) -> Option<String> {
    let mut raw_return_representation = false;
    let mut raw_annotations = None;
    let mut raw_page_size = None;
    let mut raw_track_changes = false;
    let mut raw_continue_on_error = false;
    let mut extra = Vec::new();

    for directive in raw_prefer_directives(options) {
        if directive == prefer::RETURN_REPRESENTATION {
            raw_return_representation = true;
        } else if let Some(value) = directive.strip_prefix(prefer::INCLUDE_ANNOTATIONS) {
            raw_annotations = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = directive.strip_prefix(prefer::MAX_PAGE_SIZE) {
            raw_page_size = value.parse::<u32>().ok();
        } else if directive == prefer::TRACK_CHANGES {
            raw_track_changes = true;
        } else if directive == prefer::CONTINUE_ON_ERROR {
            raw_continue_on_error = true;
        } else {
            extra.push(directive);
        }
    }

    let writes = matches!(target.kind, ResponseKind::Create | ResponseKind::Update);
    let reads = target.method == Method::GET;

    let return_representation = options
        .return_representation
        .unwrap_or(raw_return_representation || config.return_representation);
    let mut include_annotations = options
        .include_annotations
        .clone()
        .or(raw_annotations)
        .or_else(|| config.include_annotations.clone());
    if target.kind == ResponseKind::FetchXml && include_annotations.is_none() {
        include_annotations = Some("Microsoft.Dynamics.CRM.*".to_string());
    }
    let max_page_size = options
        .max_page_size
        .or(raw_page_size)
        .or(config.max_page_size)
        .filter(|size| *size > 0);

    let mut directives = Vec::new();
    if return_representation && writes {
        directives.push(prefer::RETURN_REPRESENTATION.to_string());
    }
    if let Some(annotations) = include_annotations.filter(|a| !a.is_empty()) {
        directives.push(format!("{}\"{}\"", prefer::INCLUDE_ANNOTATIONS, annotations));
    }
    if let Some(size) = max_page_size.filter(|_| target.kind == ResponseKind::Collection) {
        directives.push(format!("{}{}", prefer::MAX_PAGE_SIZE, size));
    }
    if (options.track_changes || raw_track_changes) && reads {
        directives.push(prefer::TRACK_CHANGES.to_string());
    }
    if options.continue_on_error || raw_continue_on_error {
        directives.push(prefer::CONTINUE_ON_ERROR.to_string());
    }
    directives.extend(extra);

    if directives.is_empty() {
        None
    } else {
        Some(directives.join(","))
    }
}

/// Returns true when the response may legitimately be 412
fn apply_conditional_headers(
    http: &mut HttpRequest,
    options: &RequestOptions,
    target: &Target,
    op: &str,
) -> Result<bool> {
    match (&options.if_match, &options.if_none_match) {
        (Some(_), Some(_)) => Err(DynamicsError::invalid(
            op,
            "if_match and if_none_match cannot be used together",
        )),
        (Some(etag), None) => {
            http.set_header(headers::IF_MATCH, etag.clone());
            Ok(true)
        }
        (None, Some(etag)) => {
            http.set_header(headers::IF_NONE_MATCH, etag.clone());
            Ok(true)
        }
        (None, None) if target.default_if_match => {
            http.set_header(headers::IF_MATCH, "*");
            Ok(false)
        }
        (None, None) => Ok(false),
    }
}

fn apply_request_headers(
    http: &mut HttpRequest,
    options: &RequestOptions,
    config: &Config,
    target: &Target,
    op: &str,
) -> Result<()> {
    if let Some(caller) = options.impersonate.as_ref().or(config.impersonate.as_ref()) {
        let caller = extract_uuid(caller)
            .ok_or_else(|| DynamicsError::invalid(op, "impersonate must be a GUID"))?;
        http.set_header(headers::MSCRM_CALLER_ID, caller);
    }
    if let Some(object_id) = options
        .impersonate_aad
        .as_ref()
        .or(config.impersonate_aad.as_ref())
    {
        let object_id = extract_uuid(object_id)
            .ok_or_else(|| DynamicsError::invalid(op, "impersonate_aad must be a GUID"))?;
        http.set_header(headers::CALLER_OBJECT_ID, object_id);
    }
    if let Some(token) = options.token.as_deref() {
        if token.trim().is_empty() {
            return Err(DynamicsError::EmptyToken);
        }
        http.set_header(headers::AUTHORIZATION, format!("Bearer {}", token));
    }
    if options.duplicate_detection {
        http.set_header(headers::SUPPRESS_DUPLICATE_DETECTION, "false");
    }
    if options.bypass_custom_plugin_execution {
        http.set_header(headers::BYPASS_CUSTOM_PLUGIN_EXECUTION, "true");
    }
    for (name, value) in config.bypass.headers() {
        http.set_header(name, value);
    }
    if options.no_cache {
        http.set_header(headers::CACHE_CONTROL, "no-cache");
    }
    if options.merge_labels.unwrap_or(target.default_merge_labels) {
        http.set_header(headers::MERGE_LABELS, "true");
    }
    if let Some(content_id) = &options.content_id {
        http.set_header(headers::CONTENT_ID, content_id.clone());
    }
    if let Some(solution) = &options.solution_unique_name {
        http.set_header(headers::SOLUTION_UNIQUE_NAME, solution.clone());
    }
    if target.accept_xml {
        http.set_header(headers::ACCEPT, "application/xml");
    }
    Ok(())
}

/// Normalizes a payload before it is sent.
///
/// `@odata.bind` values lose GUID braces and gain a leading `/`, `@odata.id`
/// values become absolute, and read-only aliases added by the response
/// interpreter (`*_Formatted`, `*_LogicalName`, ...) are dropped.
pub fn process_data(value: &Value, data_api_url: &str) -> Value {
    match value {
        Value::Object(map) => {
            let mut processed = Map::with_capacity(map.len());
            for (key, value) in map {
                if is_display_only_key(key) {
                    continue;
                }
                let value = match value {
                    Value::String(link) if key.ends_with(annotations::BIND_SUFFIX) => {
                        Value::String(normalize_bind(link))
                    }
                    Value::String(link) if key.ends_with(annotations::ID) => {
                        Value::String(normalize_id(link, data_api_url))
                    }
                    other => process_data(other, data_api_url),
                };
                processed.insert(key.clone(), value);
            }
            Value::Object(processed)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| process_data(item, data_api_url))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_display_only_key(key: &str) -> bool {
    key.starts_with("oData")
        || key.ends_with("_Formatted")
        || key.ends_with("_NavigationProperty")
        || key.ends_with("_LogicalName")
}

fn normalize_bind(link: &str) -> String {
    if link.starts_with('$') {
        return link.to_string();
    }
    let link = BRACED_GUID_RE.replace_all(link, "($1)");
    if link.starts_with('/') || link.starts_with("http://") || link.starts_with("https://") {
        link.into_owned()
    } else {
        format!("/{}", link)
    }
}

fn normalize_id(link: &str, data_api_url: &str) -> String {
    if link.starts_with('$') {
        return link.to_string();
    }
    let link = BRACED_GUID_RE.replace_all(link, "($1)");
    if link.starts_with("http://") || link.starts_with("https://") {
        link.into_owned()
    } else {
        format!("{}{}", data_api_url, link.trim_start_matches('/'))
    }
}
