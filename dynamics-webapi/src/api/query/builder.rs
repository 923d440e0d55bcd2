//! OData query string composition
//!
//! Parameters are always emitted in the same order so generated URLs are
//! reproducible:
//!
//! `$select`, `$filter`, `savedQuery`, `userQuery`, `$apply`, `$count`,
//! `$top`, `$orderby`, raw query params, `$expand`
//!
//! Top-level parameters are joined with `&` after a `?`; options nested in
//! an `$expand` are rendered by the same code and joined with `;` inside
//! parentheses.

use serde::{Deserialize, Serialize};

use super::keys::{encode_component, key_parameter, remove_guid_braces};
use crate::api::error::Result;

/// Query-shaping part of a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Appended to the resource path as `/<navigation_property>`
    pub navigation_property: Option<String>,
    /// A single entry starting with `/` selects a single-valued navigation
    /// property; a single entry ending in `/$ref` retrieves a reference.
    pub select: Vec<String>,
    pub filter: Option<String>,
    /// Id of a system view (savedquery)
    pub saved_query: Option<String>,
    /// Id of a personal view (userquery)
    pub user_query: Option<String>,
    pub apply: Option<String>,
    pub count: bool,
    pub top: Option<u32>,
    pub order_by: Vec<String>,
    /// Pre-formed `key=value` pairs, e.g. parameter aliases used in `$filter`
    pub query_params: Vec<String>,
    pub expand: Vec<Expand>,
}

/// One `$expand` entry with its own nested options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expand {
    pub property: String,
    pub select: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Vec<String>,
    pub top: Option<u32>,
    pub expand: Vec<Expand>,
}

impl Expand {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ..Default::default()
        }
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order_by(mut self, order: &[&str]) -> Self {
        self.order_by = order.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand.push(expand);
        self
    }

    fn as_options(&self) -> QueryOptions {
        QueryOptions {
            select: self.select.clone(),
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            top: self.top,
            expand: self.expand.clone(),
            ..Default::default()
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand.push(expand);
        self
    }

    pub fn order_by(mut self, order: &[&str]) -> Self {
        self.order_by = order.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    pub fn apply(mut self, apply: impl Into<String>) -> Self {
        self.apply = Some(apply.into());
        self
    }

    pub fn query_param(mut self, param: impl Into<String>) -> Self {
        self.query_params.push(param.into());
        self
    }

    pub fn navigation_property(mut self, property: impl Into<String>) -> Self {
        self.navigation_property = Some(property.into());
        self
    }

    /// True when the single select entry asks for a `$ref`
    pub fn is_reference(&self) -> bool {
        self.select.len() == 1 && self.select[0].ends_with("/$ref")
    }
}

/// Output of [`compose`]: extra path segments and the query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposedQuery {
    /// Appended directly after `collection(key)`, starts with `/` when set
    pub path: String,
    /// Either empty or starts with `?`
    pub query: String,
}

impl ComposedQuery {
    pub fn suffix(&self) -> String {
        format!("{}{}", self.path, self.query)
    }
}

/// Builds the path suffix and query string for a request.
///
/// `single_record` enables the retrieve-only select forms (leading `/` for
/// single-valued navigation properties and `/$ref` references).
pub fn compose(options: &QueryOptions, single_record: bool, operation: &str) -> Result<ComposedQuery> {
    let mut path = String::new();
    if let Some(navigation) = &options.navigation_property {
        path.push('/');
        path.push_str(navigation.trim_start_matches('/'));
    }

    let mut select: Vec<&str> = options.select.iter().map(|s| s.as_str()).collect();
    if single_record && options.is_reference() {
        path.push('/');
        path.push_str(select[0].trim_start_matches('/'));
        select.clear();
    } else if single_record && select.first().is_some_and(|s| s.starts_with('/')) {
        let navigation = select.remove(0);
        if options.navigation_property.is_none() {
            path.push_str(navigation);
        }
    }

    let parts = compose_parts(options, &select, operation)?;
    let query = if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    };
    Ok(ComposedQuery { path, query })
}

fn compose_parts(options: &QueryOptions, select: &[&str], operation: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();

    if !select.is_empty() {
        parts.push(format!("$select={}", select.join(",")));
    }
    if let Some(filter) = options.filter.as_deref().filter(|f| !f.is_empty()) {
        parts.push(format!("$filter={}", encode_component(&remove_guid_braces(filter))));
    }
    if let Some(saved_query) = &options.saved_query {
        parts.push(format!(
            "savedQuery={}",
            key_parameter(saved_query, operation, "saved_query")?
        ));
    }
    if let Some(user_query) = &options.user_query {
        parts.push(format!(
            "userQuery={}",
            key_parameter(user_query, operation, "user_query")?
        ));
    }
    if let Some(apply) = options.apply.as_deref().filter(|a| !a.is_empty()) {
        parts.push(format!("$apply={}", encode_component(apply)));
    }
    if options.count {
        parts.push("$count=true".to_string());
    }
    if let Some(top) = options.top.filter(|t| *t > 0) {
        parts.push(format!("$top={}", top));
    }
    if !options.order_by.is_empty() {
        parts.push(format!("$orderby={}", encode_component(&options.order_by.join(","))));
    }
    for param in options.query_params.iter().filter(|p| !p.is_empty()) {
        parts.push(param.clone());
    }
    if !options.expand.is_empty() {
        let mut expands = Vec::with_capacity(options.expand.len());
        for expand in options.expand.iter().filter(|e| !e.property.is_empty()) {
            let nested = expand.as_options();
            let nested_select: Vec<&str> = nested.select.iter().map(|s| s.as_str()).collect();
            let nested_parts = compose_parts(&nested, &nested_select, operation)?;
            if nested_parts.is_empty() {
                expands.push(expand.property.clone());
            } else {
                expands.push(format!("{}({})", expand.property, nested_parts.join(";")));
            }
        }
        if !expands.is_empty() {
            parts.push(format!("$expand={}", expands.join(",")));
        }
    }

    Ok(parts)
}
