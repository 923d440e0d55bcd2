//! Batch operations for Dynamics 365 Web API
//!
//! Serializes prepared requests into one `multipart/mixed` `$batch` body and
//! splits the multipart answer back into per-request results.
//!
//! GET requests become standalone parts. Every contiguous run of writes is
//! wrapped in one change set, whose parts are numbered with `Content-ID`s so
//! later parts can refer to them as `$<id>`.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::assembler::PreparedRequest;
use super::interpreter::{ResponseContext, ResponseValue, interpret, unexpected};
use crate::api::constants::{self, headers};
use crate::api::error::{DynamicsError, HttpError, Result};
use crate::api::transport::HttpResponse;

static STATUS_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HTTP/\d(?:\.\d)?\s+(\d{3})\s*(.*)$").expect("valid status line regex"));

/// Overrides applied when a batch is flushed
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub impersonate: Option<String>,
    pub impersonate_aad: Option<String>,
    pub token: Option<String>,
    /// `Some(false)` sends every write as a standalone part
    pub in_change_set: Option<bool>,
    pub continue_on_error: bool,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

/// How queued requests were laid out in the batch body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchGroup {
    /// Standalone part holding the request at this index
    Single(usize),
    /// Change set with `(index, content_id)` members
    ChangeSet {
        boundary: String,
        members: Vec<(usize, String)>,
    },
}

/// Serialized `$batch` payload
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub boundary: String,
    pub body: String,
    pub groups: Vec<BatchGroup>,
    contexts: Vec<ResponseContext>,
}

impl BatchRequest {
    pub fn content_type(&self) -> String {
        format!("multipart/mixed;boundary={}", self.boundary)
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Builder for a `$batch` request body
#[derive(Debug, Clone)]
pub struct BatchRequestBuilder {
    requests: Vec<PreparedRequest>,
    change_sets: bool,
}

impl Default for BatchRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRequestBuilder {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            change_sets: true,
        }
    }

    pub fn from_requests(requests: Vec<PreparedRequest>) -> Self {
        Self {
            requests,
            change_sets: true,
        }
    }

    /// Disable change sets entirely
    pub fn change_sets(mut self, enabled: bool) -> Self {
        self.change_sets = enabled;
        self
    }

    /// Queue a request, returning its position
    pub fn add(&mut self, request: PreparedRequest) -> usize {
        self.requests.push(request);
        self.requests.len() - 1
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn build(self) -> Result<BatchRequest> {
        let boundary = format!("{}{}", constants::BATCH_BOUNDARY_PREFIX, Uuid::new_v4());
        let mut lines: Vec<String> = Vec::new();
        let mut groups = Vec::new();
        let mut change_set: Option<(String, Vec<(usize, String)>)> = None;
        let mut content_id = constants::CONTENT_ID_SEED;

        for (index, request) in self.requests.iter().enumerate() {
            let in_change_set = self.change_sets && request.in_change_set;

            if !in_change_set && let Some((cs_boundary, members)) = change_set.take() {
                lines.push(format!("\n--{}--", cs_boundary));
                groups.push(BatchGroup::ChangeSet {
                    boundary: cs_boundary,
                    members,
                });
            }

            if change_set.is_none() {
                lines.push(format!("\n--{}", boundary));
                if in_change_set {
                    let cs_boundary =
                        format!("{}{}", constants::CHANGESET_BOUNDARY_PREFIX, Uuid::new_v4());
                    lines.push(format!("Content-Type: multipart/mixed;boundary={}", cs_boundary));
                    change_set = Some((cs_boundary, Vec::new()));
                }
            }

            let http = &request.http;
            if let Some((cs_boundary, members)) = change_set.as_mut() {
                lines.push(format!("\n--{}", cs_boundary));
                lines.push("Content-Type: application/http".to_string());
                lines.push("Content-Transfer-Encoding: binary".to_string());
                let id = match http.header(headers::CONTENT_ID) {
                    Some(id) => id.to_string(),
                    None => {
                        content_id += 1;
                        content_id.to_string()
                    }
                };
                lines.push(format!("{}: {}", headers::CONTENT_ID, id));
                members.push((index, id));
            } else {
                lines.push("Content-Type: application/http".to_string());
                lines.push("Content-Transfer-Encoding: binary".to_string());
                groups.push(BatchGroup::Single(index));
            }

            lines.push(format!("\n{} {} HTTP/1.1", http.method, http.url));
            if http.method == Method::GET {
                lines.push("Accept: application/json".to_string());
            } else {
                lines.push("Content-Type: application/json".to_string());
            }
            for (name, value) in &http.headers {
                if name.eq_ignore_ascii_case(headers::AUTHORIZATION)
                    || name.eq_ignore_ascii_case(headers::CONTENT_ID)
                {
                    continue;
                }
                lines.push(format!("{}: {}", name, value));
            }
            if let Some(body) = &http.body {
                lines.push(format!("\n{}", body.to_text()?));
            }
        }

        if let Some((cs_boundary, members)) = change_set.take() {
            lines.push(format!("\n--{}--", cs_boundary));
            groups.push(BatchGroup::ChangeSet {
                boundary: cs_boundary,
                members,
            });
        }
        lines.push(format!("\n--{}--\n", boundary));

        Ok(BatchRequest {
            boundary,
            body: lines.join("\n"),
            groups,
            contexts: self.requests.into_iter().map(|r| r.context).collect(),
        })
    }
}

/// One HTTP response embedded in a batch response
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPart {
    pub content_id: Option<String>,
    pub response: HttpResponse,
}

/// Top-level entry of a batch response
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponseEntry {
    Single(BatchPart),
    ChangeSet(Vec<BatchPart>),
}

/// Parser for multipart batch responses
pub struct BatchResponseParser;

impl BatchResponseParser {
    /// Splits a `$batch` response into its parts
    pub fn parse(response: &HttpResponse) -> Result<Vec<BatchResponseEntry>> {
        let text = response.text().replace("\r\n", "\n");

        let boundary = response
            .header(headers::CONTENT_TYPE)
            .and_then(boundary_parameter)
            .or_else(|| {
                text.lines()
                    .map(str::trim)
                    .find(|line| line.starts_with("--"))
                    .map(|line| line.trim_start_matches("--").to_string())
            })
            .ok_or_else(|| unexpected(response, "batch response has no multipart boundary".into()))?;

        parse_multipart(&text, &boundary, response)
    }

    /// Maps parsed parts back onto the queued requests, in submission order.
    ///
    /// A change set answered by a single failed part gives that failure to
    /// the request with the matching Content-ID (or the first member) and
    /// marks the others as rolled back.
    pub fn assemble(batch: &BatchRequest, entries: Vec<BatchResponseEntry>) -> Vec<Result<ResponseValue>> {
        let contexts = &batch.contexts;
        let mut results: Vec<Option<Result<ResponseValue>>> =
            (0..contexts.len()).map(|_| None).collect();
        let mut entries = entries.into_iter();

        for group in &batch.groups {
            let entry = entries.next();
            match group {
                BatchGroup::Single(index) => {
                    let part = match entry {
                        Some(BatchResponseEntry::Single(part)) => Some(part),
                        Some(BatchResponseEntry::ChangeSet(parts)) => parts.into_iter().next(),
                        None => None,
                    };
                    results[*index] = Some(match part {
                        Some(part) => interpret(&contexts[*index], &part.response),
                        None => Err(missing_part(*index)),
                    });
                }
                BatchGroup::ChangeSet { members, .. } => match entry {
                    Some(BatchResponseEntry::ChangeSet(parts)) => {
                        for (position, (index, content_id)) in members.iter().enumerate() {
                            let part = parts
                                .iter()
                                .find(|p| p.content_id.as_deref() == Some(content_id.as_str()))
                                .or_else(|| parts.get(position));
                            results[*index] = Some(match part {
                                Some(part) => interpret(&contexts[*index], &part.response),
                                None => Err(DynamicsError::ChangeSetRolledBack {
                                    content_id: content_id.clone(),
                                }),
                            });
                        }
                    }
                    Some(BatchResponseEntry::Single(part)) => {
                        let failed = members
                            .iter()
                            .position(|(_, id)| part.content_id.as_deref() == Some(id.as_str()))
                            .unwrap_or(0);
                        for (position, (index, content_id)) in members.iter().enumerate() {
                            results[*index] = Some(if position == failed {
                                interpret(&contexts[*index], &part.response)
                            } else {
                                Err(DynamicsError::ChangeSetRolledBack {
                                    content_id: content_id.clone(),
                                })
                            });
                        }
                    }
                    None => {
                        for (index, _) in members {
                            results[*index] = Some(Err(missing_part(*index)));
                        }
                    }
                },
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| result.unwrap_or_else(|| Err(missing_part(index))))
            .collect()
    }
}

fn missing_part(index: usize) -> DynamicsError {
    log::warn!("Batch response has no part for request #{}", index + 1);
    DynamicsError::UnexpectedResponse(Box::new(HttpError {
        status: 0,
        status_text: String::new(),
        headers: HashMap::new(),
        code: None,
        message: format!("batch response has no part for request #{}", index + 1),
        inner_error: None,
    }))
}

fn boundary_parameter(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Splits `text` at the first empty line
fn split_head(text: &str) -> (&str, &str) {
    match text.find("\n\n") {
        Some(position) => (&text[..position], &text[position + 2..]),
        None => (text, ""),
    }
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

fn parse_multipart(text: &str, boundary: &str, outer: &HttpResponse) -> Result<Vec<BatchResponseEntry>> {
    let delimiter = format!("--{}", boundary);
    let mut entries = Vec::new();

    for segment in text.split(delimiter.as_str()).skip(1) {
        if segment.starts_with("--") {
            break;
        }
        let segment = segment.trim_start_matches([' ', '\t', '\n']);
        let (mime_head, content) = split_head(segment);
        let mime = parse_headers(mime_head);

        let nested = mime
            .get("content-type")
            .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/mixed"))
            .and_then(|ct| boundary_parameter(ct));

        match nested {
            Some(nested) => {
                let parts = parse_multipart(content, &nested, outer)?
                    .into_iter()
                    .flat_map(|entry| match entry {
                        BatchResponseEntry::Single(part) => vec![part],
                        BatchResponseEntry::ChangeSet(parts) => parts,
                    })
                    .collect();
                entries.push(BatchResponseEntry::ChangeSet(parts));
            }
            None => {
                let mut part = parse_http_message(content, outer)?;
                if let Some(id) = mime.get("content-id") {
                    part.content_id = Some(id.clone());
                }
                entries.push(BatchResponseEntry::Single(part));
            }
        }
    }

    Ok(entries)
}

fn parse_http_message(content: &str, outer: &HttpResponse) -> Result<BatchPart> {
    let content = content.trim_start_matches('\n');
    let (head, body) = split_head(content);
    let mut lines = head.lines();

    let status_line = lines.next().unwrap_or_default().trim();
    let captures = STATUS_LINE_RE.captures(status_line).ok_or_else(|| {
        unexpected(
            outer,
            format!("malformed status line in batch response: '{}'", status_line),
        )
    })?;
    let status = captures[1]
        .parse::<u16>()
        .map_err(|e| unexpected(outer, format!("invalid status in batch response: {}", e)))?;

    let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"));
    let content_id = headers.get("content-id").cloned();

    Ok(BatchPart {
        content_id,
        response: HttpResponse {
            status,
            status_text: captures[2].trim().to_string(),
            headers,
            body: body.trim_end().as_bytes().to_vec(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::Config;
    use crate::api::operations::assembler::assemble;
    use crate::api::operations::operation::{Operation, Request, RequestOptions};
    use crate::api::query::QueryOptions;
    use serde_json::json;

    const BASE: &str = "https://org.crm.dynamics.com/api/data/v9.2/";
    const GUID: &str = "00000000-0000-0000-0000-000000000001";

    fn prepare(request: Request) -> PreparedRequest {
        assemble(&request, &Config::builder("https://org.crm.dynamics.com").build()).unwrap()
    }

    fn change_set_boundary(batch: &BatchRequest, group: usize) -> String {
        match &batch.groups[group] {
            BatchGroup::ChangeSet { boundary, .. } => boundary.clone(),
            other => panic!("expected change set, got {:?}", other),
        }
    }

    #[test]
    fn test_serialize_gets_and_change_set() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(
            Operation::retrieve_multiple("accounts", QueryOptions::new().select(&["name"])).into(),
        ));
        builder.add(prepare(Operation::create("accounts", json!({"name": "x"})).into()));
        builder.add(prepare(
            Operation::retrieve_multiple("contacts", QueryOptions::default()).into(),
        ));
        let batch = builder.build().unwrap();

        assert!(batch.boundary.starts_with("dwa_batch_"));
        assert_eq!(batch.groups.len(), 3);
        let cs = change_set_boundary(&batch, 1);
        assert!(cs.starts_with("changeset_"));

        let expected = [
            format!("\n--{}", batch.boundary),
            "Content-Type: application/http".to_string(),
            "Content-Transfer-Encoding: binary".to_string(),
            format!("\nGET {}accounts?$select=name HTTP/1.1", BASE),
            "Accept: application/json".to_string(),
            format!("\n--{}", batch.boundary),
            format!("Content-Type: multipart/mixed;boundary={}", cs),
            format!("\n--{}", cs),
            "Content-Type: application/http".to_string(),
            "Content-Transfer-Encoding: binary".to_string(),
            "Content-ID: 100001".to_string(),
            format!("\nPOST {}accounts HTTP/1.1", BASE),
            "Content-Type: application/json".to_string(),
            "\n{\"name\":\"x\"}".to_string(),
            format!("\n--{}--", cs),
            format!("\n--{}", batch.boundary),
            "Content-Type: application/http".to_string(),
            "Content-Transfer-Encoding: binary".to_string(),
            format!("\nGET {}contacts HTTP/1.1", BASE),
            "Accept: application/json".to_string(),
            format!("\n--{}--\n", batch.boundary),
        ]
        .join("\n");
        assert_eq!(batch.body, expected);
        assert_eq!(batch.content_type(), format!("multipart/mixed;boundary={}", batch.boundary));
    }

    #[test]
    fn test_user_content_ids_and_references() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(
            Request::new(Operation::create("accounts", json!({"name": "x"}))).with_options(
                RequestOptions {
                    content_id: Some("1".into()),
                    token: Some("secret".into()),
                    ..Default::default()
                },
            ),
        ));
        builder.add(prepare(
            Operation::create(
                "contacts",
                json!({"parentcustomerid_account@odata.bind": "$1"}),
            )
            .into(),
        ));
        let batch = builder.build().unwrap();

        assert_eq!(batch.groups.len(), 1);
        match &batch.groups[0] {
            BatchGroup::ChangeSet { members, .. } => {
                assert_eq!(members, &vec![(0, "1".to_string()), (1, "100001".to_string())]);
            }
            other => panic!("expected change set, got {:?}", other),
        }
        assert!(batch.body.contains("Content-ID: 1\n"));
        assert!(batch.body.contains("{\"parentcustomerid_account@odata.bind\":\"$1\"}"));
        assert!(!batch.body.contains("Authorization"));
        assert!(!batch.body.contains("secret"));
    }

    #[test]
    fn test_request_lines_stay_three_tokens() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(
            Operation::retrieve_multiple("accounts", QueryOptions::new().order_by(&["name asc"]))
                .into(),
        ));
        builder.add(prepare(
            Operation::retrieve("contacts", "fullname='Jane Doe'", QueryOptions::default()).into(),
        ));
        let batch = builder.build().unwrap();

        let lines: Vec<&str> = batch
            .body
            .lines()
            .filter(|line| line.ends_with(" HTTP/1.1"))
            .collect();
        assert_eq!(
            lines,
            vec![
                format!("GET {}accounts?$orderby=name%20asc HTTP/1.1", BASE),
                format!("GET {}contacts(fullname='Jane%20Doe') HTTP/1.1", BASE),
            ]
        );
        assert!(lines.iter().all(|line| line.split(' ').count() == 3));
    }

    #[test]
    fn test_change_sets_can_be_disabled() {
        let mut builder = BatchRequestBuilder::new().change_sets(false);
        builder.add(prepare(Operation::create("accounts", json!({})).into()));
        builder.add(prepare(Operation::delete("accounts", GUID).into()));
        let batch = builder.build().unwrap();

        assert_eq!(batch.groups, vec![BatchGroup::Single(0), BatchGroup::Single(1)]);
        assert!(!batch.body.contains("changeset_"));
    }

    #[test]
    fn test_request_outside_change_set_closes_it() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(Operation::create("accounts", json!({})).into()));
        builder.add(prepare(
            Request::new(Operation::delete("accounts", GUID)).with_options(RequestOptions {
                in_change_set: Some(false),
                ..Default::default()
            }),
        ));
        let batch = builder.build().unwrap();
        assert!(matches!(batch.groups[0], BatchGroup::ChangeSet { .. }));
        assert_eq!(batch.groups[1], BatchGroup::Single(1));
    }

    fn batch_response(body: &str) -> HttpResponse {
        HttpResponse::new(200)
            .with_header("Content-Type", "multipart/mixed; boundary=batchresponse_1")
            .with_body(body.replace('\n', "\r\n"))
    }

    const RESPONSE: &str = "--batchresponse_1
Content-Type: application/http
Content-Transfer-Encoding: binary

HTTP/1.1 200 OK
Content-Type: application/json; odata.metadata=minimal
OData-Version: 4.0

{\"@odata.context\":\"ctx\",\"value\":[{\"name\":\"a\"}]}
--batchresponse_1
Content-Type: multipart/mixed; boundary=changesetresponse_2

--changesetresponse_2
Content-Type: application/http
Content-Transfer-Encoding: binary
Content-ID: 100001

HTTP/1.1 204 No Content
OData-Version: 4.0
OData-EntityId: https://org.crm.dynamics.com/api/data/v9.2/accounts(00000000-0000-0000-0000-000000000001)


--changesetresponse_2--
--batchresponse_1
Content-Type: application/http
Content-Transfer-Encoding: binary

HTTP/1.1 200 OK
Content-Type: application/json; odata.metadata=minimal

{\"value\":[{\"fullname\":\"b\"}],\"@odata.nextLink\":\"https://next\"}
--batchresponse_1--
";

    #[test]
    fn test_parse_batch_response() {
        let entries = BatchResponseParser::parse(&batch_response(RESPONSE)).unwrap();
        assert_eq!(entries.len(), 3);

        match &entries[1] {
            BatchResponseEntry::ChangeSet(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].content_id.as_deref(), Some("100001"));
                assert_eq!(parts[0].response.status, 204);
                assert_eq!(parts[0].response.status_text, "No Content");
                assert!(parts[0].response.body.is_empty());
            }
            other => panic!("expected change set, got {:?}", other),
        }
        match &entries[2] {
            BatchResponseEntry::Single(part) => {
                assert_eq!(part.response.status, 200);
                assert_eq!(
                    part.response.header("content-type"),
                    Some("application/json; odata.metadata=minimal")
                );
            }
            other => panic!("expected single part, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_falls_back_to_first_line() {
        let response = HttpResponse::new(200).with_body(RESPONSE);
        assert_eq!(BatchResponseParser::parse(&response).unwrap().len(), 3);
    }

    #[test]
    fn test_assemble_results_in_submission_order() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(
            Operation::retrieve_multiple("accounts", QueryOptions::default()).into(),
        ));
        builder.add(prepare(Operation::create("accounts", json!({"name": "x"})).into()));
        builder.add(prepare(
            Operation::retrieve_multiple("contacts", QueryOptions::default()).into(),
        ));
        let batch = builder.build().unwrap();

        let entries = BatchResponseParser::parse(&batch_response(RESPONSE)).unwrap();
        let results = BatchResponseParser::assemble(&batch, entries);
        assert_eq!(results.len(), 3);

        let first = results[0].as_ref().unwrap().clone().into_collection().unwrap();
        assert_eq!(first.value, vec![json!({"name": "a"})]);
        assert_eq!(results[1].as_ref().unwrap(), &ResponseValue::Id(GUID.to_string()));
        let third = results[2].as_ref().unwrap().clone().into_collection().unwrap();
        assert_eq!(third.next_link.as_deref(), Some("https://next"));
    }

    #[test]
    fn test_failed_change_set_rolls_back_other_members() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(Operation::create("accounts", json!({"name": "x"})).into()));
        builder.add(prepare(Operation::create("contacts", json!({"lastname": "y"})).into()));
        builder.add(prepare(
            Operation::retrieve_multiple("accounts", QueryOptions::default()).into(),
        ));
        let batch = builder.build().unwrap();

        let body = "--batchresponse_1
Content-Type: application/http
Content-Transfer-Encoding: binary
Content-ID: 100002

HTTP/1.1 400 Bad Request
Content-Type: application/json; odata.metadata=minimal

{\"error\":{\"code\":\"0x80040203\",\"message\":\"lastname is invalid\"}}
--batchresponse_1
Content-Type: application/http
Content-Transfer-Encoding: binary

HTTP/1.1 200 OK

{\"value\":[]}
--batchresponse_1--
";
        let entries = BatchResponseParser::parse(&batch_response(body)).unwrap();
        let results = BatchResponseParser::assemble(&batch, entries);

        assert!(matches!(
            &results[0],
            Err(DynamicsError::ChangeSetRolledBack { content_id }) if content_id == "100001"
        ));
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.to_string(), "lastname is invalid");
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_missing_parts_become_errors() {
        let mut builder = BatchRequestBuilder::new();
        builder.add(prepare(
            Operation::retrieve_multiple("accounts", QueryOptions::default()).into(),
        ));
        builder.add(prepare(
            Operation::retrieve_multiple("contacts", QueryOptions::default()).into(),
        ));
        let batch = builder.build().unwrap();

        let body = "--batchresponse_1
Content-Type: application/http
Content-Transfer-Encoding: binary

HTTP/1.1 200 OK

{\"value\":[]}
--batchresponse_1--
";
        let entries = BatchResponseParser::parse(&batch_response(body)).unwrap();
        let results = BatchResponseParser::assemble(&batch, entries);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DynamicsError::UnexpectedResponse(_))));
    }

    #[test]
    fn test_malformed_part_is_rejected() {
        let body = "--batchresponse_1
Content-Type: application/http

garbage
--batchresponse_1--
";
        assert!(BatchResponseParser::parse(&batch_response(body)).is_err());
    }
}
