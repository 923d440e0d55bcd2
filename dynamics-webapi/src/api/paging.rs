//! Pagination and change tracking
//!
//! A next-link or delta-link already encodes the whole query, so following
//! one only replays the headers of the original request (annotation
//! preference, page size, impersonation) against the absolute link.

use reqwest::Method;
use serde_json::Value;

use crate::api::operations::{Collection, PreparedRequest, ResponseContext};
use crate::api::transport::{Headers, HttpRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `@odata.nextLink`: more pages of the same result
    Next,
    /// `@odata.deltaLink`: changes since the original query
    Delta,
}

/// Resumes a collection query from a server-issued link
#[derive(Debug, Clone)]
pub struct ContinuationToken {
    pub url: String,
    pub kind: LinkKind,
    headers: Headers,
    context: ResponseContext,
}

impl ContinuationToken {
    pub fn new(original: &PreparedRequest, url: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            url: url.into(),
            kind,
            headers: original.http.headers.clone(),
            context: original.context.clone(),
        }
    }

    /// Token for whatever follows `page`: the next page if there is one,
    /// otherwise its delta link
    pub fn after(original: &PreparedRequest, page: &Collection) -> Option<Self> {
        if let Some(next) = &page.next_link {
            return Some(Self::new(original, next.clone(), LinkKind::Next));
        }
        page.delta_link
            .as_ref()
            .map(|delta| Self::new(original, delta.clone(), LinkKind::Delta))
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// GET to the link with the original headers
    pub fn into_request(self) -> PreparedRequest {
        let mut http = HttpRequest::new(Method::GET, self.url);
        http.headers = self.headers;
        PreparedRequest {
            http,
            context: self.context,
            in_change_set: false,
        }
    }
}

/// Folds pages into one collection
#[derive(Debug, Clone, Default)]
pub struct PageAccumulator {
    value: Vec<Value>,
    count: Option<u64>,
    delta_link: Option<String>,
    context: Option<String>,
    pages: usize,
}

impl PageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page and returns its next link, if more pages follow
    pub fn push(&mut self, page: Collection) -> Option<String> {
        self.pages += 1;
        self.value.extend(page.value);
        if self.count.is_none() {
            self.count = page.count;
        }
        if self.context.is_none() {
            self.context = page.context;
        }
        if page.delta_link.is_some() {
            self.delta_link = page.delta_link;
        }
        page.next_link
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The concatenated result; never carries a next link
    pub fn finish(self) -> Collection {
        Collection {
            value: self.value,
            next_link: None,
            delta_link: self.delta_link,
            count: self.count,
            context: self.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::Config;
    use crate::api::operations::{Operation, Request, RequestOptions, assemble};
    use crate::api::query::QueryOptions;
    use serde_json::json;

    fn page(values: Vec<Value>, next: Option<&str>, delta: Option<&str>) -> Collection {
        Collection {
            value: values,
            next_link: next.map(str::to_string),
            delta_link: delta.map(str::to_string),
            count: None,
            context: Some("ctx".into()),
        }
    }

    #[test]
    fn test_accumulator_concatenates_pages() {
        let mut pages = PageAccumulator::new();
        assert_eq!(
            pages.push(page(vec![json!({"n": 1})], Some("https://next"), None)),
            Some("https://next".to_string())
        );
        assert_eq!(
            pages.push(page(vec![json!({"n": 2}), json!({"n": 3})], None, Some("https://delta"))),
            None
        );
        assert_eq!(pages.pages(), 2);

        let all = pages.finish();
        assert_eq!(all.value, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        assert_eq!(all.next_link, None);
        assert_eq!(all.delta_link.as_deref(), Some("https://delta"));
        assert_eq!(all.context.as_deref(), Some("ctx"));
    }

    #[test]
    fn test_token_replays_original_headers() {
        let config = Config::builder("https://org.crm.dynamics.com").build();
        let request = Request::new(Operation::retrieve_multiple(
            "accounts",
            QueryOptions::new().select(&["name"]),
        ))
        .with_options(RequestOptions {
            max_page_size: Some(2),
            include_annotations: Some("*".into()),
            ..Default::default()
        });
        let original = assemble(&request, &config).unwrap();

        let token = ContinuationToken::after(
            &original,
            &page(vec![], Some("https://org/next?$skiptoken=1"), None),
        )
        .unwrap();
        assert_eq!(token.kind, LinkKind::Next);

        let next = token.into_request();
        assert_eq!(next.http.method, Method::GET);
        assert_eq!(next.http.url, "https://org/next?$skiptoken=1");
        assert_eq!(next.http.headers, original.http.headers);
        assert_eq!(next.context, original.context);
    }

    #[test]
    fn test_token_falls_back_to_delta_link() {
        let config = Config::builder("https://org.crm.dynamics.com").build();
        let original = assemble(
            &Request::new(Operation::retrieve_multiple("accounts", QueryOptions::default())),
            &config,
        )
        .unwrap();

        let token = ContinuationToken::after(&original, &page(vec![], None, Some("https://delta")));
        assert_eq!(token.map(|t| t.kind), Some(LinkKind::Delta));
        assert!(ContinuationToken::after(&original, &page(vec![], None, None)).is_none());
    }
}
