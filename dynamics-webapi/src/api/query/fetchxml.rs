//! FetchXML paging support
//!
//! Dataverse pages FetchXML results with a `page` number and an opaque
//! paging cookie returned in the
//! `@Microsoft.Dynamics.CRM.fetchxmlpagingcookie` annotation. The cookie
//! comes back double URL-encoded inside a `<cookie>` element and has to be
//! sent back XML-escaped in the `paging-cookie` attribute of `<fetch>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::api::error::{DynamicsError, Result};

static FETCH_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*<fetch)\b").expect("valid fetch regex"));

static FETCH_HAS_PAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*<fetch\b[^>]*\spage\s*="#).expect("valid fetch regex"));

/// Paging state extracted from a FetchXML response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingInfo {
    /// XML-escaped cookie, ready for the `paging-cookie` attribute
    pub cookie: String,
    pub page: u32,
    pub next_page: u32,
}

/// Adds `page` and `paging-cookie` attributes to the `<fetch>` element.
/// A query that already carries a `page` attribute is left untouched.
pub fn inject_paging(fetch_xml: &str, page: u32, cookie: Option<&str>, operation: &str) -> Result<String> {
    if !FETCH_START_RE.is_match(fetch_xml) {
        return Err(DynamicsError::invalid(
            operation,
            "fetch_xml must start with a <fetch> element",
        ));
    }
    if FETCH_HAS_PAGE_RE.is_match(fetch_xml) {
        return Ok(fetch_xml.to_string());
    }

    let mut attributes = format!(" page=\"{}\"", page);
    if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
        attributes.push_str(&format!(" paging-cookie=\"{}\"", cookie));
    }
    Ok(FETCH_START_RE
        .replace(fetch_xml, |caps: &regex::Captures| format!("{}{}", &caps[1], attributes))
        .into_owned())
}

/// Parses the paging cookie annotation. Falls back to advancing the
/// current page number when the cookie cannot be read.
pub fn parse_paging_cookie(annotation: &str, current_page: u32) -> PagingInfo {
    match read_cookie(annotation) {
        Some((cookie, page)) => PagingInfo {
            cookie: escape_xml(&cookie),
            page,
            next_page: page.saturating_add(1),
        },
        None => {
            log::warn!("Could not parse FetchXML paging cookie, continuing without it");
            PagingInfo {
                cookie: String::new(),
                page: current_page,
                next_page: current_page.saturating_add(1),
            }
        }
    }
}

fn read_cookie(annotation: &str) -> Option<(String, u32)> {
    let outer = roxmltree::Document::parse(annotation).ok()?;
    let encoded = outer.root_element().attribute("pagingcookie")?;

    let once = urlencoding::decode(encoded).ok()?;
    let decoded = urlencoding::decode(&once).ok()?.into_owned();

    let inner = roxmltree::Document::parse(&decoded).ok()?;
    let page = inner.root_element().attribute("page")?.parse::<u32>().ok()?;
    Some((decoded, page))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOTATION: &str = r#"<cookie pagenumber="2" pagingcookie="%253ccookie%2520page%253d%25221%2522%253e%253caccountid%2520last%253d%2522%257bEF72AE29-B3DE-E611-8102-5065F38A7BF1%257d%2522%2520first%253d%2522%257b475B158C-541C-E511-80D3-3863BB347BA8%257d%2522%2520%252f%253e%253c%252fcookie%253e" istracking="False" />"#;

    #[test]
    fn test_parse_paging_cookie() {
        let info = parse_paging_cookie(ANNOTATION, 1);
        assert_eq!(info.page, 1);
        assert_eq!(info.next_page, 2);
        assert_eq!(
            info.cookie,
            "&lt;cookie page=&quot;1&quot;&gt;&lt;accountid last=&quot;{EF72AE29-B3DE-E611-8102-5065F38A7BF1}&quot; first=&quot;{475B158C-541C-E511-80D3-3863BB347BA8}&quot; /&gt;&lt;/cookie&gt;"
        );
    }

    #[test]
    fn test_parse_paging_cookie_fallback() {
        let info = parse_paging_cookie("garbage", 3);
        assert_eq!(info.cookie, "");
        assert_eq!(info.page, 3);
        assert_eq!(info.next_page, 4);
    }

    #[test]
    fn test_last_page_number_does_not_overflow() {
        let annotation = r#"<cookie pagenumber="2" pagingcookie="%253ccookie%2520page%253d%25224294967295%2522%2520%252f%253e" />"#;
        let info = parse_paging_cookie(annotation, 1);
        assert_eq!(info.page, u32::MAX);
        assert_eq!(info.next_page, u32::MAX);

        let info = parse_paging_cookie("garbage", u32::MAX);
        assert_eq!(info.next_page, u32::MAX);
    }

    #[test]
    fn test_inject_paging() {
        let fetch = r#"<fetch mapping="logical"><entity name="account"/></fetch>"#;
        assert_eq!(
            inject_paging(fetch, 1, None, "fetch").unwrap(),
            r#"<fetch page="1" mapping="logical"><entity name="account"/></fetch>"#
        );
        assert_eq!(
            inject_paging(fetch, 2, Some("&lt;cookie/&gt;"), "fetch").unwrap(),
            r#"<fetch page="2" paging-cookie="&lt;cookie/&gt;" mapping="logical"><entity name="account"/></fetch>"#
        );
    }

    #[test]
    fn test_inject_paging_keeps_explicit_page() {
        let fetch = r#"<fetch page="5" count="10"><entity name="account"/></fetch>"#;
        assert_eq!(inject_paging(fetch, 1, None, "fetch").unwrap(), fetch);
    }

    #[test]
    fn test_inject_paging_rejects_non_fetch() {
        assert!(inject_paging("<entity/>", 1, None, "fetch").is_err());
    }
}
