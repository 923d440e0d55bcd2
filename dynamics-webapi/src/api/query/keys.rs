//! Record keys, URL segments and percent encoding
//!
//! A record key is either a GUID (braces allowed, stripped on output) or an
//! alternate key expression such as `name='Contoso'` or the composite
//! `firstname='Jane',lastname='Doe'`, which is passed through as one opaque
//! path segment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::api::error::{DynamicsError, Result};

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{?([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\}?$")
        .expect("valid uuid regex")
});

static UUID_IN_PARENS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\)")
        .expect("valid uuid regex")
});

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(\w+)\(([0-9a-fA-F]{8}-?(?:[0-9a-fA-F]{4}-?){3}[0-9a-fA-F]{12})\)")
        .expect("valid reference regex")
});

static ALTERNATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+=(.+)$").expect("valid alternate key regex"));

static FILTER_GUID_BRACES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^"'])\{([0-9a-fA-F]{8}-?(?:[0-9a-fA-F]{4}-?){3}[0-9a-fA-F]{12})\}([^"']|$)"#)
        .expect("valid filter regex")
});

static CONTENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$[\w-]+").expect("valid content id regex"));

/// Returns the bare GUID if `value` is one (optionally wrapped in braces)
pub fn extract_uuid(value: &str) -> Option<String> {
    UUID_RE
        .captures(value.trim())
        .map(|caps| caps[1].to_string())
}

/// Extracts the GUID from the last `(...)` segment of an entity URL,
/// e.g. `.../accounts(00000000-0000-0000-0000-000000000001)`
pub fn extract_uuid_from_url(url: &str) -> Option<String> {
    UUID_IN_PARENS_RE
        .captures_iter(url)
        .last()
        .map(|caps| caps[1].to_string())
}

/// Splits an `@odata.id` URL into `(collection, id)`
pub fn parse_reference(url: &str) -> Option<(String, String)> {
    REFERENCE_RE
        .captures_iter(url)
        .last()
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Normalises a record key into the text placed between the parentheses
/// of `collection(...)`.
pub fn key_parameter(key: &str, operation: &str, parameter: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(key_error(operation, parameter));
    }

    if let Some(uuid) = extract_uuid(key) {
        return Ok(uuid);
    }

    let parts = split_outside_quotes(key, ',');
    let mut normalized = Vec::with_capacity(parts.len());
    for part in parts {
        let part = part.trim().replace('"', "'");
        if !ALTERNATE_KEY_RE.is_match(&part) {
            return Err(key_error(operation, parameter));
        }
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| key_error(operation, parameter))?;
        normalized.push(format!("{}={}", name, encode_component(value)));
    }
    Ok(normalized.join(","))
}

fn key_error(operation: &str, parameter: &str) -> DynamicsError {
    DynamicsError::invalid(
        operation,
        format!("{} parameter must be a String representing GUID or Alternate Key", parameter),
    )
}

fn split_outside_quotes(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, ch) in value.char_indices() {
        if ch == '\'' || ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&value[start..index]);
            start = index + ch.len_utf8();
        }
    }
    parts.push(&value[start..]);
    parts
}

/// `$1`, `$contact` etc. refer to an earlier request of the same batch.
/// `$batch` and `$metadata` are service paths, not references.
pub fn is_content_id_reference(path: &str) -> bool {
    CONTENT_ID_RE.is_match(path) && !path.starts_with("$batch") && !path.starts_with("$metadata")
}

/// Rejects names that would break out of their URL path segment
pub fn validate_segment(value: &str, operation: &str, parameter: &str) -> Result<()> {
    let invalid = value.trim().is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '&' | '%' | '\'' | '"'));
    if invalid {
        return Err(DynamicsError::invalid(
            operation,
            format!("{} '{}' is not a valid URL path segment", parameter, value),
        ));
    }
    Ok(())
}

/// Percent-encodes a query value like `encodeURIComponent`, keeping the
/// characters OData syntax relies on (`'`, `(`, `)`, `,`, `!`, `*`) raw.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2C", ",")
        .replace("%21", "!")
        .replace("%2A", "*")
}

/// Removes braces around GUIDs in a filter unless the GUID is quoted
pub fn remove_guid_braces(filter: &str) -> String {
    // Matches can share their boundary character, so repeat until stable.
    let mut current = filter.to_string();
    loop {
        let next = FILTER_GUID_BRACES_RE
            .replace_all(&current, "${1}${2}${3}")
            .into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "00000000-0000-0000-0000-000000000001";

    #[test]
    fn test_extract_uuid() {
        assert_eq!(extract_uuid(GUID).as_deref(), Some(GUID));
        assert_eq!(extract_uuid(&format!("{{{}}}", GUID)).as_deref(), Some(GUID));
        assert_eq!(extract_uuid("name='x'"), None);
    }

    #[test]
    fn test_extract_uuid_from_url() {
        let url = format!("https://org.crm.dynamics.com/api/data/v9.2/accounts({})", GUID);
        assert_eq!(extract_uuid_from_url(&url).as_deref(), Some(GUID));
        assert_eq!(extract_uuid_from_url("accounts(name='x')"), None);
    }

    #[test]
    fn test_parse_reference() {
        let url = format!("https://org.crm.dynamics.com/api/data/v9.2/contacts({})", GUID);
        assert_eq!(
            parse_reference(&url),
            Some(("contacts".to_string(), GUID.to_string()))
        );
    }

    #[test]
    fn test_key_parameter_guid() {
        assert_eq!(key_parameter(&format!("{{{}}}", GUID), "retrieve", "key").unwrap(), GUID);
    }

    #[test]
    fn test_key_parameter_alternate_keys() {
        assert_eq!(
            key_parameter("alternateKey='keyValue'", "retrieve", "key").unwrap(),
            "alternateKey='keyValue'"
        );
        assert_eq!(
            key_parameter("key1=\"a\", key2=5", "retrieve", "key").unwrap(),
            "key1='a',key2=5"
        );
        assert_eq!(
            key_parameter("name='a,b'", "retrieve", "key").unwrap(),
            "name='a,b'"
        );
    }

    #[test]
    fn test_key_parameter_encodes_literal_values() {
        assert_eq!(
            key_parameter("fullname='Jane Doe'", "retrieve", "key").unwrap(),
            "fullname='Jane%20Doe'"
        );
        assert_eq!(
            key_parameter("code='A#1?', region=2", "retrieve", "key").unwrap(),
            "code='A%231%3F',region=2"
        );
    }

    #[test]
    fn test_key_parameter_rejects_garbage() {
        assert!(key_parameter("not a key", "retrieve", "key").is_err());
        assert!(key_parameter("", "retrieve", "key").is_err());
    }

    #[test]
    fn test_content_id_reference() {
        assert!(is_content_id_reference("$1"));
        assert!(is_content_id_reference("$contact"));
        assert!(!is_content_id_reference("$batch"));
        assert!(!is_content_id_reference("$metadata"));
        assert!(!is_content_id_reference("accounts"));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("accounts", "retrieve", "collection").is_ok());
        assert!(validate_segment("Microsoft.Dynamics.CRM.WhoAmI", "callFunction", "name").is_ok());
        assert!(validate_segment("accounts/../x", "retrieve", "collection").is_err());
        assert!(validate_segment("accounts?x=1", "retrieve", "collection").is_err());
        assert!(validate_segment(" ", "retrieve", "collection").is_err());
    }

    #[test]
    fn test_encode_component_keeps_odata_syntax() {
        assert_eq!(
            encode_component("name eq 'a,b' and (x)"),
            "name%20eq%20'a,b'%20and%20(x)"
        );
        assert_eq!(encode_component("<fetch/>"), "%3Cfetch%2F%3E");
    }

    #[test]
    fn test_remove_guid_braces() {
        let filter = format!("accountid eq {{{}}}", GUID);
        assert_eq!(remove_guid_braces(&filter), format!("accountid eq {}", GUID));

        let quoted = format!("name eq '{{{}}}'", GUID);
        assert_eq!(remove_guid_braces(&quoted), quoted);
    }
}
