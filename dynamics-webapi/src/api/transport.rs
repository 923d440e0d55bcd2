//! HTTP transport capability
//!
//! The engine only ever produces [`HttpRequest`] descriptors and consumes
//! [`HttpResponse`]s; a [`Transport`] moves them over the wire. Transport
//! failures are reported as [`DynamicsError::Transport`] or
//! [`DynamicsError::Timeout`], never as HTTP statuses.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::config::Config;
use super::error::{DynamicsError, Result};

/// Request headers, in a stable order
pub type Headers = BTreeMap<String, String>;

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Json(value) => Ok(serde_json::to_vec(value)?),
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Textual form used inside a multipart batch body
    pub fn to_text(&self) -> Result<String> {
        match self {
            Self::Json(value) => Ok(serde_json::to_string(value)?),
            Self::Text(text) => Ok(text.clone()),
            Self::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

/// A fully assembled HTTP call
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL, or a `$<contentId>` reference inside a batch
    pub url: String,
    pub headers: Headers,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }
}

/// A raw HTTP response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Keys are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one HTTP request. Implementations must allow concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse>;
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(proxy) = &config.proxy {
            let mut reqwest_proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| DynamicsError::Config(format!("invalid proxy url: {}", e)))?;
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DynamicsError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_bytes()?);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> DynamicsError {
    if err.is_timeout() {
        DynamicsError::Timeout
    } else {
        DynamicsError::Transport(err.to_string())
    }
}
