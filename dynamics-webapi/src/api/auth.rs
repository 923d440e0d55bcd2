//! Token acquisition capability
//!
//! The client never talks to an identity provider itself. It asks a
//! [`TokenProvider`] for a token before every call that does not carry an
//! explicit token, so concurrent calls each get their own refreshed value.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;

use super::error::Result;

/// A bearer token as handed out by a token provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AccessToken {
    Raw(String),
    Object {
        #[serde(rename = "accessToken")]
        access_token: String,
    },
}

impl AccessToken {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw(token) => token,
            Self::Object { access_token } => access_token,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self::Raw(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self::Raw(value.to_string())
    }
}

/// Supplies bearer tokens on demand. `Ok(None)` aborts the request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<Option<AccessToken>>;
}

/// Always returns the same token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<Option<AccessToken>> {
        Ok(Some(AccessToken::Raw(self.token.clone())))
    }
}

/// Adapts an async closure into a [`TokenProvider`]
pub struct FnTokenProvider<F>
where
    F: Fn() -> BoxFuture<'static, Result<Option<AccessToken>>> + Send + Sync,
{
    refresh: F,
}

impl<F> FnTokenProvider<F>
where
    F: Fn() -> BoxFuture<'static, Result<Option<AccessToken>>> + Send + Sync,
{
    pub fn new(refresh: F) -> Self {
        Self { refresh }
    }
}

#[async_trait]
impl<F> TokenProvider for FnTokenProvider<F>
where
    F: Fn() -> BoxFuture<'static, Result<Option<AccessToken>>> + Send + Sync,
{
    async fn token(&self) -> Result<Option<AccessToken>> {
        (self.refresh)().await
    }
}
