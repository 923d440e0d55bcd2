//! Client configuration with builder pattern
//!
//! A [`Config`] is an immutable snapshot. Reconfiguring a client swaps in a
//! new snapshot, and child clients are built from a merged copy, so a
//! parent never sees a child's overrides.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::auth::TokenProvider;
use super::constants::{self, headers};
use super::error::{DynamicsError, Result};
use super::resilience::ConcurrencyConfig;

/// Session-wide defaults applied to every request
#[derive(Clone)]
pub struct Config {
    /// Organization URL, e.g. `https://contoso.crm.dynamics.com`
    pub server_url: String,
    pub api_version: String,
    /// Default `MSCRMCallerID` (systemuserid)
    pub impersonate: Option<String>,
    /// Default `CallerObjectId` (Azure AD object id)
    pub impersonate_aad: Option<String>,
    pub include_annotations: Option<String>,
    pub max_page_size: Option<u32>,
    pub return_representation: bool,
    /// Resolve logical entity names to entity set names before building URLs
    pub use_entity_names: bool,
    /// Per transport call, including every chunk and every page
    pub timeout: Option<Duration>,
    pub proxy: Option<ProxyConfig>,
    pub chunk_size: usize,
    pub max_url_length: usize,
    pub bypass: BypassConfig,
    pub concurrency: ConcurrencyConfig,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("api_version", &self.api_version)
            .field("impersonate", &self.impersonate)
            .field("impersonate_aad", &self.impersonate_aad)
            .field("include_annotations", &self.include_annotations)
            .field("max_page_size", &self.max_page_size)
            .field("return_representation", &self.return_representation)
            .field("use_entity_names", &self.use_entity_names)
            .field("timeout", &self.timeout)
            .field("proxy", &self.proxy)
            .field("chunk_size", &self.chunk_size)
            .field("max_url_length", &self.max_url_length)
            .field("bypass", &self.bypass)
            .field("concurrency", &self.concurrency)
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}

/// Outgoing HTTP proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Configuration for bypassing Dynamics 365 custom business logic
///
/// These options allow bypassing plugins, workflows, and Power Automate flows
/// during API operations. Useful for data migrations and bulk operations.
///
/// Note: Most bypass options require the user to have the `prvBypassCustomBusinessLogic`
/// privilege in Dynamics 365. Only `power_automate_flows` bypass requires no special privilege.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassConfig {
    /// Bypass synchronous custom plugins and real-time workflows
    pub custom_sync: bool,
    /// Bypass asynchronous custom plugins and workflows (not Power Automate flows)
    pub custom_async: bool,
    /// Bypass specific plugin steps by GUID
    pub step_ids: Vec<String>,
    /// Bypass Power Automate flows triggered by Dataverse events
    pub power_automate_flows: bool,
}

impl BypassConfig {
    /// Check if any bypass options are enabled
    pub fn is_enabled(&self) -> bool {
        self.custom_sync
            || self.custom_async
            || !self.step_ids.is_empty()
            || self.power_automate_flows
    }

    /// Create a config that bypasses all custom logic (plugins, workflows, flows)
    pub fn all() -> Self {
        Self {
            custom_sync: true,
            custom_async: true,
            step_ids: Vec::new(),
            power_automate_flows: true,
        }
    }

    /// Request headers implementing the enabled bypass options
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut result = Vec::new();

        let mut logic = Vec::new();
        if self.custom_sync {
            logic.push("CustomSync");
        }
        if self.custom_async {
            logic.push("CustomAsync");
        }
        if !logic.is_empty() {
            result.push((headers::BYPASS_BUSINESS_LOGIC_EXECUTION, logic.join(",")));
        }
        if !self.step_ids.is_empty() {
            result.push((headers::BYPASS_STEP_IDS, self.step_ids.join(",")));
        }
        if self.power_automate_flows {
            result.push((headers::BYPASS_POWER_AUTOMATE_FLOWS, "true".to_string()));
        }
        result
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_version: constants::DEFAULT_API_VERSION.to_string(),
            impersonate: None,
            impersonate_aad: None,
            include_annotations: None,
            max_page_size: None,
            return_representation: false,
            use_entity_names: false,
            timeout: None,
            proxy: None,
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            max_url_length: constants::DEFAULT_MAX_URL_LENGTH,
            bypass: BypassConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            token_provider: None,
        }
    }
}

impl Config {
    /// Create a new builder for Config
    pub fn builder(server_url: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(server_url)
    }

    /// Base URL of the data API, always ending with `/`
    ///
    /// `https://org.crm.dynamics.com` + `9.2` → `https://org.crm.dynamics.com/api/data/v9.2/`
    pub fn data_api_url(&self) -> String {
        format!(
            "{}/api/data/v{}/",
            self.server_url.trim_end_matches('/'),
            self.api_version
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(DynamicsError::Config("server_url is required".into()));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(DynamicsError::Config(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }
        if self.chunk_size == 0 {
            return Err(DynamicsError::Config("chunk_size must be positive".into()));
        }
        Ok(())
    }

    /// Copy of this config with every set override applied
    pub fn merged(&self, overrides: &ConfigOverrides) -> Config {
        let mut config = self.clone();
        if let Some(server_url) = &overrides.server_url {
            config.server_url = server_url.clone();
        }
        if let Some(api_version) = &overrides.api_version {
            config.api_version = api_version.clone();
        }
        if let Some(impersonate) = &overrides.impersonate {
            config.impersonate = Some(impersonate.clone());
        }
        if let Some(impersonate_aad) = &overrides.impersonate_aad {
            config.impersonate_aad = Some(impersonate_aad.clone());
        }
        if let Some(include_annotations) = &overrides.include_annotations {
            config.include_annotations = Some(include_annotations.clone());
        }
        if let Some(max_page_size) = overrides.max_page_size {
            config.max_page_size = Some(max_page_size);
        }
        if let Some(return_representation) = overrides.return_representation {
            config.return_representation = return_representation;
        }
        if let Some(use_entity_names) = overrides.use_entity_names {
            config.use_entity_names = use_entity_names;
        }
        if let Some(timeout) = overrides.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(proxy) = &overrides.proxy {
            config.proxy = Some(proxy.clone());
        }
        if let Some(chunk_size) = overrides.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(max_url_length) = overrides.max_url_length {
            config.max_url_length = max_url_length;
        }
        if let Some(bypass) = &overrides.bypass {
            config.bypass = bypass.clone();
        }
        if let Some(concurrency) = &overrides.concurrency {
            config.concurrency = concurrency.clone();
        }
        if let Some(token_provider) = &overrides.token_provider {
            config.token_provider = Some(token_provider.clone());
        }
        config
    }

    /// Load config from `DYNAMICS_*` environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let server_url = std::env::var("DYNAMICS_SERVER_URL")
            .map_err(|_| DynamicsError::Config("DYNAMICS_SERVER_URL is not set".into()))?;

        let mut builder = ConfigBuilder::new(server_url);
        if let Ok(version) = std::env::var("DYNAMICS_API_VERSION") {
            builder = builder.api_version(version);
        }
        if let Ok(caller) = std::env::var("DYNAMICS_IMPERSONATE") {
            builder = builder.impersonate(caller);
        }
        if let Ok(size) = std::env::var("DYNAMICS_MAX_PAGE_SIZE") {
            let size = size.parse::<u32>().map_err(|e| {
                DynamicsError::Config(format!("DYNAMICS_MAX_PAGE_SIZE: {}", e))
            })?;
            builder = builder.max_page_size(size);
        }
        if let Ok(ms) = std::env::var("DYNAMICS_TIMEOUT_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|e| DynamicsError::Config(format!("DYNAMICS_TIMEOUT_MS: {}", e)))?;
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

/// Partial config applied on top of an existing snapshot
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub api_version: Option<String>,
    pub impersonate: Option<String>,
    pub impersonate_aad: Option<String>,
    pub include_annotations: Option<String>,
    pub max_page_size: Option<u32>,
    pub return_representation: Option<bool>,
    pub use_entity_names: Option<bool>,
    pub timeout: Option<Duration>,
    pub proxy: Option<ProxyConfig>,
    pub chunk_size: Option<usize>,
    pub max_url_length: Option<usize>,
    pub bypass: Option<BypassConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
}

/// Builder for Config
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            config: Config {
                server_url: server_url.into(),
                ..Config::default()
            },
        }
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = version.into();
        self
    }

    pub fn impersonate(mut self, caller_id: impl Into<String>) -> Self {
        self.config.impersonate = Some(caller_id.into());
        self
    }

    pub fn impersonate_aad(mut self, object_id: impl Into<String>) -> Self {
        self.config.impersonate_aad = Some(object_id.into());
        self
    }

    pub fn include_annotations(mut self, annotations: impl Into<String>) -> Self {
        self.config.include_annotations = Some(annotations.into());
        self
    }

    pub fn max_page_size(mut self, size: u32) -> Self {
        self.config.max_page_size = Some(size);
        self
    }

    pub fn return_representation(mut self, enabled: bool) -> Self {
        self.config.return_representation = enabled;
        self
    }

    pub fn use_entity_names(mut self, enabled: bool) -> Self {
        self.config.use_entity_names = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn max_url_length(mut self, length: usize) -> Self {
        self.config.max_url_length = length;
        self
    }

    /// Configure bypass settings
    pub fn bypass_config(mut self, bypass: BypassConfig) -> Self {
        self.config.bypass = bypass;
        self
    }

    /// Enable bypassing all custom business logic (sync, async, and Power Automate)
    pub fn bypass_all_custom_logic(mut self) -> Self {
        self.config.bypass = BypassConfig::all();
        self
    }

    pub fn concurrency_config(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.config.token_provider = Some(provider);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api_version, "9.2");
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.max_url_length, 2000);
        assert!(!config.return_representation);
        assert!(!config.bypass.is_enabled());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_api_url() {
        let config = Config::builder("https://org.crm.dynamics.com/")
            .api_version("9.1")
            .build();
        assert_eq!(
            config.data_api_url(),
            "https://org.crm.dynamics.com/api/data/v9.1/"
        );
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::builder("https://org.crm.dynamics.com")
            .impersonate("caller")
            .impersonate_aad("object")
            .include_annotations("*")
            .max_page_size(10)
            .return_representation(true)
            .timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.impersonate.as_deref(), Some("caller"));
        assert_eq!(config.impersonate_aad.as_deref(), Some("object"));
        assert_eq!(config.include_annotations.as_deref(), Some("*"));
        assert_eq!(config.max_page_size, Some(10));
        assert!(config.return_representation);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merged_does_not_touch_parent() {
        let parent = Config::builder("https://org.crm.dynamics.com")
            .impersonate("parent")
            .max_page_size(50)
            .build();
        let overrides = ConfigOverrides {
            impersonate: Some("child".into()),
            return_representation: Some(true),
            ..Default::default()
        };

        let child = parent.merged(&overrides);

        assert_eq!(child.impersonate.as_deref(), Some("child"));
        assert_eq!(child.max_page_size, Some(50));
        assert!(child.return_representation);
        assert_eq!(parent.impersonate.as_deref(), Some("parent"));
        assert!(!parent.return_representation);
    }

    #[test]
    fn test_bypass_headers() {
        assert!(BypassConfig::default().headers().is_empty());

        let headers = BypassConfig::all().headers();
        assert_eq!(
            headers[0],
            (headers::BYPASS_BUSINESS_LOGIC_EXECUTION, "CustomSync,CustomAsync".to_string())
        );
        assert_eq!(
            headers[1],
            (headers::BYPASS_POWER_AUTOMATE_FLOWS, "true".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = Config::builder("org.crm.dynamics.com").build();
        assert!(matches!(config.validate(), Err(DynamicsError::Config(_))));
    }
}
