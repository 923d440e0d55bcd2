//! Dynamics 365 Web API core
//!
//! Turns declarative [`Request`]s into OData HTTP calls and the raw HTTP
//! responses back into typed values. Requests are either sent immediately
//! through a [`Transport`] or collected into a multipart `$batch`.

pub mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod metadata;
pub mod operations;
pub mod paging;
pub mod query;
pub mod resilience;
pub mod transfer;
pub mod transport;

pub use auth::{AccessToken, FnTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{DynamicsClient, Outcome};
pub use config::{BypassConfig, Config, ConfigOverrides, ProxyConfig};
pub use error::{DynamicsError, HttpError, Result};
pub use metadata::EntitySetCache;
pub use operations::{
    BatchOptions, BatchRequest, BatchRequestBuilder, BatchResponseParser, Collection,
    EntityReference, FetchXmlPage, MetadataOperation, Operation, Request, RequestOptions,
    ResponseValue,
};
pub use paging::{ContinuationToken, LinkKind, PageAccumulator};
pub use query::{Expand, PagingInfo, QueryOptions};
pub use resilience::{ConcurrencyConfig, ConcurrencyLimiter, ConcurrencyStats};
pub use transfer::{DownloadRequest, DownloadSession, FileDownload, UploadRequest, UploadSession};
pub use transport::{Body, Headers, HttpRequest, HttpResponse, ReqwestTransport, Transport};
