//! OData v4 request construction, batching and response reassembly for the
//! Microsoft Dynamics 365 Web API.
//!
//! The entry point is [`DynamicsClient`]; everything below it (query
//! building, request assembly, response interpretation, batch
//! serialization, chunked transfers and paging) is usable on its own.

pub mod api;

pub use api::{
    AccessToken, Body, BypassConfig, Collection, Config, ConfigOverrides, DynamicsClient,
    DynamicsError, EntityReference, Expand, HttpRequest, HttpResponse, MetadataOperation,
    Operation, Outcome, ProxyConfig, QueryOptions, Request, RequestOptions, ResponseValue,
    Result, TokenProvider, Transport,
};
