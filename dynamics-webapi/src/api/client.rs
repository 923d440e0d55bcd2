//! Dynamics 365 Web API client
//!
//! [`DynamicsClient`] ties the pieces together: it resolves entity names,
//! assembles requests, attaches tokens and the standard OData headers, and
//! either sends each call through its [`Transport`] or queues it into an
//! open batch.

use arc_swap::ArcSwap;
use reqwest::Method;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::config::{Config, ConfigOverrides};
use crate::api::constants::{headers, prefer};
use crate::api::error::{DynamicsError, Result};
use crate::api::metadata::{EntitySetCache, entity_set_from, entity_set_lookup};
use crate::api::operations::{
    BatchOptions, BatchRequest, BatchRequestBuilder, BatchResponseParser, Collection,
    FetchXmlPage, Operation, PreparedRequest, Request, RequestOptions, ResponseValue, assemble,
    error_from_response, interpret, option_headers,
};
use crate::api::paging::{ContinuationToken, LinkKind, PageAccumulator};
use crate::api::query::keys::is_content_id_reference;
use crate::api::resilience::{ConcurrencyLimiter, ConcurrencyStats};
use crate::api::transfer::{DownloadRequest, DownloadSession, FileDownload, UploadRequest, UploadSession};
use crate::api::transport::{Body, HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// What happened to a request handed to [`DynamicsClient::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Sent and interpreted
    Completed(ResponseValue),
    /// Queued into the open batch at `position`
    Queued { position: usize },
}

impl Outcome {
    pub fn into_value(self) -> Option<ResponseValue> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Queued { .. } => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Web API client
///
/// Cheap to share behind an `Arc`; concurrent calls are fine. Batch state
/// belongs to the client instance, so concurrent callers that need separate
/// batches should each use a [`child`](Self::child).
pub struct DynamicsClient {
    config: ArcSwap<Config>,
    transport: Arc<dyn Transport>,
    limiter: ArcSwap<ConcurrencyLimiter>,
    entity_sets: Arc<EntitySetCache>,
    batch: Mutex<Option<Vec<PreparedRequest>>>,
}

impl DynamicsClient {
    /// Client that talks HTTP through `reqwest`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let limiter = ConcurrencyLimiter::new(config.concurrency.clone());
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            transport,
            limiter: ArcSwap::from_pointee(limiter),
            entity_sets: Arc::new(EntitySetCache::new()),
            batch: Mutex::new(None),
        })
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Merges `overrides` into this client's config.
    ///
    /// Requests already assembled keep the snapshot they were built with. A
    /// proxy change only takes effect for clients built afterwards.
    pub fn set_config(&self, overrides: &ConfigOverrides) -> Result<()> {
        let current = self.config.load_full();
        let merged = current.merged(overrides);
        merged.validate()?;
        if overrides.concurrency.is_some() {
            self.limiter
                .store(Arc::new(ConcurrencyLimiter::new(merged.concurrency.clone())));
        }
        self.config.store(Arc::new(merged));
        Ok(())
    }

    /// Independent client derived from this one.
    ///
    /// The child shares the transport and entity set cache but has its own
    /// config, concurrency limit and batch state.
    pub fn child(&self, overrides: &ConfigOverrides) -> Result<DynamicsClient> {
        let config = self.config.load().merged(overrides);
        config.validate()?;
        let transport: Arc<dyn Transport> = if overrides.proxy.is_some() {
            Arc::new(ReqwestTransport::new(&config)?)
        } else {
            self.transport.clone()
        };
        let limiter = ConcurrencyLimiter::new(config.concurrency.clone());
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            transport,
            limiter: ArcSwap::from_pointee(limiter),
            entity_sets: self.entity_sets.clone(),
            batch: Mutex::new(None),
        })
    }

    pub fn concurrency_stats(&self) -> ConcurrencyStats {
        self.limiter.load().stats()
    }

    pub fn entity_sets(&self) -> &EntitySetCache {
        &self.entity_sets
    }

    fn lock_batch(&self) -> MutexGuard<'_, Option<Vec<PreparedRequest>>> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts collecting requests into a batch instead of sending them
    pub fn start_batch(&self) -> Result<()> {
        let mut batch = self.lock_batch();
        if batch.is_some() {
            return Err(DynamicsError::BatchAlreadyOpen);
        }
        *batch = Some(Vec::new());
        log::debug!("Batch started");
        Ok(())
    }

    pub fn is_batch_open(&self) -> bool {
        self.lock_batch().is_some()
    }

    fn ensure_not_batching(&self, operation: &str) -> Result<()> {
        if self.is_batch_open() {
            return Err(DynamicsError::BatchIncompatible {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Sends `request`, or queues it when a batch is open
    pub async fn execute(&self, request: Request) -> Result<Outcome> {
        let mut request = request;
        if is_cancelled(&request.options) {
            return Err(DynamicsError::Cancelled);
        }

        let config = self.config();
        if config.use_entity_names {
            self.resolve_entity_sets(&mut request.operation, &request.options)
                .await?;
        }
        let prepared = assemble(&request, &config)?;

        {
            let mut batch = self.lock_batch();
            if let Some(queue) = batch.as_mut() {
                log::debug!(
                    "Queued {} into batch at position {}",
                    request.operation.operation_type(),
                    queue.len()
                );
                queue.push(prepared);
                return Ok(Outcome::Queued {
                    position: queue.len() - 1,
                });
            }
        }

        let value = self.dispatch(prepared, &request.options).await?;
        Ok(Outcome::Completed(value))
    }

    /// Sends `request` immediately; refused while a batch is open
    pub async fn send(&self, request: Request) -> Result<ResponseValue> {
        self.ensure_not_batching(request.operation.operation_type())?;
        match self.execute(request).await? {
            Outcome::Completed(value) => Ok(value),
            Outcome::Queued { .. } => Err(DynamicsError::BatchIncompatible {
                operation: "send".into(),
            }),
        }
    }

    /// Sends everything queued since [`start_batch`](Self::start_batch) as one
    /// `$batch` call. Results come back in queue order.
    ///
    /// The batch is closed even if sending fails.
    pub async fn execute_batch(&self, options: BatchOptions) -> Result<Vec<Result<ResponseValue>>> {
        let queued = self.lock_batch().take().ok_or(DynamicsError::NoOpenBatch)?;
        if queued.is_empty() {
            log::debug!("Batch closed with no requests");
            return Ok(Vec::new());
        }

        let batch = BatchRequestBuilder::from_requests(queued)
            .change_sets(options.in_change_set != Some(false))
            .build()?;
        self.send_batch(batch, &options).await
    }

    async fn send_batch(
        &self,
        batch: BatchRequest,
        options: &BatchOptions,
    ) -> Result<Vec<Result<ResponseValue>>> {
        let config = self.config();
        let mut http = HttpRequest::new(Method::POST, format!("{}$batch", config.data_api_url()));
        let request_options = RequestOptions {
            impersonate: options.impersonate.clone(),
            impersonate_aad: options.impersonate_aad.clone(),
            token: options.token.clone(),
            ..Default::default()
        };
        http.headers = option_headers(&request_options, &config, "execute_batch")?;
        http.set_header(headers::CONTENT_TYPE, batch.content_type());
        if options.continue_on_error {
            http.set_header(headers::PREFER, prefer::CONTINUE_ON_ERROR);
        }
        http.body = Some(Body::Text(batch.body.clone()));

        log::info!("Sending batch with {} requests", batch.len());
        let response = self
            .send_http(http, options.timeout, options.cancellation.as_ref())
            .await?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }

        let entries = BatchResponseParser::parse(&response)?;
        let results = BatchResponseParser::assemble(&batch, entries);
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            log::warn!("Batch completed with {} of {} operations failed", failed, results.len());
        } else {
            log::info!("Batch completed: {} operations", results.len());
        }
        Ok(results)
    }

    async fn dispatch(&self, prepared: PreparedRequest, options: &RequestOptions) -> Result<ResponseValue> {
        let config = self.config();
        if is_content_id_reference(&prepared.http.url) {
            return Err(DynamicsError::invalid(
                prepared.context.operation.clone(),
                "content-id references can only be used inside a batch",
            ));
        }

        if prepared.http.method == Method::GET && prepared.http.url.len() > config.max_url_length {
            log::debug!(
                "URL is {} characters (limit {}), sending {} through $batch",
                prepared.http.url.len(),
                config.max_url_length,
                prepared.context.operation
            );
            let operation = prepared.context.operation.clone();
            let batch = BatchRequestBuilder::from_requests(vec![prepared]).build()?;
            let batch_options = BatchOptions {
                token: options.token.clone(),
                timeout: options.timeout,
                cancellation: options.cancellation.clone(),
                ..Default::default()
            };
            return self
                .send_batch(batch, &batch_options)
                .await?
                .into_iter()
                .next()
                .unwrap_or_else(|| {
                    Err(DynamicsError::invalid(operation, "batch returned no response"))
                });
        }

        let response = self
            .send_http(prepared.http, options.timeout, options.cancellation.as_ref())
            .await?;
        interpret(&prepared.context, &response)
    }

    async fn send_http(
        &self,
        mut http: HttpRequest,
        timeout: Option<Duration>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<HttpResponse> {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(DynamicsError::Cancelled);
        }

        let config = self.config();
        if http.header(headers::AUTHORIZATION).is_none()
            && let Some(token) = self.resolve_token(&config).await?
        {
            http.set_header(headers::AUTHORIZATION, format!("Bearer {}", token));
        }
        apply_standard_headers(&mut http);

        let timeout = timeout.or(config.timeout);
        let limiter = self.limiter.load_full();
        let send = async {
            let _permit = limiter.acquire().await?;
            log::debug!("{} {}", http.method, http.url);
            self.transport.send(http, timeout).await
        };

        let response = match cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(DynamicsError::Cancelled),
                result = send => result,
            },
            None => send.await,
        }?;
        log::debug!("Response {} {}", response.status, response.status_text);
        Ok(response)
    }

    async fn resolve_token(&self, config: &Config) -> Result<Option<String>> {
        let Some(provider) = &config.token_provider else {
            return Ok(None);
        };
        match provider.token().await? {
            Some(token) if !token.is_empty() => Ok(Some(token.as_str().to_string())),
            _ => Err(DynamicsError::EmptyToken),
        }
    }

    async fn resolve_entity_sets(&self, operation: &mut Operation, options: &RequestOptions) -> Result<()> {
        let lookup_options = RequestOptions {
            token: options.token.clone(),
            timeout: options.timeout,
            cancellation: options.cancellation.clone(),
            ..Default::default()
        };

        for name in operation.collection_names_mut() {
            if is_content_id_reference(name) {
                continue;
            }
            if let Some(entity_set) = self.entity_sets.get(name) {
                *name = entity_set;
                continue;
            }

            let lookup = Request::new(entity_set_lookup(name)?).with_options(lookup_options.clone());
            let prepared = assemble(&lookup, &self.config())?;
            let entity_set = self
                .dispatch(prepared, &lookup_options)
                .await?
                .into_collection()
                .and_then(|definitions| entity_set_from(&definitions, name))
                .unwrap_or_else(|| name.clone());

            log::debug!("Resolved entity set for '{}': '{}'", name, entity_set);
            self.entity_sets.insert(name, entity_set.clone());
            *name = entity_set;
        }
        Ok(())
    }

    /// Follows every next link of a `RetrieveMultiple` and returns all records
    pub async fn retrieve_all(&self, request: Request) -> Result<Collection> {
        self.ensure_not_batching("retrieve_all")?;
        self.collect_pages(request, "retrieve_all").await
    }

    /// Number of records matched by a `RetrieveMultiple`, across all pages
    pub async fn count_all(&self, request: Request) -> Result<u64> {
        self.ensure_not_batching("count_all")?;
        let all = self.collect_pages(request, "count_all").await?;
        Ok(all.value.len() as u64)
    }

    async fn collect_pages(&self, request: Request, op: &str) -> Result<Collection> {
        let (prepared, options) = self.prepare_collection(request, op).await?;
        let mut pages = PageAccumulator::new();
        let mut next = Some(prepared);

        while let Some(prepared) = next.take() {
            let original = prepared.clone();
            let page = expect_collection(self.dispatch(prepared, &options).await?, op)?;
            if let Some(link) = pages.push(page) {
                next = Some(ContinuationToken::new(&original, link, LinkKind::Next).into_request());
            }
        }

        log::debug!("{}: {} records over {} pages", op, pages.len(), pages.pages());
        Ok(pages.finish())
    }

    /// One page of a `RetrieveMultiple`, plus a token for whatever follows
    pub async fn retrieve_page(&self, request: Request) -> Result<(Collection, Option<ContinuationToken>)> {
        self.ensure_not_batching("retrieve_page")?;
        let (prepared, options) = self.prepare_collection(request, "retrieve_page").await?;
        let original = prepared.clone();
        let page = expect_collection(self.dispatch(prepared, &options).await?, "retrieve_page")?;
        let token = ContinuationToken::after(&original, &page);
        Ok((page, token))
    }

    /// Resumes from a next link or delta link
    pub async fn resume(
        &self,
        token: ContinuationToken,
        options: &RequestOptions,
    ) -> Result<(Collection, Option<ContinuationToken>)> {
        self.ensure_not_batching("resume")?;
        let prepared = token.into_request();
        let original = prepared.clone();
        let page = expect_collection(self.dispatch(prepared, options).await?, "resume")?;
        let token = ContinuationToken::after(&original, &page);
        Ok((page, token))
    }

    async fn prepare_collection(&self, request: Request, op: &str) -> Result<(PreparedRequest, RequestOptions)> {
        let mut request = request;
        if !matches!(request.operation, Operation::RetrieveMultiple { .. }) {
            return Err(DynamicsError::invalid(op, "only retrieve_multiple requests can be paged"));
        }
        if is_cancelled(&request.options) {
            return Err(DynamicsError::Cancelled);
        }

        let config = self.config();
        if config.use_entity_names {
            self.resolve_entity_sets(&mut request.operation, &request.options)
                .await?;
        }
        let prepared = assemble(&request, &config)?;
        Ok((prepared, request.options))
    }

    /// Runs a FetchXML query page by page until the server reports no more
    /// records, threading the paging cookie through
    pub async fn fetch_all(&self, request: Request) -> Result<FetchXmlPage> {
        self.ensure_not_batching("fetch_all")?;
        let mut request = request;
        let Operation::FetchXml { page_number, .. } = &request.operation else {
            return Err(DynamicsError::invalid("fetch_all", "only fetch_xml requests can be paged"));
        };
        let mut current_page = page_number.unwrap_or(1);

        let config = self.config();
        if config.use_entity_names {
            self.resolve_entity_sets(&mut request.operation, &request.options)
                .await?;
        }

        let mut records = Vec::new();
        let mut previous_url: Option<String> = None;
        loop {
            let prepared = assemble(&request, &config)?;
            if previous_url.as_deref() == Some(prepared.http.url.as_str()) {
                log::warn!("fetch_all: query pins its own page, stopping after page {}", current_page);
                break;
            }
            previous_url = Some(prepared.http.url.clone());

            let page = match self.dispatch(prepared, &request.options).await? {
                ResponseValue::FetchXml(page) => page,
                other => {
                    return Err(DynamicsError::invalid(
                        "fetch_all",
                        format!("expected a FetchXML page, got {:?}", other),
                    ));
                }
            };
            records.extend(page.value);
            if !page.more_records {
                return Ok(FetchXmlPage {
                    value: records,
                    paging_info: page.paging_info,
                    more_records: false,
                    count: None,
                });
            }

            let (next_page, cookie) = match page.paging_info {
                Some(info) => (info.next_page, Some(info.cookie).filter(|c| !c.is_empty())),
                None => (current_page + 1, None),
            };
            current_page = next_page;
            if let Operation::FetchXml {
                page_number,
                paging_cookie,
                ..
            } = &mut request.operation
            {
                *page_number = Some(next_page);
                *paging_cookie = cookie;
            }
        }

        Ok(FetchXmlPage {
            value: records,
            paging_info: None,
            more_records: false,
            count: None,
        })
    }

    /// Uploads a file column in chunks
    pub async fn upload_file(&self, request: UploadRequest) -> Result<()> {
        self.ensure_not_batching("upload_file")?;
        let config = self.config();
        let headers = option_headers(&request.options, &config, "upload_file")?;
        let mut session = UploadSession::for_request(&config, &request, headers)?;

        while let Some(http) = session.next_request() {
            let response = self
                .send_http(http, request.options.timeout, request.options.cancellation.as_ref())
                .await?;
            session.advance(&response)?;
        }
        log::info!(
            "Uploaded {} bytes to {}.{} in {} chunks",
            request.data.len(),
            request.collection,
            request.field,
            session.chunks_sent()
        );
        Ok(())
    }

    /// Downloads a file column in chunks
    pub async fn download_file(&self, request: DownloadRequest) -> Result<FileDownload> {
        self.ensure_not_batching("download_file")?;
        let config = self.config();
        let headers = option_headers(&request.options, &config, "download_file")?;
        let mut session = DownloadSession::for_request(&config, &request, headers)?;

        while let Some(http) = session.next_request() {
            let response = self
                .send_http(http, request.options.timeout, request.options.cancellation.as_ref())
                .await?;
            session.advance(&response)?;
        }
        Ok(session.finish())
    }
}

fn is_cancelled(options: &RequestOptions) -> bool {
    options
        .cancellation
        .as_ref()
        .is_some_and(CancellationToken::is_cancelled)
}

fn expect_collection(value: ResponseValue, op: &str) -> Result<Collection> {
    match value {
        ResponseValue::Collection(collection) => Ok(collection),
        other => Err(DynamicsError::invalid(
            op,
            format!("expected a collection response, got {:?}", other),
        )),
    }
}

/// Headers every Web API call carries
fn apply_standard_headers(http: &mut HttpRequest) {
    http.set_header(headers::ODATA_MAX_VERSION, "4.0");
    http.set_header(headers::ODATA_VERSION, "4.0");
    if http.header(headers::ACCEPT).is_none() {
        http.set_header(headers::ACCEPT, "application/json");
    }
    if matches!(http.body, Some(Body::Json(_))) && http.header(headers::CONTENT_TYPE).is_none() {
        http.set_header(headers::CONTENT_TYPE, "application/json; charset=utf-8");
    }
}
