//! Chunked file column transfers
//!
//! Both directions are explicit state machines: [`next_request`] yields the
//! next HTTP call (or `None` when finished) and [`advance`] feeds its
//! response back in. The client drives the loop; tests can step through it
//! without a transport.
//!
//! [`next_request`]: UploadSession::next_request
//! [`advance`]: UploadSession::advance

use reqwest::Method;

use crate::api::config::Config;
use crate::api::constants::headers;
use crate::api::error::{DynamicsError, Result};
use crate::api::operations::{RequestOptions, error_from_response};
use crate::api::query::keys::{encode_component, key_parameter, validate_segment};
use crate::api::transport::{Body, Headers, HttpRequest, HttpResponse};

/// Upload of a file column
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub collection: String,
    pub key: String,
    /// File or image column name
    pub field: String,
    pub file_name: String,
    pub data: Vec<u8>,
    pub options: RequestOptions,
}

/// Download of a file column
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub collection: String,
    pub key: String,
    pub field: String,
    pub options: RequestOptions,
}

/// A downloaded file with the metadata from the first chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub file_name: Option<String>,
    pub file_size: Option<usize>,
    pub data: Vec<u8>,
}

fn field_path(config: &Config, collection: &str, key: &str, field: &str, op: &str) -> Result<String> {
    validate_segment(collection, op, "collection")?;
    validate_segment(field, op, "field")?;
    Ok(format!(
        "{}{}({})/{}",
        config.data_api_url(),
        collection,
        key_parameter(key, op, "key")?,
        field
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadState {
    Begin,
    Chunk {
        location: String,
        chunk_size: usize,
        offset: usize,
    },
    Done,
}

/// Chunked upload: one begin call, then one PATCH per chunk
#[derive(Debug, Clone)]
pub struct UploadSession {
    begin_url: String,
    file_name: String,
    data: Vec<u8>,
    default_chunk_size: usize,
    headers: Headers,
    state: UploadState,
    chunks_sent: usize,
}

impl UploadSession {
    pub fn new(
        begin_url: impl Into<String>,
        file_name: impl Into<String>,
        data: Vec<u8>,
        default_chunk_size: usize,
        headers: Headers,
    ) -> Self {
        Self {
            begin_url: begin_url.into(),
            file_name: file_name.into(),
            data,
            default_chunk_size: default_chunk_size.max(1),
            headers,
            state: UploadState::Begin,
            chunks_sent: 0,
        }
    }

    /// Session for `PATCH collection(key)/field?x-ms-file-name=...`
    pub fn for_request(config: &Config, request: &UploadRequest, headers: Headers) -> Result<Self> {
        const OP: &str = "upload_file";
        if request.file_name.trim().is_empty() {
            return Err(DynamicsError::invalid(OP, "file_name is required"));
        }
        let url = format!(
            "{}?{}={}",
            field_path(config, &request.collection, &request.key, &request.field, OP)?,
            headers::FILE_NAME,
            encode_component(&request.file_name)
        );
        Ok(Self::new(
            url,
            request.file_name.clone(),
            request.data.clone(),
            config.chunk_size,
            headers,
        ))
    }

    pub fn next_request(&self) -> Option<HttpRequest> {
        match &self.state {
            UploadState::Begin => {
                let mut request = HttpRequest::new(Method::PATCH, self.begin_url.clone());
                request.headers = self.headers.clone();
                request.set_header(headers::TRANSFER_MODE, "chunked");
                Some(request)
            }
            UploadState::Chunk {
                location,
                chunk_size,
                offset,
            } => {
                let total = self.data.len();
                let end = offset.saturating_add(*chunk_size).min(total) - 1;

                let mut request = HttpRequest::new(Method::PATCH, location.clone());
                request.headers = self.headers.clone();
                request.set_header(
                    headers::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", offset, end, total),
                );
                request.set_header(headers::CONTENT_TYPE, "application/octet-stream");
                request.set_header(headers::FILE_NAME, self.file_name.clone());
                request.body = Some(Body::Bytes(self.data[*offset..=end].to_vec()));
                Some(request)
            }
            UploadState::Done => None,
        }
    }

    /// Any failed step aborts the whole upload
    pub fn advance(&mut self, response: &HttpResponse) -> Result<()> {
        if !response.is_success() {
            self.state = UploadState::Done;
            return Err(error_from_response(response));
        }

        self.state = match std::mem::replace(&mut self.state, UploadState::Done) {
            UploadState::Begin => {
                let location = response
                    .header(headers::LOCATION)
                    .ok_or_else(|| {
                        DynamicsError::invalid("upload_file", "begin response has no Location header")
                    })?
                    .to_string();
                let chunk_size = response
                    .header(headers::CHUNK_SIZE)
                    .and_then(|size| size.trim().parse::<usize>().ok())
                    .filter(|size| *size > 0)
                    .unwrap_or(self.default_chunk_size);
                log::debug!(
                    "Upload of '{}' ({} bytes) uses {} byte chunks",
                    self.file_name,
                    self.data.len(),
                    chunk_size
                );
                if self.data.is_empty() {
                    UploadState::Done
                } else {
                    UploadState::Chunk {
                        location,
                        chunk_size,
                        offset: 0,
                    }
                }
            }
            UploadState::Chunk {
                location,
                chunk_size,
                offset,
            } => {
                self.chunks_sent += 1;
                let next = offset.saturating_add(chunk_size);
                if next >= self.data.len() {
                    UploadState::Done
                } else {
                    UploadState::Chunk {
                        location,
                        chunk_size,
                        offset: next,
                    }
                }
            }
            UploadState::Done => UploadState::Done,
        };
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.state == UploadState::Done
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }
}

/// Ranged download, accumulating chunks until the advertised size is reached
#[derive(Debug, Clone)]
pub struct DownloadSession {
    url: String,
    chunk_size: usize,
    headers: Headers,
    data: Vec<u8>,
    file_name: Option<String>,
    file_size: Option<usize>,
    started: bool,
    done: bool,
}

impl DownloadSession {
    pub fn new(url: impl Into<String>, chunk_size: usize, headers: Headers) -> Self {
        Self {
            url: url.into(),
            chunk_size: chunk_size.max(1),
            headers,
            data: Vec::new(),
            file_name: None,
            file_size: None,
            started: false,
            done: false,
        }
    }

    /// Session for `GET collection(key)/field/$value?size=full`
    pub fn for_request(config: &Config, request: &DownloadRequest, headers: Headers) -> Result<Self> {
        let url = format!(
            "{}/$value?size=full",
            field_path(config, &request.collection, &request.key, &request.field, "download_file")?
        );
        Ok(Self::new(url, config.chunk_size, headers))
    }

    pub fn next_request(&self) -> Option<HttpRequest> {
        if self.done {
            return None;
        }
        let start = self.data.len();
        let mut request = HttpRequest::new(Method::GET, self.url.clone());
        request.headers = self.headers.clone();
        request.set_header(
            headers::RANGE,
            format!("bytes={}-{}", start, start.saturating_add(self.chunk_size - 1)),
        );
        Some(request)
    }

    pub fn advance(&mut self, response: &HttpResponse) -> Result<()> {
        if !response.is_success() {
            self.done = true;
            return Err(error_from_response(response));
        }

        if !self.started {
            self.started = true;
            self.file_name = response.header(headers::FILE_NAME).map(str::to_string);
            self.file_size = response
                .header(headers::FILE_SIZE)
                .and_then(|size| size.trim().parse::<usize>().ok());
        }
        self.data.extend_from_slice(&response.body);

        self.done = match self.file_size {
            Some(size) if response.body.is_empty() && self.data.len() < size => {
                log::warn!(
                    "Download stopped at {} of {} bytes: server returned an empty chunk",
                    self.data.len(),
                    size
                );
                true
            }
            Some(size) => self.data.len() >= size,
            None => true,
        };
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(self) -> FileDownload {
        FileDownload {
            file_name: self.file_name,
            file_size: self.file_size,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_response(chunk_size: Option<&str>) -> HttpResponse {
        let response = HttpResponse::new(200).with_header("Location", "https://org/upload?token=1");
        match chunk_size {
            Some(size) => response.with_header("x-ms-chunk-size", size),
            None => response,
        }
    }

    fn run_upload(data: &[u8], server_chunk: Option<&str>) -> Vec<HttpRequest> {
        let mut session = UploadSession::new(
            "https://org/api/data/v9.2/accounts(1)/file?x-ms-file-name=a.txt",
            "a.txt",
            data.to_vec(),
            4,
            Headers::new(),
        );
        let mut sent = Vec::new();
        let mut first = true;
        while let Some(request) = session.next_request() {
            sent.push(request);
            let response = if first {
                first = false;
                begin_response(server_chunk)
            } else {
                HttpResponse::new(204)
            };
            session.advance(&response).unwrap();
        }
        assert!(session.is_done());
        sent
    }

    #[test]
    fn test_upload_chunks_use_server_chunk_size() {
        let data = b"0123456789";
        let sent = run_upload(data, Some("3"));

        assert_eq!(sent[0].header("x-ms-transfer-mode"), Some("chunked"));
        assert!(sent[0].body.is_none());

        let chunks = &sent[1..];
        assert_eq!(chunks.len(), 4); // ceil(10 / 3)
        let ranges: Vec<_> = chunks
            .iter()
            .map(|r| r.header("Content-Range").unwrap().to_string())
            .collect();
        assert_eq!(
            ranges,
            vec!["bytes 0-2/10", "bytes 3-5/10", "bytes 6-8/10", "bytes 9-9/10"]
        );
        assert!(chunks.iter().all(|r| r.url == "https://org/upload?token=1"));
        assert_eq!(chunks[0].header("Content-Type"), Some("application/octet-stream"));
        assert_eq!(chunks[0].header("x-ms-file-name"), Some("a.txt"));

        let mut rebuilt = Vec::new();
        for chunk in chunks {
            match &chunk.body {
                Some(Body::Bytes(bytes)) => rebuilt.extend_from_slice(bytes),
                other => panic!("unexpected body {:?}", other),
            }
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_upload_falls_back_to_configured_chunk_size() {
        let sent = run_upload(b"01234567", None);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].header("Content-Range"), Some("bytes 4-7/8"));
    }

    #[test]
    fn test_failed_chunk_aborts_upload() {
        let mut session = UploadSession::new("https://x", "a.txt", b"abcdef".to_vec(), 2, Headers::new());
        session.advance(&begin_response(None)).unwrap();
        assert!(session.next_request().is_some());

        let err = session
            .advance(&HttpResponse::new(500).with_body("boom"))
            .unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(session.next_request().is_none());
    }

    #[test]
    fn test_oversized_server_chunk_sends_one_chunk() {
        let huge = usize::MAX.to_string();
        let sent = run_upload(b"abcdef", Some(&huge));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].header("Content-Range"), Some("bytes 0-5/6"));
        assert_eq!(sent[1].body, Some(Body::Bytes(b"abcdef".to_vec())));
    }

    #[test]
    fn test_begin_without_location_is_an_error() {
        let mut session = UploadSession::new("https://x", "a.txt", b"abc".to_vec(), 2, Headers::new());
        assert!(session.advance(&HttpResponse::new(200)).is_err());
    }

    #[test]
    fn test_download_two_chunks() {
        let text = "Hello, file column!";
        let chunk = 12;
        let mut session = DownloadSession::new("https://org/file/$value?size=full", chunk, Headers::new());

        let first = session.next_request().unwrap();
        assert_eq!(first.header("Range"), Some("bytes=0-11"));
        session
            .advance(
                &HttpResponse::new(206)
                    .with_header("x-ms-file-name", "hello.txt")
                    .with_header("x-ms-file-size", text.len().to_string())
                    .with_body(&text.as_bytes()[..chunk]),
            )
            .unwrap();
        assert!(!session.is_done());

        let second = session.next_request().unwrap();
        assert_eq!(second.header("Range"), Some("bytes=12-23"));
        session
            .advance(&HttpResponse::new(206).with_body(&text.as_bytes()[chunk..]))
            .unwrap();
        assert!(session.is_done());
        assert!(session.next_request().is_none());

        let file = session.finish();
        assert_eq!(String::from_utf8(file.data).unwrap(), text);
        assert_eq!(file.file_name.as_deref(), Some("hello.txt"));
        assert_eq!(file.file_size, Some(text.len()));
    }

    #[test]
    fn test_download_metadata_comes_from_first_response() {
        let mut session = DownloadSession::new("https://org/file/$value?size=full", usize::MAX, Headers::new());
        assert_eq!(
            session.next_request().unwrap().header("Range"),
            Some(format!("bytes=0-{}", usize::MAX - 1).as_str())
        );

        session
            .advance(
                &HttpResponse::new(206)
                    .with_header("x-ms-file-name", "empty.txt")
                    .with_header("x-ms-file-size", "0"),
            )
            .unwrap();
        assert!(session.is_done());

        session
            .advance(
                &HttpResponse::new(206)
                    .with_header("x-ms-file-name", "other.txt")
                    .with_header("x-ms-file-size", "99"),
            )
            .unwrap();

        let file = session.finish();
        assert!(file.data.is_empty());
        assert_eq!(file.file_name.as_deref(), Some("empty.txt"));
        assert_eq!(file.file_size, Some(0));
    }

    #[test]
    fn test_request_urls() {
        let config = Config::builder("https://org.crm.dynamics.com").build();
        let upload = UploadRequest {
            collection: "accounts".into(),
            key: "00000000-0000-0000-0000-000000000001".into(),
            field: "sample_file".into(),
            file_name: "my file.txt".into(),
            data: Vec::new(),
            options: RequestOptions::default(),
        };
        let session = UploadSession::for_request(&config, &upload, Headers::new()).unwrap();
        assert_eq!(
            session.next_request().unwrap().url,
            "https://org.crm.dynamics.com/api/data/v9.2/accounts(00000000-0000-0000-0000-000000000001)/sample_file?x-ms-file-name=my%20file.txt"
        );

        let download = DownloadRequest {
            collection: "accounts".into(),
            key: "00000000-0000-0000-0000-000000000001".into(),
            field: "sample_file".into(),
            options: RequestOptions::default(),
        };
        let session = DownloadSession::for_request(&config, &download, Headers::new()).unwrap();
        assert_eq!(
            session.next_request().unwrap().url,
            "https://org.crm.dynamics.com/api/data/v9.2/accounts(00000000-0000-0000-0000-000000000001)/sample_file/$value?size=full"
        );
    }
}
