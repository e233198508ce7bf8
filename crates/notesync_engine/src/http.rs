//! HTTP transport implementation.
//!
//! The HTTP client is abstracted by [`HttpClient`] so the transport and the
//! health probe can run against reqwest ([`ReqwestClient`]) or a scripted
//! client in tests.

use crate::error::{SyncError, SyncResult};
use crate::transport::NoteTransport;
use async_trait::async_trait;
use notesync_protocol::Document;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout overriding the client's.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request without body or headers.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Sets a JSON body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response that reached the client, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn into_error(self) -> SyncError {
        let message = String::from_utf8_lossy(&self.body).trim().to_string();
        SyncError::http(self.status, message)
    }
}

/// HTTP client abstraction.
///
/// Only transport failures are errors; any status the server answers with
/// is an `Ok` response.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else if e.is_builder() {
        SyncError::InvalidUrl(e.to_string())
    } else {
        SyncError::Network(e.to_string())
    }
}

/// Joins `segments` onto `base` as encoded path segments.
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> SyncResult<String> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| SyncError::InvalidUrl(base.to_string()))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url.into())
}

/// Parses a server base URL.
pub(crate) fn parse_base_url(base_url: &str) -> SyncResult<Url> {
    Url::parse(base_url).map_err(|e| SyncError::InvalidUrl(format!("{base_url}: {e}")))
}

/// HTTP-based note transport.
///
/// Speaks JSON to `{base}/notes/{id}`.
pub struct HttpTransport<C: HttpClient> {
    base_url: Url,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if `base_url` is not an absolute
    /// URL that can carry a path.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let base_url = parse_base_url(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { base_url, client })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn note_url(&self, id: &str) -> SyncResult<String> {
        join_url(&self.base_url, &["notes", id])
    }
}

#[async_trait]
impl<C: HttpClient> NoteTransport for HttpTransport<C> {
    async fn fetch(&self, id: &str) -> SyncResult<Option<Document>> {
        let url = self.note_url(id)?;
        let response = self.client.send(HttpRequest::new(Method::Get, url)).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => {
                let doc = Document::from_json(&response.body)
                    .map_err(|e| SyncError::Decode(e.to_string()))?;
                if doc.id != id {
                    return Err(SyncError::Decode(format!(
                        "requested note {id}, server returned {}",
                        doc.id
                    )));
                }
                Ok(Some(doc))
            }
            _ => Err(response.into_error()),
        }
    }

    async fn push(&self, doc: &Document) -> SyncResult<()> {
        let url = self.note_url(&doc.id)?;
        let body = doc.to_json().map_err(|e| SyncError::Decode(e.to_string()))?;
        let response = self
            .client
            .send(HttpRequest::new(Method::Put, url).with_body(body))
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        debug!(note_id = %doc.id, status = response.status, "pushed note");
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let url = self.note_url(id)?;
        let response = self
            .client
            .send(HttpRequest::new(Method::Delete, url))
            .await?;
        if response.is_success() || response.status == 404 {
            return Ok(());
        }
        Err(response.into_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Answers every request with the next scripted response.
    struct ScriptedClient {
        responses: Mutex<Vec<SyncResult<HttpResponse>>>,
        seen: Mutex<Vec<(Method, String)>>,
    }

    impl ScriptedClient {
        fn new(mut responses: Vec<SyncResult<HttpResponse>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            self.seen.lock().push((request.method, request.url));
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(SyncError::Network("no script".into())))
        }
    }

    fn status(status: u16, body: &[u8]) -> SyncResult<HttpResponse> {
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    #[test]
    fn rejects_unusable_base_url() {
        let client = ScriptedClient::new(vec![]);
        assert!(matches!(
            HttpTransport::new("not a url", client),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn fetch_maps_statuses() {
        let doc = Document::new("n 1", "T", "B");
        let client = ScriptedClient::new(vec![
            status(200, &doc.to_json().unwrap()),
            status(404, b""),
            status(500, b"oops"),
            status(200, b"{not json"),
        ]);
        let transport = HttpTransport::new("https://notes.example.com/api/", client).unwrap();

        assert_eq!(transport.fetch("n 1").await.unwrap().unwrap().id, "n 1");
        assert!(transport.fetch("n2").await.unwrap().is_none());
        assert!(matches!(
            transport.fetch("n3").await,
            Err(SyncError::Http { status: 500, .. })
        ));
        assert!(matches!(
            transport.fetch("n4").await,
            Err(SyncError::Decode(_))
        ));

        let seen = transport.client.seen.lock();
        assert_eq!(seen[0].1, "https://notes.example.com/api/notes/n%201");
    }

    #[tokio::test]
    async fn fetch_rejects_a_different_note() {
        let other = Document::new("n2", "T", "B");
        let client = ScriptedClient::new(vec![status(200, &other.to_json().unwrap())]);
        let transport = HttpTransport::new("https://notes.example.com", client).unwrap();

        assert!(matches!(
            transport.fetch("n1").await,
            Err(SyncError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn push_and_delete() {
        let client = ScriptedClient::new(vec![
            status(204, b""),
            status(400, b"title too long"),
            status(404, b""),
            status(403, b""),
        ]);
        let transport = HttpTransport::new("https://notes.example.com", client).unwrap();
        let doc = Document::new("n1", "T", "B");

        transport.push(&doc).await.unwrap();
        let err = transport.push(&doc).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 400: title too long");
        transport.delete("n1").await.unwrap();
        assert!(transport.delete("n1").await.is_err());

        let seen = transport.client.seen.lock();
        assert_eq!(seen[0], (Method::Put, "https://notes.example.com/notes/n1".into()));
        assert_eq!(seen[2].0, Method::Delete);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let client = ScriptedClient::new(vec![Err(SyncError::Timeout)]);
        let transport = HttpTransport::new("http://localhost:8080", client).unwrap();
        assert!(matches!(transport.fetch("n1").await, Err(SyncError::Timeout)));
    }
}
