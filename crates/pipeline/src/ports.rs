//! Port traits implemented by infrastructure crates.
//!
//! The engine describes *what* to fetch as an [`HttpRequest`] addressed to a
//! logical [`Service`]; an infrastructure [`Transport`] decides *how*: base
//! URI, authorization header, connection pooling, timeouts. Emitted records
//! leave through an [`EventSink`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ResponseError, SinkError, TransportError};
use crate::types::ChangeRecord;

/// Number of body bytes quoted in a [`ResponseError::Malformed`] log line.
const EXCERPT_LEN: usize = 120;

// ---------------------------------------------------------------------------
// Request description
// ---------------------------------------------------------------------------

/// The three upstream services a cycle talks to.
///
/// Each service has its own base URI and authorization policy, resolved by
/// the [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// The issue tracker's search API.
    Tracker,
    /// The downstream document store that mirrors emitted records.
    DocumentStore,
    /// The tracker's development-status API linking issues to repositories.
    LinkedResource,
}

impl Service {
    /// Stable lower-case name used in log fields and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Tracker => "tracker",
            Service::DocumentStore => "document_store",
            Service::LinkedResource => "linked_resource",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of an [`HttpRequest`].
///
/// Every stage of the pipeline is a read; the engine never mutates upstream
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Method {
    /// `GET`
    Get,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
        }
    }
}

/// One request, relative to its service's base URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Upstream the request is addressed to.
    pub service: Service,
    /// HTTP method.
    pub method: Method,
    /// Path segments joined by `/`, without a leading slash
    /// (e.g. `"issue/doc/ABC-1"`). Each segment is percent-encoded by the
    /// transport.
    pub path: String,
    /// Query parameters in the order they are sent.
    pub query: Vec<(String, String)>,
}

impl HttpRequest {
    /// Creates a `GET` request for `path` on `service` with no query.
    pub fn get(service: Service, path: impl Into<String>) -> Self {
        Self {
            service,
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Appends one query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Returns the value of the first query parameter called `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:/{}", self.method, self.service, self.path)?;
        for (i, (name, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response from a status and a body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON into `T`.
    ///
    /// The status is deliberately ignored: callers decide what a non-2xx body
    /// means.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ResponseError> {
        serde_json::from_slice(&self.body).map_err(|source| ResponseError::Malformed {
            status: self.status,
            excerpt: self.excerpt(),
            source,
        })
    }

    fn excerpt(&self) -> String {
        let end = self.body.len().min(EXCERPT_LEN);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Sends one [`HttpRequest`] and returns its response.
///
/// Implementations resolve the base URI and authorization policy of the
/// request's [`Service`]. They must return `Ok` for every response that
/// arrived, including 4xx and 5xx; `Err` is reserved for transport-level
/// failures. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes `request` and waits for its response.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Receives every [`ChangeRecord`] a cycle produces.
///
/// No buffering, batching, or de-duplication is expected of the sink:
/// de-duplication is the responsibility of the existence probes upstream.
pub trait EventSink: Send + Sync {
    /// Hands `record` to the downstream queue.
    fn emit(&self, record: ChangeRecord) -> Result<(), SinkError>;
}
