//! issue-sync HTTP infrastructure adapter.
//!
//! Implements the [`pipeline::Transport`] trait with [`reqwest`]. Each
//! logical [`Service`] maps to a [`ServiceEndpoint`]: a base URL plus an
//! optional `Authorization` header value. The tracker and linked-resource API
//! normally share a host and a token; the document store usually needs none.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** URL construction, header injection, connection
//! pooling, and timeouts live here. The [`pipeline`] crate sees only
//! [`pipeline::Transport`].
//!
//! ## Failure semantics
//!
//! Every response that arrives is returned as `Ok`, whatever its status: a
//! `404 {"found": false}` from the document store is a signal, not an error.
//! Only connection failures, timeouts, and body read errors become
//! [`pipeline::TransportError`]. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

use pipeline::{HttpRequest, HttpResponse, Method, Service, Transport, TransportError};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How requests to a service are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    /// `Authorization: Basic <token>`; the token is sent as configured
    /// (already base64-encoded `user:password`).
    Basic(String),
    /// `Authorization: Bearer <token>`.
    Bearer(String),
}

impl Authorization {
    fn header_value(&self) -> Result<HeaderValue, EndpointError> {
        let value = match self {
            Authorization::Basic(token) => format!("Basic {token}"),
            Authorization::Bearer(token) => format!("Bearer {token}"),
        };
        let mut header =
            HeaderValue::from_str(&value).map_err(|_| EndpointError::InvalidToken)?;
        header.set_sensitive(true);
        Ok(header)
    }
}

// Tokens never reach log output.
impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::Basic(_) => f.write_str("Basic(***)"),
            Authorization::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// Base URL and authorization policy of one upstream service.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Base URL every request path is appended to.
    pub base_url: Url,
    /// Authorization sent with every request, if any.
    pub authorization: Option<Authorization>,
}

impl ServiceEndpoint {
    /// Parses `base_url` into an endpoint without authorization.
    pub fn parse(base_url: &str) -> Result<Self, EndpointError> {
        let base_url = Url::parse(base_url).map_err(|source| EndpointError::InvalidBaseUrl {
            url: base_url.to_owned(),
            source,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(EndpointError::NotABase {
                url: base_url.to_string(),
            });
        }
        Ok(Self {
            base_url,
            authorization: None,
        })
    }

    /// Sends `authorization` with every request to this endpoint.
    #[must_use]
    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = Some(authorization);
        self
    }
}

/// The endpoints of all three upstream services.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Issue tracker search API.
    pub tracker: ServiceEndpoint,
    /// Document store.
    pub document_store: ServiceEndpoint,
    /// Linked-resource (development status) API.
    pub linked_resource: ServiceEndpoint,
}

impl Endpoints {
    fn get(&self, service: Service) -> &ServiceEndpoint {
        match service {
            Service::Tracker => &self.tracker,
            Service::DocumentStore => &self.document_store,
            Service::LinkedResource => &self.linked_resource,
        }
    }
}

/// Errors building a [`ReqwestTransport`].
#[derive(Debug, Error)]
pub enum EndpointError {
    /// A base URL could not be parsed.
    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        /// The configured value.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// A base URL cannot have paths appended (e.g. `mailto:`).
    #[error("base URL '{url}' cannot carry a request path")]
    NotABase {
        /// The configured value.
        url: String,
    },

    /// A token contains characters not allowed in an HTTP header.
    #[error("authorization token contains characters not allowed in an HTTP header")]
    InvalidToken,

    /// The HTTP client could not be initialised.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct ResolvedEndpoint {
    base_url: Url,
    authorization: Option<HeaderValue>,
}

/// A [`Transport`] backed by a pooled [`reqwest::Client`].
pub struct ReqwestTransport {
    client: Client,
    tracker: ResolvedEndpoint,
    document_store: ResolvedEndpoint,
    linked_resource: ResolvedEndpoint,
}

impl ReqwestTransport {
    /// Builds a transport for `endpoints`, failing each request that takes
    /// longer than `timeout`.
    pub fn new(endpoints: &Endpoints, timeout: Duration) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("issue-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(EndpointError::Client)?;
        let resolve = |service: Service| -> Result<ResolvedEndpoint, EndpointError> {
            let endpoint = endpoints.get(service);
            Ok(ResolvedEndpoint {
                base_url: endpoint.base_url.clone(),
                authorization: endpoint
                    .authorization
                    .as_ref()
                    .map(Authorization::header_value)
                    .transpose()?,
            })
        };
        Ok(Self {
            client,
            tracker: resolve(Service::Tracker)?,
            document_store: resolve(Service::DocumentStore)?,
            linked_resource: resolve(Service::LinkedResource)?,
        })
    }

    fn endpoint(&self, service: Service) -> &ResolvedEndpoint {
        match service {
            Service::Tracker => &self.tracker,
            Service::DocumentStore => &self.document_store,
            Service::LinkedResource => &self.linked_resource,
        }
    }

    /// The absolute URL `request` is sent to.
    pub fn url_for(&self, request: &HttpRequest) -> Result<Url, TransportError> {
        let mut url = self.endpoint(request.service).base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl {
                service: request.service,
                message: "base URL cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(request.path.split('/').filter(|s| !s.is_empty()));
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

fn classify(service: Service, error: reqwest::Error) -> TransportError {
    let message = error.to_string();
    if error.is_timeout() {
        TransportError::Timeout { service, message }
    } else if error.is_connect() {
        TransportError::Connect { service, message }
    } else {
        TransportError::Request { service, message }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(request)?;
        let endpoint = self.endpoint(request.service);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            _ => {
                return Err(TransportError::Request {
                    service: request.service,
                    message: format!("unsupported method {}", request.method),
                })
            }
        };

        let mut builder = self.client.request(method, url);
        if let Some(authorization) = &endpoint.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(request.service, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(request.service, e))?;

        let response = HttpResponse::new(status, body.to_vec());
        if !response.is_success() {
            debug!(
                service = %request.service,
                status,
                "non-2xx response handed to continuation"
            );
        }
        Ok(response)
    }
}
