//! Error types for the reconciliation domain.
//!
//! Each error is scoped to the single request or continuation that produced
//! it. Nothing here aborts a cycle: a cycle with N failed requests still
//! completes, having emitted whatever succeeded.
//!
//! | Error | Produced by | Effect |
//! |-------|-------------|--------|
//! | [`TransportError`] | a [`crate::Transport`] implementation | continuation never fires |
//! | [`ResponseError`] | decoding a response body | only that continuation is abandoned |
//! | [`SinkError`] | an [`crate::EventSink`] implementation | the record is lost, the cycle continues |

use thiserror::Error;

use crate::ports::Service;

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

/// A network-level failure of one dispatched request.
///
/// A non-2xx HTTP status is **not** a transport failure: a document store
/// answering `404 {"found": false}` is a normal response that the engine uses
/// as a signal. Only failures that leave no response to inspect land here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection to the upstream service could not be established.
    #[error("connection to {service} failed: {message}")]
    Connect {
        /// Upstream the request was addressed to.
        service: Service,
        /// Underlying cause as reported by the HTTP client.
        message: String,
    },

    /// The request did not complete within the transport's timeout.
    #[error("request to {service} timed out: {message}")]
    Timeout {
        /// Upstream the request was addressed to.
        service: Service,
        /// Underlying cause as reported by the HTTP client.
        message: String,
    },

    /// The request could not be turned into a valid URL for its service.
    #[error("invalid URL for {service}: {message}")]
    InvalidUrl {
        /// Upstream the request was addressed to.
        service: Service,
        /// Why the URL could not be built.
        message: String,
    },

    /// Any other failure while sending the request or reading its body.
    #[error("request to {service} failed: {message}")]
    Request {
        /// Upstream the request was addressed to.
        service: Service,
        /// Underlying cause as reported by the HTTP client.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

/// A response arrived but its body does not have the expected shape.
///
/// Fails only the continuation that tried to decode it; sibling requests in
/// the same cycle are unaffected.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The body is not JSON, or its JSON does not match the expected schema.
    #[error("malformed response body (HTTP {status}): {source}; body starts with {excerpt:?}")]
    Malformed {
        /// HTTP status of the response.
        status: u16,
        /// Leading bytes of the body, lossily decoded, for the log line.
        excerpt: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The body decoded but a field the engine relies on is absent or empty.
    #[error("response is missing required field '{field}' (HTTP {status})")]
    MissingField {
        /// HTTP status of the response.
        status: u16,
        /// Name of the missing field.
        field: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// The emission sink refused a record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The downstream queue has been closed.
    #[error("emission sink is closed")]
    Closed,
}
