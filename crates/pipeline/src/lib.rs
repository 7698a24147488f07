//! Reconciliation domain for issue-sync.
//!
//! This crate decides which tracker issues must be mirrored into the
//! document store and which lead-time records must be derived. It contains
//! every domain type, the request dispatcher, and the engines that drive a
//! poll cycle. Infrastructure crates implement the port traits defined here;
//! they never add reconciliation rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It describes *what* to request through [`Transport`] and *what* to emit
//! through [`EventSink`]; the `transport` crate and the binary define *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`IssueKey`, `DocumentId`, `CycleId`, etc.) |
//! | [`types`] | Upstream response views and emitted records |
//! | [`errors`] | Transport, response, and sink error types |
//! | [`ports`] | `Transport` and `EventSink` traits, request/response values |
//! | [`requests`] | Builders for every request the pipeline sends |
//! | [`dispatcher`] | Batching request dispatcher and completion routing |
//! | [`pagination`] | Next-page decision |
//! | [`engine`] | Per-issue reconciliation state machine and cycle driver |
//! | [`lead_time`] | Gated lead-time sub-flow |
//! | [`sink`] | Channel-backed [`EventSink`] |

pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod identifiers;
pub mod lead_time;
pub mod pagination;
pub mod ports;
pub mod requests;
pub mod sink;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use dispatcher::{BatchCounter, Completion, Dispatcher};
pub use engine::{Continuation, CycleReport, ReconcileSettings, Reconciler, DEFAULT_FLUSH_EVERY};
pub use errors::{ResponseError, SinkError, TransportError};
pub use identifiers::{CycleId, DocumentId, IssueId, IssueKey};
pub use lead_time::{LeadTimeResolver, LeadTimeStage, LeadTimeStep};
pub use ports::{EventSink, HttpRequest, HttpResponse, Method, Service, Transport};
pub use sink::ChannelSink;
pub use types::{
    ChangeRecord, DevStatusDetail, ExistenceProbe, Issue, IssueRef, LeadTimeProjection,
    LeadTimeRecord, LinkedRepository, Page, TargetIndex,
};
