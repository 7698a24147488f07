//! Lead-time resolver.
//!
//! A gated sub-flow entered only for issues that already exist in the
//! document store. It probes for `lead-<key>` in the lead-time index and,
//! only when that document is absent, asks the linked-resource API which
//! repositories reference the issue. The first linked repository becomes a
//! [`LeadTimeRecord`].
//!
//! An existing lead-time document is never overwritten. When no repository
//! is linked nothing is written, so the issue is probed again next cycle.
//!
//! The resolver is pure: it builds requests and interprets responses, and the
//! engine dispatches and emits on its behalf.

use crate::errors::ResponseError;
use crate::identifiers::{DocumentId, IssueKey};
use crate::ports::{HttpRequest, HttpResponse};
use crate::requests;
use crate::types::{
    DevStatusDetail, ExistenceProbe, IssueRef, LeadTimeProjection, LeadTimeRecord, TargetIndex,
};

/// Where a lead-time sub-flow is waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadTimeStage {
    /// Waiting for the lead-time document probe.
    Probe {
        /// Issue being resolved.
        issue: IssueRef,
        /// Timestamp recorded as `createdAt` if a record is produced.
        created_at: Option<String>,
    },
    /// Waiting for the linked-repository lookup.
    Repositories {
        /// Issue being resolved.
        key: IssueKey,
        /// Timestamp recorded as `createdAt` if a record is produced.
        created_at: Option<String>,
    },
}

impl LeadTimeStage {
    /// Continuation name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            LeadTimeStage::Probe { .. } => "lead_time_probe",
            LeadTimeStage::Repositories { .. } => "linked_repositories",
        }
    }
}

/// What the engine must do after a lead-time response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadTimeStep {
    /// A lead-time document already exists for `key`.
    AlreadyRecorded {
        /// Issue key.
        key: IssueKey,
    },
    /// Dispatch `request` and resume at `stage`.
    Fetch {
        /// Linked-resource lookup.
        request: HttpRequest,
        /// Stage handling the lookup's response.
        stage: LeadTimeStage,
    },
    /// No repository is linked to `key` yet.
    NoRepository {
        /// Issue key.
        key: IssueKey,
    },
    /// Emit this record.
    Emit(LeadTimeRecord),
}

/// Drives the lead-time sub-flow for one issue at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadTimeResolver {
    projection: LeadTimeProjection,
}

impl LeadTimeResolver {
    /// Creates a resolver shaping records with `projection`.
    pub fn new(projection: LeadTimeProjection) -> Self {
        Self { projection }
    }

    /// The probe request that starts the sub-flow for `issue`.
    pub fn begin(
        &self,
        issue: IssueRef,
        created_at: Option<String>,
    ) -> (HttpRequest, LeadTimeStage) {
        let request = requests::document(
            TargetIndex::LeadTime,
            &DocumentId::for_lead_time(&issue.key),
        );
        (request, LeadTimeStage::Probe { issue, created_at })
    }

    /// Interprets the response to `stage`.
    pub fn resume(
        &self,
        stage: LeadTimeStage,
        response: &HttpResponse,
    ) -> Result<LeadTimeStep, ResponseError> {
        match stage {
            LeadTimeStage::Probe { issue, created_at } => {
                let probe = ExistenceProbe::from_response(response)?;
                if probe.found {
                    return Ok(LeadTimeStep::AlreadyRecorded { key: issue.key });
                }
                Ok(LeadTimeStep::Fetch {
                    request: requests::linked_repositories(&issue.id),
                    stage: LeadTimeStage::Repositories {
                        key: issue.key,
                        created_at,
                    },
                })
            }
            LeadTimeStage::Repositories { key, created_at } => {
                let detail = DevStatusDetail::from_response(response)?;
                Ok(match detail.into_first_repository() {
                    Some(repository) => {
                        LeadTimeStep::Emit(self.projection.project(key, created_at, repository))
                    }
                    None => LeadTimeStep::NoRepository { key },
                })
            }
        }
    }
}
