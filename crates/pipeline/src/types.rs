//! Value types exchanged between the upstream services, the engine, and the
//! emission sink.
//!
//! Upstream bodies are decoded into narrow typed views carrying only the
//! fields the engine makes decisions on. The issue payload that is emitted
//! keeps the full upstream JSON so the mirror carries every field the tracker
//! returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ResponseError;
use crate::identifiers::{DocumentId, IssueId, IssueKey};
use crate::ports::HttpResponse;

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// One issue as returned by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    /// Tracker-internal identifier; addresses the linked-resource API.
    pub id: IssueId,
    /// Stable issue key; the identity of the issue everywhere else.
    pub key: IssueKey,
    /// `fields.updated` exactly as the tracker serialised it.
    ///
    /// Compared by string equality only; never parsed.
    pub updated: Option<String>,
    raw: Value,
}

#[derive(Deserialize)]
struct IssueView {
    #[serde(default)]
    id: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    fields: FieldsView,
}

#[derive(Default, Deserialize)]
struct FieldsView {
    #[serde(default)]
    updated: Option<String>,
}

impl Issue {
    fn from_value(raw: Value, status: u16) -> Result<Self, ResponseError> {
        let view: IssueView =
            serde_json::from_value(raw.clone()).map_err(|source| ResponseError::Malformed {
                status,
                excerpt: raw.to_string().chars().take(120).collect(),
                source,
            })?;
        let id = IssueId::new(view.id).ok_or(ResponseError::MissingField { status, field: "id" })?;
        let key =
            IssueKey::new(view.key).ok_or(ResponseError::MissingField { status, field: "key" })?;
        Ok(Self {
            id,
            key,
            updated: view.fields.updated,
            raw,
        })
    }

    /// Consumes the issue, returning the tracker's JSON.
    pub fn into_payload(self) -> Value {
        self.raw
    }

    /// The key/id pair that later stages need to address this issue.
    pub fn reference(&self) -> IssueRef {
        IssueRef {
            key: self.key.clone(),
            id: self.id.clone(),
        }
    }
}

/// The identity of an issue carried through continuations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueRef {
    /// Issue key.
    pub key: IssueKey,
    /// Tracker-internal id.
    pub id: IssueId,
}

/// One page of tracker search results.
///
/// The page fields are decoded eagerly; each issue is decoded on its own so a
/// single malformed entry neither hides its siblings nor stops pagination.
#[derive(Debug)]
pub struct Page {
    /// Offset of the first issue on this page.
    pub start_at: u64,
    /// Page size the tracker applied.
    pub max_results: u64,
    /// Total number of issues matching the query.
    pub total: u64,
    /// Issues on this page, in tracker order.
    pub issues: Vec<Result<Issue, ResponseError>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageView {
    start_at: u64,
    max_results: u64,
    total: u64,
    #[serde(default)]
    issues: Vec<Value>,
}

impl Page {
    /// Decodes a tracker search response. Fails only when the page fields
    /// themselves are unreadable.
    pub fn from_response(response: &HttpResponse) -> Result<Self, ResponseError> {
        let view: PageView = response.json()?;
        Ok(Self {
            start_at: view.start_at,
            max_results: view.max_results,
            total: view.total,
            issues: view
                .issues
                .into_iter()
                .map(|raw| Issue::from_value(raw, response.status))
                .collect(),
        })
    }

    /// Consumes the page, returning its first issue.
    ///
    /// Key queries (`jql=key=ABC-1`) return at most one issue.
    pub fn into_first(self) -> Result<Option<Issue>, ResponseError> {
        self.issues.into_iter().next().transpose()
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// The outcome of a read-only existence check against the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceProbe {
    /// Whether the document exists.
    pub found: bool,
    /// `_source.fields.updated` of the stored document, if present.
    pub stored_updated: Option<String>,
}

#[derive(Deserialize)]
struct StoredDocumentView {
    found: Option<bool>,
    #[serde(rename = "_source", default)]
    source: Option<StoredSourceView>,
}

#[derive(Deserialize)]
struct StoredSourceView {
    #[serde(default)]
    fields: Option<FieldsView>,
}

impl ExistenceProbe {
    /// Decodes a `GET /<index>/doc/<id>` response.
    ///
    /// A 404 whose body carries no `found` flag (the store's answer when the
    /// index itself does not exist yet) is read as "not found". Any other body
    /// without `found` is malformed.
    pub fn from_response(response: &HttpResponse) -> Result<Self, ResponseError> {
        let view: StoredDocumentView = response.json()?;
        let found = match view.found {
            Some(found) => found,
            None if response.status == 404 => false,
            None => {
                return Err(ResponseError::MissingField {
                    status: response.status,
                    field: "found",
                })
            }
        };
        let stored_updated = view
            .source
            .and_then(|source| source.fields)
            .and_then(|fields| fields.updated);
        Ok(Self {
            found,
            stored_updated,
        })
    }
}

// ---------------------------------------------------------------------------
// Linked-resource API
// ---------------------------------------------------------------------------

/// A repository linked to an issue by the development-status API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkedRepository {
    /// Browse URL of the repository.
    #[serde(default)]
    pub url: Option<String>,
    /// Commits referencing the issue in this repository.
    #[serde(default)]
    pub commits: Vec<LinkedCommit>,
}

/// A commit referencing an issue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkedCommit {
    /// Commit hash.
    pub id: String,
}

/// Body of `GET /rest/dev-status/1.0/issue/detail`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DevStatusDetail {
    /// One entry per linked application instance.
    pub detail: Vec<DevStatusEntry>,
}

/// Repositories reported by one application instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DevStatusEntry {
    /// Linked repositories, possibly empty.
    #[serde(default)]
    pub repositories: Vec<LinkedRepository>,
}

impl DevStatusDetail {
    /// Decodes a development-status response.
    pub fn from_response(response: &HttpResponse) -> Result<Self, ResponseError> {
        response.json()
    }

    /// Consumes the detail, returning the first linked repository across all
    /// application instances.
    pub fn into_first_repository(self) -> Option<LinkedRepository> {
        self.detail
            .into_iter()
            .flat_map(|entry| entry.repositories)
            .next()
    }
}

// ---------------------------------------------------------------------------
// Emitted records
// ---------------------------------------------------------------------------

/// Destination index of a [`ChangeRecord`].
///
/// The same names address the document store when probing, so what a cycle
/// emits is exactly what the next cycle's probes look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetIndex {
    /// Mirrored tracker issues.
    Issue,
    /// Derived lead-time records.
    LeadTime,
}

impl TargetIndex {
    /// Index name as used in document store paths and record metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetIndex::Issue => "issue",
            TargetIndex::LeadTime => "lead_time",
        }
    }
}

impl std::fmt::Display for TargetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized unit handed to the [`crate::EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Destination index.
    pub target_index: TargetIndex,
    /// Destination document id.
    pub target_id: DocumentId,
    /// Document body.
    pub payload: Value,
}

impl ChangeRecord {
    /// A record mirroring `issue` into the issue index.
    pub fn issue(issue: Issue) -> Self {
        Self {
            target_index: TargetIndex::Issue,
            target_id: DocumentId::for_issue(&issue.key),
            payload: issue.into_payload(),
        }
    }

    /// A record storing `record` in the lead-time index.
    pub fn lead_time(record: &LeadTimeRecord) -> Self {
        Self {
            target_index: TargetIndex::LeadTime,
            target_id: DocumentId::for_lead_time(&record.id),
            payload: record.to_payload(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lead time
// ---------------------------------------------------------------------------

/// Which linked-resource data a [`LeadTimeRecord`] carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTimeProjection {
    /// Only the first linked repository's URL.
    Url,
    /// Only the commit ids in the first linked repository.
    Commits,
    /// Both the URL and the commit ids.
    #[default]
    Both,
}

impl LeadTimeProjection {
    /// Builds the record for `key` from its first linked repository.
    pub fn project(
        self,
        key: IssueKey,
        created_at: Option<String>,
        repository: LinkedRepository,
    ) -> LeadTimeRecord {
        let commit_ids = || -> Vec<String> {
            repository.commits.iter().map(|c| c.id.clone()).collect()
        };
        let (repo_url, commit_ids) = match self {
            LeadTimeProjection::Url => (repository.url.clone(), None),
            LeadTimeProjection::Commits => (None, Some(commit_ids())),
            LeadTimeProjection::Both => (repository.url.clone(), Some(commit_ids())),
        };
        LeadTimeRecord {
            id: key,
            created_at,
            repo_url,
            commit_ids,
        }
    }
}

/// The association between an issue and its first linked repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadTimeRecord {
    /// Key of the issue the record was derived from.
    pub id: IssueKey,
    /// The issue's `updated` timestamp as stored when it was probed.
    pub created_at: Option<String>,
    /// URL of the first linked repository.
    pub repo_url: Option<String>,
    /// Commit ids in the first linked repository.
    pub commit_ids: Option<Vec<String>>,
}

impl LeadTimeRecord {
    fn to_payload(&self) -> Value {
        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), Value::from(self.id.as_str()));
        fields.insert(
            "createdAt".into(),
            self.created_at.clone().map_or(Value::Null, Value::from),
        );
        if let Some(url) = &self.repo_url {
            fields.insert("repoUrl".into(), Value::from(url.as_str()));
        }
        if let Some(ids) = &self.commit_ids {
            fields.insert("commitIds".into(), Value::from(ids.clone()));
        }
        Value::Object(fields)
    }
}
