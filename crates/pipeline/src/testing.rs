//! In-memory upstream services and sink used by the engine's unit tests.
//!
//! [`FakeUpstream`] answers tracker searches, document store probes, and
//! linked-resource lookups from plain maps, and records every request it
//! receives. Records captured by [`MemorySink`] can be written back with
//! [`FakeUpstream::ingest`] to emulate the ingestion destination between
//! cycles.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{SinkError, TransportError};
use crate::ports::{EventSink, HttpRequest, HttpResponse, Service, Transport};
use crate::requests::SEARCH_PATH;
use crate::types::ChangeRecord;

#[derive(Default)]
struct Upstream {
    page_size: u64,
    issues: Vec<Value>,
    documents: HashMap<String, Value>,
    repositories: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    malformed: HashSet<String>,
    requests: Vec<HttpRequest>,
}

pub(crate) struct FakeUpstream {
    state: Mutex<Upstream>,
}

impl FakeUpstream {
    pub(crate) fn new(page_size: u64) -> Self {
        Self {
            state: Mutex::new(Upstream {
                page_size,
                ..Upstream::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Upstream) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Adds (or replaces) a tracker issue.
    pub(crate) fn issue(&self, key: &str, id: &str, updated: &str) {
        let issue = json!({"id": id, "key": key, "fields": {"updated": updated, "summary": key}});
        self.with(|s| match s.issues.iter_mut().find(|i| i["key"] == key) {
            Some(existing) => *existing = issue,
            None => s.issues.push(issue),
        });
    }

    /// Appends a tracker entry exactly as given, well-formed or not.
    pub(crate) fn raw_issue(&self, entry: Value) {
        self.with(|s| s.issues.push(entry));
    }

    /// Stores a document as the ingestion destination would.
    pub(crate) fn store(&self, path: &str, source: Value) {
        self.with(|s| s.documents.insert(path.to_owned(), source));
    }

    /// Stores the tracker's current version of `key` in the issue index.
    pub(crate) fn mirror(&self, key: &str) {
        let issue = self.with(|s| s.issues.iter().find(|i| i["key"] == key).cloned());
        self.store(&format!("issue/doc/{key}"), issue.unwrap());
    }

    pub(crate) fn link_repository(&self, issue_id: &str, url: &str, commits: &[&str]) {
        let commits: Vec<Value> = commits.iter().map(|id| json!({"id": id})).collect();
        self.with(|s| {
            s.repositories
                .entry(issue_id.to_owned())
                .or_default()
                .push(json!({"url": url, "commits": commits}))
        });
    }

    pub(crate) fn fail(&self, path: &str) {
        self.with(|s| s.failing.insert(path.to_owned()));
    }

    pub(crate) fn garble(&self, path: &str) {
        self.with(|s| s.malformed.insert(path.to_owned()));
    }

    pub(crate) fn ingest(&self, records: &[ChangeRecord]) {
        for record in records {
            self.store(
                &format!("{}/doc/{}", record.target_index, record.target_id),
                record.payload.clone(),
            );
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.with(|s| s.requests.clone())
    }

    pub(crate) fn requests_to(&self, service: Service) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.service == service)
            .collect()
    }

    /// `startAt` of every page query (key lookups excluded), in request order.
    pub(crate) fn page_offsets(&self) -> Vec<u64> {
        self.requests_to(Service::Tracker)
            .iter()
            .filter(|r| !r.query_param("jql").is_some_and(|q| q.starts_with("key=")))
            .filter_map(|r| r.query_param("startAt")?.parse().ok())
            .collect()
    }
}

impl Upstream {
    fn search(&self, request: &HttpRequest) -> HttpResponse {
        assert_eq!(request.path, SEARCH_PATH);
        if let Some(key) = request
            .query_param("jql")
            .and_then(|jql| jql.strip_prefix("key="))
        {
            let issues: Vec<&Value> = self.issues.iter().filter(|i| i["key"] == key).collect();
            let body = json!({"startAt": 0, "maxResults": 50, "total": issues.len(), "issues": issues});
            return HttpResponse::new(200, body.to_string());
        }
        let start: usize = request
            .query_param("startAt")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let end = (start + self.page_size as usize).min(self.issues.len());
        let page = self.issues.get(start..end).unwrap_or_default();
        let body = json!({
            "startAt": start,
            "maxResults": self.page_size,
            "total": self.issues.len(),
            "issues": page,
        });
        HttpResponse::new(200, body.to_string())
    }

    fn document(&self, path: &str) -> HttpResponse {
        let id = path.rsplit('/').next().unwrap_or_default();
        match self.documents.get(path) {
            Some(source) => HttpResponse::new(
                200,
                json!({"found": true, "_id": id, "_source": source}).to_string(),
            ),
            None => HttpResponse::new(404, json!({"found": false, "_id": id}).to_string()),
        }
    }

    fn dev_status(&self, request: &HttpRequest) -> HttpResponse {
        let id = request.query_param("issueId").unwrap_or_default();
        let repositories = self.repositories.get(id).cloned().unwrap_or_default();
        HttpResponse::new(
            200,
            json!({"detail": [{"repositories": repositories}]}).to_string(),
        )
    }
}

#[async_trait]
impl Transport for FakeUpstream {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.with(|s| {
            s.requests.push(request.clone());
            if s.failing.contains(&request.path) {
                return Err(TransportError::Connect {
                    service: request.service,
                    message: "connection reset by peer".into(),
                });
            }
            if s.malformed.contains(&request.path) {
                return Ok(HttpResponse::new(200, "<html>bad gateway</html>"));
            }
            Ok(match request.service {
                Service::Tracker => s.search(request),
                Service::DocumentStore => s.document(&request.path),
                Service::LinkedResource => s.dev_status(request),
            })
        })
    }
}

#[derive(Default)]
pub(crate) struct MemorySink {
    records: Mutex<Vec<ChangeRecord>>,
}

impl MemorySink {
    pub(crate) fn take(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, record: ChangeRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
