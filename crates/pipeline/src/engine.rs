//! Reconciliation engine.
//!
//! One [`Reconciler::run_cycle`] call walks every page of the tracker search
//! and, for each issue, decides between three flows:
//!
//! ```text
//! Probing ──found=false──▶ Creating            (fetch by key, emit)
//!    │
//!    └────found=true───▶ CheckingStaleness     (fetch by key, emit if `updated` differs)
//!                         └─ and concurrently ─▶ lead-time sub-flow
//! ```
//!
//! Every stage is an HTTP request paired with a [`Continuation`] variant that
//! carries the parameters its handler needs. The cycle drains completions one
//! at a time on a single task, so handlers run to completion without locks
//! and in whatever order responses arrive.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};

use crate::dispatcher::{BatchCounter, Completion, Dispatcher};
use crate::errors::ResponseError;
use crate::identifiers::{CycleId, DocumentId, IssueKey};
use crate::lead_time::{LeadTimeResolver, LeadTimeStage, LeadTimeStep};
use crate::pagination;
use crate::ports::{EventSink, HttpResponse, Transport};
use crate::requests;
use crate::types::{ChangeRecord, ExistenceProbe, IssueRef, LeadTimeProjection, Page, TargetIndex};

/// Probes dispatched between two flushes when iterating a page.
pub const DEFAULT_FLUSH_EVERY: NonZeroUsize = match NonZeroUsize::new(2) {
    Some(n) => n,
    None => unreachable!(),
};

/// Tunables of the reconciliation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Tracker query selecting the issues to mirror. `None` searches everything
    /// the credentials can see.
    pub jql: Option<String>,
    /// Flush the request batch after this many per-issue probes.
    pub flush_every: NonZeroUsize,
    /// Shape of emitted lead-time records.
    pub lead_time_projection: LeadTimeProjection,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            jql: None,
            flush_every: DEFAULT_FLUSH_EVERY,
            lead_time_projection: LeadTimeProjection::default(),
        }
    }
}

/// The stage a response is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// A page of the tracker search.
    IssuePage,
    /// The document store probe for an issue from a page.
    IssueProbe {
        /// Issue being reconciled.
        issue: IssueRef,
    },
    /// The full tracker record of an issue missing from the store.
    CreateIssue {
        /// Issue being created.
        key: IssueKey,
    },
    /// The tracker's current record of an issue already in the store.
    CheckLastUpdate {
        /// Issue being checked.
        key: IssueKey,
        /// `updated` as stored in the document store.
        stored_updated: Option<String>,
    },
    /// A stage of the lead-time sub-flow.
    LeadTime(LeadTimeStage),
}

impl Continuation {
    /// Name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Continuation::IssuePage => "issue_page",
            Continuation::IssueProbe { .. } => "issue_probe",
            Continuation::CreateIssue { .. } => "create_issue",
            Continuation::CheckLastUpdate { .. } => "check_last_update",
            Continuation::LeadTime(stage) => stage.name(),
        }
    }
}

/// What one cycle did. Logged when the cycle drains; never fed back to the
/// trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Tracker pages processed.
    pub pages: usize,
    /// Requests handed to the transport.
    pub requests_sent: usize,
    /// Batches flushed.
    pub flushes: usize,
    /// Requests that failed at the transport level.
    pub transport_failures: usize,
    /// Continuations abandoned because their response had an unexpected shape.
    pub malformed_responses: usize,
    /// Issue records emitted (creations and updates).
    pub issues_emitted: usize,
    /// Lead-time records emitted.
    pub lead_times_emitted: usize,
    /// Issues whose stored `updated` matched the tracker.
    pub unchanged: usize,
    /// Records the sink refused.
    pub sink_failures: usize,
}

/// Runs reconciliation cycles against one transport and one sink.
pub struct Reconciler {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    settings: ReconcileSettings,
    lead_time: LeadTimeResolver,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        settings: ReconcileSettings,
    ) -> Self {
        let lead_time = LeadTimeResolver::new(settings.lead_time_projection);
        Self {
            transport,
            sink,
            settings,
            lead_time,
        }
    }

    /// Runs one cycle to completion: every page, every issue, every lead-time
    /// lookup. Individual request failures are logged and skipped.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = CycleId::new_random();
        self.drive()
            .instrument(tracing::info_span!("cycle", %cycle_id))
            .await
    }

    async fn drive(&self) -> CycleReport {
        info!(jql = ?self.settings.jql, "starting poll cycle");
        let mut cycle = Cycle::new(self);
        cycle.dispatcher.dispatch(
            requests::search_page(self.settings.jql.as_deref(), 0),
            Continuation::IssuePage,
        );
        cycle.dispatcher.flush();

        while let Some(completion) = cycle.dispatcher.next_completion().await {
            cycle.complete(completion);
        }

        let report = cycle.finish();
        info!(
            pages = report.pages,
            requests = report.requests_sent,
            issues_emitted = report.issues_emitted,
            lead_times_emitted = report.lead_times_emitted,
            unchanged = report.unchanged,
            transport_failures = report.transport_failures,
            malformed_responses = report.malformed_responses,
            "poll cycle drained"
        );
        report
    }
}

/// State of one running cycle. Dropped when the cycle drains.
struct Cycle<'a> {
    reconciler: &'a Reconciler,
    dispatcher: Dispatcher<Continuation>,
    report: CycleReport,
}

impl<'a> Cycle<'a> {
    fn new(reconciler: &'a Reconciler) -> Self {
        Self {
            reconciler,
            dispatcher: Dispatcher::new(Arc::clone(&reconciler.transport)),
            report: CycleReport::default(),
        }
    }

    fn finish(self) -> CycleReport {
        CycleReport {
            requests_sent: self.dispatcher.sent(),
            flushes: self.dispatcher.flushes(),
            ..self.report
        }
    }

    fn complete(&mut self, completion: Completion<Continuation>) {
        let Completion {
            request,
            continuation,
            outcome,
            elapsed,
        } = completion;
        let name = continuation.name();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.report.transport_failures += 1;
                error!(
                    continuation = name,
                    method = %request.method,
                    request = %request,
                    elapsed_ms,
                    %error,
                    "HTTP request failed"
                );
                return;
            }
        };

        debug!(
            continuation = name,
            request = %request,
            status = response.status,
            elapsed_ms,
            "response received"
        );
        if let Err(error) = self.resume(continuation, &response) {
            self.report.malformed_responses += 1;
            error!(
                continuation = name,
                request = %request,
                status = response.status,
                %error,
                "abandoning continuation after unexpected response"
            );
        }
        self.dispatcher.flush();
    }

    fn resume(
        &mut self,
        continuation: Continuation,
        response: &HttpResponse,
    ) -> Result<(), ResponseError> {
        match continuation {
            Continuation::IssuePage => self.on_issue_page(response),
            Continuation::IssueProbe { issue } => self.on_issue_probe(issue, response),
            Continuation::CreateIssue { key } => self.on_create_issue(&key, response),
            Continuation::CheckLastUpdate {
                key,
                stored_updated,
            } => self.on_check_last_update(&key, stored_updated, response),
            Continuation::LeadTime(stage) => self.on_lead_time(stage, response),
        }
    }

    fn on_issue_page(&mut self, response: &HttpResponse) -> Result<(), ResponseError> {
        let page = Page::from_response(response)?;
        self.report.pages += 1;
        info!(
            start_at = page.start_at,
            max_results = page.max_results,
            total = page.total,
            issues = page.issues.len(),
            "handling issues page"
        );

        // Next page goes out before this page's probes.
        let jql = self.reconciler.settings.jql.as_deref();
        if let Some(next) = pagination::next_page_request(&page, jql) {
            self.dispatcher.dispatch(next, Continuation::IssuePage);
            self.dispatcher.flush();
        }

        let mut batch = BatchCounter::new(self.reconciler.settings.flush_every);
        for (position, entry) in page.issues.into_iter().enumerate() {
            let issue = match entry {
                Ok(issue) => issue,
                Err(error) => {
                    self.report.malformed_responses += 1;
                    error!(
                        continuation = Continuation::IssuePage.name(),
                        offset = page.start_at + position as u64,
                        %error,
                        "skipping unreadable issue on page"
                    );
                    continue;
                }
            };
            debug!(issue = %issue.key, "probing document store");
            self.dispatcher.dispatch(
                requests::document(TargetIndex::Issue, &DocumentId::for_issue(&issue.key)),
                Continuation::IssueProbe {
                    issue: issue.reference(),
                },
            );
            if batch.record() {
                self.dispatcher.flush();
            }
        }
        if batch.has_pending() {
            self.dispatcher.flush();
        }
        Ok(())
    }

    fn on_issue_probe(
        &mut self,
        issue: IssueRef,
        response: &HttpResponse,
    ) -> Result<(), ResponseError> {
        let probe = ExistenceProbe::from_response(response)?;
        let fetch = requests::search_key(&issue.key);

        if !probe.found {
            info!(issue = %issue.key, "issue not in document store; fetching full record");
            self.dispatcher
                .dispatch(fetch, Continuation::CreateIssue { key: issue.key });
            return Ok(());
        }

        debug!(
            issue = %issue.key,
            stored_updated = ?probe.stored_updated,
            "issue in document store; checking for updates"
        );
        self.dispatcher.dispatch(
            fetch,
            Continuation::CheckLastUpdate {
                key: issue.key.clone(),
                stored_updated: probe.stored_updated.clone(),
            },
        );
        let (request, stage) = self.reconciler.lead_time.begin(issue, probe.stored_updated);
        self.dispatcher.dispatch(request, Continuation::LeadTime(stage));
        Ok(())
    }

    fn on_create_issue(
        &mut self,
        key: &IssueKey,
        response: &HttpResponse,
    ) -> Result<(), ResponseError> {
        match Page::from_response(response)?.into_first()? {
            Some(issue) => {
                info!(issue = %issue.key, "adding issue");
                self.emit(ChangeRecord::issue(issue));
            }
            None => warn!(issue = %key, "issue no longer returned by tracker; skipping"),
        }
        Ok(())
    }

    fn on_check_last_update(
        &mut self,
        key: &IssueKey,
        stored_updated: Option<String>,
        response: &HttpResponse,
    ) -> Result<(), ResponseError> {
        let Some(issue) = Page::from_response(response)?.into_first()? else {
            warn!(issue = %key, "issue no longer returned by tracker; skipping");
            return Ok(());
        };

        if issue.updated == stored_updated {
            debug!(issue = %issue.key, updated = ?issue.updated, "issue unchanged");
            self.report.unchanged += 1;
        } else {
            info!(
                issue = %issue.key,
                stored_updated = ?stored_updated,
                updated = ?issue.updated,
                "issue changed; updating"
            );
            self.emit(ChangeRecord::issue(issue));
        }
        Ok(())
    }

    fn on_lead_time(
        &mut self,
        stage: LeadTimeStage,
        response: &HttpResponse,
    ) -> Result<(), ResponseError> {
        match self.reconciler.lead_time.resume(stage, response)? {
            LeadTimeStep::AlreadyRecorded { key } => {
                debug!(issue = %key, "lead time already recorded");
            }
            LeadTimeStep::Fetch { request, stage } => {
                self.dispatcher.dispatch(request, Continuation::LeadTime(stage));
            }
            LeadTimeStep::NoRepository { key } => {
                debug!(issue = %key, "no linked repository yet; lead time deferred");
            }
            LeadTimeStep::Emit(record) => {
                info!(issue = %record.id, repo_url = ?record.repo_url, "adding lead time");
                self.emit(ChangeRecord::lead_time(&record));
            }
        }
        Ok(())
    }

    fn emit(&mut self, record: ChangeRecord) {
        let index = record.target_index;
        let id = record.target_id.clone();
        match self.reconciler.sink.emit(record) {
            Ok(()) => match index {
                TargetIndex::Issue => self.report.issues_emitted += 1,
                TargetIndex::LeadTime => self.report.lead_times_emitted += 1,
            },
            Err(error) => {
                self.report.sink_failures += 1;
                error!(%index, %id, %error, "failed to emit change record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ports::Service;
    use crate::sink::ChannelSink;
    use crate::testing::{FakeUpstream, MemorySink};

    fn setup(page_size: u64) -> (Arc<FakeUpstream>, Arc<MemorySink>, Reconciler) {
        let upstream = Arc::new(FakeUpstream::new(page_size));
        let sink = Arc::new(MemorySink::default());
        let reconciler = Reconciler::new(
            upstream.clone(),
            sink.clone(),
            ReconcileSettings::default(),
        );
        (upstream, sink, reconciler)
    }

    fn settle_lead_time(upstream: &FakeUpstream, key: &str) {
        upstream.store(&format!("lead_time/doc/lead-{key}"), json!({"id": key}));
    }

    #[tokio::test]
    async fn fetches_every_page_until_total_is_exhausted() {
        let (upstream, sink, reconciler) = setup(10);
        for n in 1..=25 {
            let key = format!("ABC-{n}");
            upstream.issue(&key, &(10_000 + n).to_string(), "T1");
            upstream.mirror(&key);
            settle_lead_time(&upstream, &key);
        }

        let report = reconciler.run_cycle().await;

        assert_eq!(upstream.page_offsets(), vec![0, 10, 20]);
        assert_eq!(report.pages, 3);
        assert_eq!(report.unchanged, 25);
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn missing_issue_is_fetched_and_emitted_once() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");

        let report = reconciler.run_cycle().await;

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_index, TargetIndex::Issue);
        assert_eq!(records[0].target_id.as_str(), "ABC-1");
        assert_eq!(records[0].payload["fields"]["updated"], "T1");
        assert_eq!(report.issues_emitted, 1);

        // A missing issue never enters the lead-time flow.
        let store_paths: Vec<String> = upstream
            .requests_to(Service::DocumentStore)
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(store_paths, vec!["issue/doc/ABC-1"]);
        assert!(upstream.requests_to(Service::LinkedResource).is_empty());
    }

    #[tokio::test]
    async fn stale_issue_is_re_emitted() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T2");
        upstream.store(
            "issue/doc/ABC-1",
            json!({"key": "ABC-1", "fields": {"updated": "T1"}}),
        );
        settle_lead_time(&upstream, "ABC-1");

        reconciler.run_cycle().await;

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_id.as_str(), "ABC-1");
        assert_eq!(records[0].payload["fields"]["updated"], "T2");
    }

    #[tokio::test]
    async fn stale_issue_without_lead_time_emits_both_records() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T2");
        upstream.store(
            "issue/doc/ABC-1",
            json!({"key": "ABC-1", "fields": {"updated": "T1"}}),
        );
        upstream.link_repository("10001", "https://repo/x", &["c1"]);

        let report = reconciler.run_cycle().await;

        let mut records = sink.take();
        records.sort_by(|a, b| a.target_id.as_str().cmp(b.target_id.as_str()));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target_index, TargetIndex::Issue);
        assert_eq!(records[0].payload["fields"]["updated"], "T2");
        assert_eq!(records[1].target_index, TargetIndex::LeadTime);
        assert_eq!(records[1].target_id.as_str(), "lead-ABC-1");
        assert_eq!(records[1].payload["createdAt"], "T1");
        assert_eq!((report.issues_emitted, report.lead_times_emitted), (1, 1));
    }

    #[tokio::test]
    async fn unchanged_issue_is_not_emitted() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "2024-01-01T10:00:00.000+0000");
        upstream.mirror("ABC-1");
        settle_lead_time(&upstream, "ABC-1");

        let report = reconciler.run_cycle().await;

        assert!(sink.take().is_empty());
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn timestamps_are_compared_as_exact_strings() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "2024-01-01T10:00:00.000+0000");
        upstream.store(
            "issue/doc/ABC-1",
            json!({"fields": {"updated": "2024-01-01T10:00:00+00:00"}}),
        );
        settle_lead_time(&upstream, "ABC-1");

        reconciler.run_cycle().await;

        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn recorded_lead_time_skips_linked_lookup() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.mirror("ABC-1");
        settle_lead_time(&upstream, "ABC-1");
        upstream.link_repository("10001", "https://repo/x", &["c1"]);

        reconciler.run_cycle().await;

        assert!(upstream.requests_to(Service::LinkedResource).is_empty());
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn lead_time_is_derived_from_first_linked_repository() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.mirror("ABC-1");
        upstream.link_repository("10001", "https://repo/x", &["c1", "c2"]);
        upstream.link_repository("10001", "https://repo/y", &["c3"]);

        let report = reconciler.run_cycle().await;

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_index, TargetIndex::LeadTime);
        assert_eq!(records[0].target_id.as_str(), "lead-ABC-1");
        assert_eq!(records[0].payload["repoUrl"], "https://repo/x");
        assert_eq!(records[0].payload["commitIds"], json!(["c1", "c2"]));
        assert_eq!(records[0].payload["createdAt"], "T1");
        assert_eq!((report.issues_emitted, report.lead_times_emitted), (0, 1));
    }

    #[tokio::test]
    async fn lead_time_without_linked_repository_is_deferred() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.mirror("ABC-1");

        reconciler.run_cycle().await;
        reconciler.run_cycle().await;

        assert!(sink.take().is_empty());
        // Re-probed on every cycle because nothing was written.
        assert_eq!(upstream.requests_to(Service::LinkedResource).len(), 2);
    }

    #[tokio::test]
    async fn second_pass_over_unchanged_upstream_emits_nothing() {
        let (upstream, sink, reconciler) = setup(2);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.issue("ABC-2", "10002", "T1");
        upstream.issue("ABC-3", "10003", "T1");
        upstream.link_repository("10002", "https://repo/x", &[]);

        reconciler.run_cycle().await;
        let created = sink.take();
        assert_eq!(created.len(), 3);
        upstream.ingest(&created);

        reconciler.run_cycle().await;
        let lead_times = sink.take();
        assert_eq!(lead_times.len(), 1);
        assert_eq!(lead_times[0].target_id.as_str(), "lead-ABC-2");
        upstream.ingest(&lead_times);

        let report = reconciler.run_cycle().await;
        assert!(sink.take().is_empty());
        assert_eq!(report.unchanged, 3);

        // An upstream edit is picked up on the next pass.
        upstream.issue("ABC-3", "10003", "T2");
        reconciler.run_cycle().await;
        let updated = sink.take();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].target_id.as_str(), "ABC-3");
    }

    #[tokio::test]
    async fn transport_failure_only_drops_that_request() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.issue("ABC-2", "10002", "T1");
        upstream.fail("issue/doc/ABC-1");

        let report = reconciler.run_cycle().await;

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_id.as_str(), "ABC-2");
        assert_eq!(report.transport_failures, 1);
    }

    #[tokio::test]
    async fn malformed_probe_only_abandons_that_continuation() {
        let (upstream, sink, reconciler) = setup(10);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.issue("ABC-2", "10002", "T1");
        upstream.garble("issue/doc/ABC-1");

        let report = reconciler.run_cycle().await;

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_id.as_str(), "ABC-2");
        assert_eq!(report.malformed_responses, 1);
    }

    #[tokio::test]
    async fn unreadable_issue_on_a_page_skips_only_that_issue() {
        let (upstream, sink, reconciler) = setup(2);
        upstream.issue("ABC-1", "10001", "T1");
        upstream.raw_issue(json!({"id": "10002", "fields": {"updated": "T1"}}));
        upstream.issue("ABC-3", "10003", "T1");
        upstream.issue("ABC-4", "10004", "T1");
        upstream.issue("ABC-5", "10005", "T1");

        let report = reconciler.run_cycle().await;

        assert_eq!(upstream.page_offsets(), vec![0, 2, 4]);
        let mut emitted: Vec<String> = sink
            .take()
            .iter()
            .map(|r| r.target_id.as_str().to_owned())
            .collect();
        emitted.sort();
        assert_eq!(emitted, vec!["ABC-1", "ABC-3", "ABC-4", "ABC-5"]);
        assert_eq!(report.malformed_responses, 1);
        assert_eq!(report.pages, 3);
    }

    #[tokio::test]
    async fn closed_sink_is_counted_and_the_cycle_completes() {
        let upstream = Arc::new(FakeUpstream::new(10));
        upstream.issue("ABC-1", "10001", "T1");
        upstream.issue("ABC-2", "10002", "T1");
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        let reconciler =
            Reconciler::new(upstream.clone(), Arc::new(sink), ReconcileSettings::default());

        let report = reconciler.run_cycle().await;

        assert_eq!(report.sink_failures, 2);
        assert_eq!(report.issues_emitted, 0);
    }

    fn page_body(total: u64, keys: &[&str]) -> HttpResponse {
        let issues: Vec<_> = keys
            .iter()
            .enumerate()
            .map(|(n, key)| json!({"id": n.to_string(), "key": key, "fields": {}}))
            .collect();
        page_of(total, issues)
    }

    fn page_of(total: u64, issues: Vec<serde_json::Value>) -> HttpResponse {
        let body = json!({"startAt": 0, "maxResults": 10, "total": total, "issues": issues});
        HttpResponse::new(200, body.to_string())
    }

    #[tokio::test]
    async fn page_probes_are_flushed_in_pairs() {
        let (upstream, _sink, reconciler) = setup(10);
        let keys = ["A-1", "A-2", "A-3", "A-4", "A-5"];

        let mut cycle = Cycle::new(&reconciler);
        cycle.on_issue_page(&page_body(5, &keys)).unwrap();
        assert_eq!((cycle.dispatcher.sent(), cycle.dispatcher.flushes()), (5, 3));

        // With a further page pending, that fetch is flushed on its own first.
        let mut cycle = Cycle::new(&reconciler);
        cycle.on_issue_page(&page_body(15, &keys)).unwrap();
        assert_eq!((cycle.dispatcher.sent(), cycle.dispatcher.flushes()), (6, 4));

        let first = cycle.dispatcher.next_completion().await.unwrap();
        assert_eq!(first.continuation, Continuation::IssuePage);
        assert_eq!(first.request.query_param("startAt"), Some("10"));
        while cycle.dispatcher.next_completion().await.is_some() {}
        let sent = upstream.requests();
        assert_eq!(sent[0].service, Service::Tracker);
        assert!(sent[1..].iter().all(|r| r.service == Service::DocumentStore));
    }

    #[tokio::test]
    async fn unreadable_entry_does_not_hold_back_the_next_page() {
        let (_upstream, _sink, reconciler) = setup(10);
        let issues = vec![
            json!({"id": "1", "key": "A-1", "fields": {}}),
            json!({"id": "2", "fields": {}}),
        ];

        let mut cycle = Cycle::new(&reconciler);
        cycle.on_issue_page(&page_of(25, issues)).unwrap();

        assert_eq!(cycle.report.malformed_responses, 1);
        assert_eq!(cycle.dispatcher.sent(), 2);
        let mut continuations = Vec::new();
        while let Some(completion) = cycle.dispatcher.next_completion().await {
            continuations.push(completion.continuation.name());
        }
        assert_eq!(continuations, vec!["issue_page", "issue_probe"]);
    }

    #[test]
    fn flush_interval_is_tunable() {
        let upstream = Arc::new(FakeUpstream::new(10));
        let settings = ReconcileSettings {
            flush_every: NonZeroUsize::new(5).unwrap(),
            ..ReconcileSettings::default()
        };
        let reconciler = Reconciler::new(upstream, Arc::new(MemorySink::default()), settings);

        let mut cycle = Cycle::new(&reconciler);
        cycle
            .on_issue_page(&page_body(5, &["A-1", "A-2", "A-3", "A-4", "A-5"]))
            .unwrap();
        assert_eq!(cycle.dispatcher.flushes(), 1);
    }
}
