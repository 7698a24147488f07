//! Builders for every request the pipeline sends.

use crate::identifiers::{DocumentId, IssueId, IssueKey};
use crate::ports::{HttpRequest, Service};
use crate::types::TargetIndex;

/// Tracker search endpoint.
pub const SEARCH_PATH: &str = "rest/api/2/search";

/// Linked-resource endpoint listing repositories associated with an issue.
pub const DEV_STATUS_PATH: &str = "rest/dev-status/1.0/issue/detail";

/// One page of the configured search, starting at `start_at`.
pub fn search_page(jql: Option<&str>, start_at: u64) -> HttpRequest {
    let request = HttpRequest::get(Service::Tracker, SEARCH_PATH);
    let request = match jql {
        Some(jql) => request.with_query("jql", jql),
        None => request,
    };
    request.with_query("startAt", start_at.to_string())
}

/// A search matching exactly one issue by key.
pub fn search_key(key: &IssueKey) -> HttpRequest {
    HttpRequest::get(Service::Tracker, SEARCH_PATH).with_query("jql", format!("key={key}"))
}

/// Existence probe for document `id` in `index`.
pub fn document(index: TargetIndex, id: &DocumentId) -> HttpRequest {
    HttpRequest::get(Service::DocumentStore, format!("{index}/doc/{id}"))
}

/// Repositories linked to issue `id`.
pub fn linked_repositories(id: &IssueId) -> HttpRequest {
    HttpRequest::get(Service::LinkedResource, DEV_STATUS_PATH)
        .with_query("issueId", id.as_str())
        .with_query("applicationType", "stash")
        .with_query("dataType", "repository")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_carries_jql_and_offset() {
        let request = search_page(Some("project = ABC"), 20);
        assert_eq!(request.service, Service::Tracker);
        assert_eq!(request.query_param("jql"), Some("project = ABC"));
        assert_eq!(request.query_param("startAt"), Some("20"));

        assert_eq!(search_page(None, 0).query_param("jql"), None);
    }

    #[test]
    fn document_requests_address_the_target_index() {
        let key = IssueKey::new("ABC-1").unwrap();
        assert_eq!(
            document(TargetIndex::Issue, &DocumentId::for_issue(&key)).path,
            "issue/doc/ABC-1"
        );
        assert_eq!(
            document(TargetIndex::LeadTime, &DocumentId::for_lead_time(&key)).path,
            "lead_time/doc/lead-ABC-1"
        );
    }

    #[test]
    fn linked_repositories_use_the_tracker_id() {
        let request = linked_repositories(&IssueId::new("10001").unwrap());
        assert_eq!(request.service, Service::LinkedResource);
        assert_eq!(request.query_param("issueId"), Some("10001"));
        assert_eq!(request.query_param("dataType"), Some("repository"));
    }
}
