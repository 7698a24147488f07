//! Pagination driver.
//!
//! The next page is requested as soon as the current one arrives, before any
//! of its issues are reconciled, so page fetches overlap item reconciliation.
//! Pagination stops only when the tracker's `total` falls below the next
//! offset; there is no page cap and no deadline.

use tracing::warn;

use crate::ports::HttpRequest;
use crate::requests;
use crate::types::Page;

/// Offset of the page after `page`, or `None` if `page` is the last one.
///
/// A page reporting `maxResults == 0` can never advance and is treated as
/// the last one.
pub fn next_start_at(page: &Page) -> Option<u64> {
    if page.max_results == 0 {
        warn!(
            start_at = page.start_at,
            total = page.total,
            "tracker returned maxResults=0; stopping pagination"
        );
        return None;
    }
    let next = page.start_at.saturating_add(page.max_results);
    (page.total >= next).then_some(next)
}

/// The request for the page after `page`, if there is one.
pub fn next_page_request(page: &Page, jql: Option<&str>) -> Option<HttpRequest> {
    next_start_at(page).map(|start_at| requests::search_page(jql, start_at))
}
