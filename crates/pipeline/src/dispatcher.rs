//! Request dispatcher: a batch accumulator in front of a [`Transport`].
//!
//! [`Dispatcher::dispatch`] only *queues* a request together with the
//! continuation that must handle its response. Queued requests start moving
//! when [`Dispatcher::flush`] hands the whole batch to the transport. Finished
//! requests are collected one at a time through
//! [`Dispatcher::next_completion`], so whoever drives the dispatcher runs
//! every continuation body to completion before the next one starts: handlers
//! may mutate cycle state without locks.
//!
//! A dispatcher belongs to exactly one cycle. Nothing is shared between
//! cycles, so overlapping cycles cannot interleave counters.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::debug;

use crate::errors::TransportError;
use crate::ports::{HttpRequest, HttpResponse, Transport};

/// A finished request, routed back to the continuation it was dispatched with.
#[derive(Debug)]
pub struct Completion<C> {
    /// The request as dispatched.
    pub request: HttpRequest,
    /// The continuation that must handle the outcome.
    pub continuation: C,
    /// The response, or the transport failure that prevented one.
    pub outcome: Result<HttpResponse, TransportError>,
    /// Time between the flush that sent the request and its completion.
    pub elapsed: Duration,
}

/// Queues requests, sends them in batches, and yields their completions.
pub struct Dispatcher<C> {
    transport: Arc<dyn Transport>,
    queued: Vec<(HttpRequest, C)>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion<C>>>,
    sent: usize,
    flushes: usize,
}

impl<C: Send + 'static> Dispatcher<C> {
    /// Creates an empty dispatcher sending through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            queued: Vec::new(),
            in_flight: FuturesUnordered::new(),
            sent: 0,
            flushes: 0,
        }
    }

    /// Queues `request`; its outcome will be delivered with `continuation`.
    ///
    /// Nothing is sent until the next [`flush`](Self::flush).
    pub fn dispatch(&mut self, request: HttpRequest, continuation: C) {
        debug!(method = %request.method, request = %request, "fetching url");
        self.queued.push((request, continuation));
    }

    /// Sends every queued request. Returns how many were sent.
    pub fn flush(&mut self) -> usize {
        if self.queued.is_empty() {
            return 0;
        }
        let count = self.queued.len();
        let started = Instant::now();
        for (request, continuation) in self.queued.drain(..) {
            let transport = Arc::clone(&self.transport);
            self.in_flight.push(
                async move {
                    let outcome = transport.execute(&request).await;
                    Completion {
                        request,
                        continuation,
                        outcome,
                        elapsed: started.elapsed(),
                    }
                }
                .boxed(),
            );
        }
        self.sent += count;
        self.flushes += 1;
        debug!(count, in_flight = self.in_flight.len(), "flushed request batch");
        count
    }

    /// Waits for the next request to finish, in completion order.
    ///
    /// If nothing is in flight but requests are still queued, they are flushed
    /// first so no request is stranded. Returns `None` once nothing is queued
    /// or in flight.
    pub async fn next_completion(&mut self) -> Option<Completion<C>> {
        if self.in_flight.is_empty() {
            if self.queued.is_empty() {
                return None;
            }
            debug!(queued = self.queued.len(), "flushing requests left unsent");
            self.flush();
        }
        self.in_flight.next().await
    }

    /// Requests queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    /// Requests queued but not yet flushed.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Requests handed to the transport so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Non-empty flushes performed so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Counts dispatches within one loop and says when to flush.
///
/// Scoped to a single page-processing call; it is never stored between calls.
#[derive(Debug, Clone)]
pub struct BatchCounter {
    every: NonZeroUsize,
    pending: usize,
}

impl BatchCounter {
    /// Flush after every `every` dispatches.
    pub fn new(every: NonZeroUsize) -> Self {
        Self { every, pending: 0 }
    }

    /// Records one dispatch. Returns `true` when the batch is full; the
    /// counter is reset and the caller is expected to flush.
    pub fn record(&mut self) -> bool {
        self.pending += 1;
        if self.pending >= self.every.get() {
            self.pending = 0;
            true
        } else {
            false
        }
    }

    /// Whether dispatches were recorded since the last full batch.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::ports::Service;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            if request.path == "down" {
                return Err(TransportError::Connect {
                    service: request.service,
                    message: "connection refused".into(),
                });
            }
            Ok(HttpResponse::new(200, request.path.clone()))
        }
    }

    fn dispatcher() -> Dispatcher<usize> {
        Dispatcher::new(Arc::new(Echo))
    }

    #[tokio::test]
    async fn nothing_is_sent_before_flush() {
        let mut d = dispatcher();
        d.dispatch(HttpRequest::get(Service::Tracker, "a"), 1);
        d.dispatch(HttpRequest::get(Service::Tracker, "b"), 2);
        assert_eq!((d.queued(), d.outstanding(), d.sent()), (2, 2, 0));

        assert_eq!(d.flush(), 2);
        assert_eq!((d.queued(), d.outstanding(), d.sent()), (0, 2, 2));
        assert_eq!(d.flush(), 0);
        assert_eq!(d.flushes(), 1);
    }

    #[tokio::test]
    async fn completions_carry_their_continuation() {
        let mut d = dispatcher();
        d.dispatch(HttpRequest::get(Service::Tracker, "a"), 1);
        d.dispatch(HttpRequest::get(Service::DocumentStore, "down"), 2);
        d.flush();

        let mut seen = Vec::new();
        while let Some(completion) = d.next_completion().await {
            seen.push((completion.continuation, completion.outcome.is_ok()));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![(1, true), (2, false)]);
        assert_eq!(d.outstanding(), 0);
    }

    #[tokio::test]
    async fn unsent_requests_are_flushed_when_nothing_is_in_flight() {
        let mut d = dispatcher();
        d.dispatch(HttpRequest::get(Service::Tracker, "late"), 7);

        let completion = d.next_completion().await.unwrap();
        assert_eq!(completion.continuation, 7);
        assert_eq!(completion.outcome.unwrap().body, b"late".to_vec());
        assert!(d.next_completion().await.is_none());
        assert_eq!(d.flushes(), 1);
    }

    #[test]
    fn batch_counter_fires_every_nth_dispatch() {
        let mut batch = BatchCounter::new(NonZeroUsize::new(2).unwrap());
        let fired: Vec<bool> = (0..5).map(|_| batch.record()).collect();
        assert_eq!(fired, vec![false, true, false, true, false]);
        assert!(batch.has_pending());
    }
}
