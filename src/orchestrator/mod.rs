//! The feedback worker pool: submit requests, receive results, submit more.
//!
//! [`FeedbackOrchestrator`] is built for traversals whose future requests
//! depend on earlier results. The caller submits a [`Request`] per position,
//! workers execute them against the shared service, and completed
//! [`Response`]s come back over an unbounded channel so workers never stall
//! on the caller. Deduplication happens at submission: a position already
//! submitted under the same dedup class is silently skipped.
//!
//! Quiescence is a pure counter check. The pool is quiescent when every
//! submission has been read back and nothing further is buffered; since only
//! received results can trigger new submissions, a quiescent pool stays
//! quiescent and the drive loop can stop.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::trace;

use crate::api::{CallResult, DedupClass, Operation, PositionService};
use crate::errors::{CdbError, EngineError};
use crate::movegraph::{Fingerprint, Node};

/// One submitted unit of work.
#[derive(Debug)]
pub struct Request {
    pub op: Operation,
    pub node: Node,
}

/// One completed unit of work, carrying the request it answers.
#[derive(Debug)]
pub struct Response {
    pub op: Operation,
    pub node: Node,
    pub result: Result<CallResult, CdbError>,
}

/// A pool of workers executing requests with feedback-driven submission.
pub struct FeedbackOrchestrator<S> {
    service: Arc<S>,
    request_tx: mpsc::Sender<Request>,
    results_rx: mpsc::UnboundedReceiver<Response>,
    workers: JoinSet<()>,
    queried: HashSet<Fingerprint>,
    queued: HashSet<Fingerprint>,
    sent: u64,
    read: u64,
}

impl<S: PositionService> FeedbackOrchestrator<S> {
    /// Spawn `concurrency` workers against the shared service.
    pub fn new(service: Arc<S>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (request_tx, request_rx) = mpsc::channel::<Request>(concurrency);
        let request_rx = Arc::new(Mutex::new(request_rx));
        let (results_tx, results_rx) = mpsc::unbounded_channel::<Response>();

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let service = Arc::clone(&service);
            let request_rx = Arc::clone(&request_rx);
            let results_tx = results_tx.clone();
            workers.spawn(async move {
                loop {
                    let request = { request_rx.lock().await.recv().await };
                    let Some(Request { op, node }) = request else {
                        break;
                    };
                    let result = service.call(&op, &node).await;
                    if results_tx.send(Response { op, node, result }).is_err() {
                        break;
                    }
                }
            });
        }
        // Workers hold the only result senders; if they all die, receive()
        // sees a closed channel instead of hanging.
        drop(results_tx);

        Self {
            service,
            request_tx,
            results_rx,
            workers,
            queried: HashSet::new(),
            queued: HashSet::new(),
            sent: 0,
            read: 0,
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Submit one request. Returns `Ok(false)` when the position was already
    /// submitted under the operation's dedup class; otherwise waits for
    /// channel capacity (backpressure) and returns `Ok(true)`.
    pub async fn submit(&mut self, op: Operation, node: Node) -> Result<bool, EngineError> {
        match op.dedup_class() {
            Some(DedupClass::Query) => {
                if !self.queried.insert(node.fingerprint()) {
                    return Ok(false);
                }
            }
            Some(DedupClass::Queue) => {
                if !self.queued.insert(node.fingerprint()) {
                    return Ok(false);
                }
            }
            None => {}
        }
        self.request_tx
            .send(Request { op, node })
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        self.sent += 1;
        trace!(sent = self.sent, read = self.read, "request submitted");
        Ok(true)
    }

    /// Receive the next completed response. Errs with `PoolClosed` if every
    /// worker has exited while submissions are still unanswered.
    pub async fn receive(&mut self) -> Result<Response, EngineError> {
        let response = self
            .results_rx
            .recv()
            .await
            .ok_or(EngineError::PoolClosed)?;
        self.read += 1;
        Ok(response)
    }

    /// True when every submission has been read back and no result is
    /// buffered. Only received results can trigger new submissions, so a
    /// quiescent pool cannot wake up again.
    pub fn is_quiescent(&self) -> bool {
        self.sent == self.read && self.results_rx.is_empty()
    }

    /// `(submitted, read)` counters for reporting.
    pub fn stats(&self) -> (u64, u64) {
        (self.sent, self.read)
    }

    /// Unique positions submitted under the query dedup class.
    pub fn queried_count(&self) -> u64 {
        self.queried.len() as u64
    }

    /// Unique positions submitted under the queue dedup class.
    pub fn queued_count(&self) -> u64 {
        self.queued.len() as u64
    }
}

impl<S> Drop for FeedbackOrchestrator<S> {
    fn drop(&mut self) {
        // Idle workers exit once the request sender drops; abort covers any
        // still mid-call so no task outlives the pool.
        self.workers.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use crate::api::{Analysis, CdbStatus};

    #[derive(Default)]
    struct EchoService {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl PositionService for EchoService {
        async fn call(&self, op: &Operation, node: &Node) -> Result<CallResult, CdbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CdbError::BadFen(node.fen()));
            }
            Ok(match op {
                Operation::QueryAll => CallResult::Analysis(Analysis::default()),
                _ => CallResult::Status(CdbStatus::Success),
            })
        }
    }

    #[tokio::test]
    async fn duplicate_submissions_are_skipped_per_dedup_class() {
        let service = Arc::new(EchoService::default());
        let mut pool = FeedbackOrchestrator::new(Arc::clone(&service), 2);
        let node = Node::startpos();

        assert!(pool.submit(Operation::QueryAll, node.clone()).await.unwrap());
        assert!(!pool.submit(Operation::QueryAll, node.clone()).await.unwrap());
        // The queue class has its own set, so the same position goes through.
        assert!(pool.submit(Operation::Queue, node.clone()).await.unwrap());
        assert!(!pool.submit(Operation::Queue, node.clone()).await.unwrap());
        // Non-dedup operations always go through.
        assert!(pool.submit(Operation::QueryBest, node.clone()).await.unwrap());
        assert!(pool.submit(Operation::QueryBest, node).await.unwrap());

        let (sent, _) = pool.stats();
        assert_eq!(sent, 4);
        assert_eq!(pool.queried_count(), 1);
        assert_eq!(pool.queued_count(), 1);
    }

    #[tokio::test]
    async fn quiescence_requires_all_results_read() {
        let service = Arc::new(EchoService::default());
        let mut pool = FeedbackOrchestrator::new(service, 2);
        assert!(pool.is_quiescent());

        pool.submit(Operation::QueryAll, Node::startpos())
            .await
            .unwrap();
        assert!(!pool.is_quiescent());

        let response = pool.receive().await.unwrap();
        assert!(response.result.is_ok());
        assert!(pool.is_quiescent());
        assert_eq!(pool.stats(), (1, 1));
    }

    #[tokio::test]
    async fn every_submission_produces_exactly_one_response() {
        let service = Arc::new(EchoService::default());
        let mut pool = FeedbackOrchestrator::new(Arc::clone(&service), 4);
        let children: Vec<Node> = Node::startpos().children().collect();
        let mut submitted = 0u64;
        for node in children {
            if pool.submit(Operation::QueryAll, node).await.unwrap() {
                submitted += 1;
            }
        }
        assert_eq!(submitted, 20);

        while !pool.is_quiescent() {
            pool.receive().await.unwrap();
        }
        assert_eq!(pool.stats(), (20, 20));
        assert_eq!(service.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn service_errors_arrive_as_responses_not_pool_failures() {
        let service = Arc::new(EchoService {
            fail: true,
            ..EchoService::default()
        });
        let mut pool = FeedbackOrchestrator::new(service, 2);
        pool.submit(Operation::QueryAll, Node::startpos())
            .await
            .unwrap();
        let response = pool.receive().await.unwrap();
        assert!(matches!(response.result, Err(CdbError::BadFen(_))));
        assert!(pool.is_quiescent());
    }
}
