//! Bounded fan-out of one operation over a stream of positions.
//!
//! [`RequestExecutor`] runs the same [`Operation`] against every node an
//! iterator yields, keeping at most `concurrency` requests in flight. The
//! request channel is bounded to the concurrency limit, so the producing
//! iterator is pulled lazily and backpressure reaches all the way back to it.
//! Any service error aborts the remaining workers and fails the run.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::debug;

use crate::api::{CallResult, Operation, PositionService};
use crate::errors::EngineError;
use crate::movegraph::Node;

/// Runs one operation over many positions with a fixed concurrency cap.
pub struct RequestExecutor<S> {
    service: Arc<S>,
    concurrency: usize,
}

impl<S: PositionService> RequestExecutor<S> {
    pub fn new(service: Arc<S>, concurrency: usize) -> Self {
        Self {
            service,
            concurrency: concurrency.max(1),
        }
    }

    /// Run `op` against every node, discarding the individual results.
    /// Returns the number of calls completed.
    pub async fn run<I>(&self, op: Operation, nodes: I) -> Result<u64, EngineError>
    where
        I: IntoIterator<Item = Node>,
    {
        let results = self.drive(op, nodes, false).await?;
        Ok(results.completed)
    }

    /// Run `op` against every node and collect each result, paired with the
    /// node that produced it. Order follows completion, not submission.
    pub async fn run_collect<I>(
        &self,
        op: Operation,
        nodes: I,
    ) -> Result<Vec<(Node, CallResult)>, EngineError>
    where
        I: IntoIterator<Item = Node>,
    {
        let results = self.drive(op, nodes, true).await?;
        Ok(results.collected)
    }

    async fn drive<I>(
        &self,
        op: Operation,
        nodes: I,
        collect: bool,
    ) -> Result<DriveOutcome, EngineError>
    where
        I: IntoIterator<Item = Node>,
    {
        let (req_tx, req_rx) = mpsc::channel::<Node>(self.concurrency);
        let req_rx = Arc::new(Mutex::new(req_rx));
        let (res_tx, mut res_rx) = mpsc::unbounded_channel::<(Node, CallResult)>();

        let mut workers: JoinSet<Result<(), crate::errors::CdbError>> = JoinSet::new();
        for _ in 0..self.concurrency {
            let service = Arc::clone(&self.service);
            let op = op.clone();
            let req_rx = Arc::clone(&req_rx);
            let res_tx = collect.then(|| res_tx.clone());
            workers.spawn(async move {
                loop {
                    // Hold the lock only across the recv so siblings can
                    // take the next node as soon as this one is claimed.
                    let node = { req_rx.lock().await.recv().await };
                    let Some(node) = node else { break };
                    let result = service.call(&op, &node).await?;
                    if let Some(tx) = &res_tx {
                        // Receiver lives until after the join loop below.
                        let _ = tx.send((node, result));
                    }
                }
                Ok(())
            });
        }
        drop(res_tx);

        // Feed on the calling task; a finished worker here can only mean an
        // error (the request channel is still open), so stop feeding early.
        let mut feed_error = None;
        let mut submitted: u64 = 0;
        let mut nodes = nodes.into_iter();
        'feed: for node in nodes.by_ref() {
            tokio::select! {
                sent = req_tx.send(node) => {
                    if sent.is_err() {
                        break 'feed;
                    }
                    submitted += 1;
                }
                joined = workers.join_next() => {
                    feed_error = Some(Self::fail_from_join(joined));
                    break 'feed;
                }
            }
        }
        drop(req_tx);

        // Fail fast: once an error is known, cancel the siblings instead of
        // letting them drain whatever the channel still buffers.
        if feed_error.is_some() {
            workers.abort_all();
        }

        let mut first_error = feed_error;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(service_err)) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::Service(service_err));
                    }
                    workers.abort_all();
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::Worker(join_err));
                    }
                    workers.abort_all();
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut collected = Vec::new();
        while let Ok(pair) = res_rx.try_recv() {
            collected.push(pair);
        }
        debug!(
            submitted,
            collected = collected.len(),
            action = op.action(),
            "request batch complete"
        );
        Ok(DriveOutcome {
            completed: submitted,
            collected,
        })
    }

    /// Turn a premature `join_next` outcome during feeding into the error to
    /// report for the whole run.
    fn fail_from_join(
        joined: Option<Result<Result<(), crate::errors::CdbError>, tokio::task::JoinError>>,
    ) -> EngineError {
        match joined {
            Some(Ok(Err(service_err))) => EngineError::Service(service_err),
            Some(Err(join_err)) => EngineError::Worker(join_err),
            // A worker returning Ok with the channel open, or no workers at
            // all, means the pool is gone out from under the feeder.
            Some(Ok(Ok(()))) | None => EngineError::PoolClosed,
        }
    }
}

struct DriveOutcome {
    completed: u64,
    collected: Vec<(Node, CallResult)>,
}
