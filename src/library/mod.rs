//! High-level conveniences combining the engines into one-call workflows.

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{Analysis, CallResult, Operation, PositionService};
use crate::errors::EngineError;
use crate::executor::RequestExecutor;
use crate::frontier::Frontier;
use crate::movegraph::Node;

/// Ready-made workflows over a shared service.
pub struct CdbLibrary<S> {
    service: Arc<S>,
    concurrency: usize,
}

impl<S: PositionService> CdbLibrary<S> {
    pub fn new(service: Arc<S>, concurrency: usize) -> Self {
        Self {
            service,
            concurrency: concurrency.max(1),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Query all moves for a batch of FENs, concurrently. Results pair each
    /// position with its response, in completion order.
    pub async fn query_fens<I, T>(&self, fens: I) -> Result<Vec<(Node, CallResult)>, EngineError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut nodes = Vec::new();
        for fen in fens {
            nodes.push(Node::from_fen(fen.as_ref()).map_err(EngineError::Service)?);
        }
        let executor = RequestExecutor::new(Arc::clone(&self.service), self.concurrency);
        executor.run_collect(Operation::QueryAll, nodes).await
    }

    /// Queue every given position for deep analysis. Returns the number of
    /// requests completed.
    pub async fn mass_queue<I>(&self, nodes: I) -> Result<u64, EngineError>
    where
        I: IntoIterator<Item = Node>,
    {
        let executor = RequestExecutor::new(Arc::clone(&self.service), self.concurrency);
        executor.run(Operation::Queue, nodes).await
    }

    /// Query the next slice of a breadth-first traversal: up to `max_count`
    /// unique positions no deeper than `max_depth`, pulled from `frontier`
    /// and queried concurrently. The frontier keeps its place, so repeated
    /// calls walk further into the graph.
    pub async fn query_breadth_first(
        &self,
        frontier: &mut Frontier,
        max_depth: u32,
        max_count: u64,
    ) -> Result<Vec<(Node, CallResult)>, EngineError> {
        let iter = frontier.iter_resume(max_depth, max_count)?;
        let executor = RequestExecutor::new(Arc::clone(&self.service), self.concurrency);
        let results = executor.run_collect(Operation::QueryAll, iter).await?;
        debug!(
            batch = results.len(),
            depth = frontier.relative_depth(),
            visited = frontier.visited(),
            "breadth-first batch queried"
        );
        Ok(results)
    }

    /// Walk the graph breadth-first below `root`, keeping positions whose
    /// analysis satisfies `predicate`, until `filter_count` positions are
    /// found or one of the traversal limits is hit.
    ///
    /// Positions are queried in batches (`batch_size`, default sixteen times
    /// the concurrency) so the predicate sees results early instead of after
    /// the whole traversal.
    pub async fn query_bfs_filter<F>(
        &self,
        root: &Node,
        predicate: F,
        filter_count: usize,
        max_depth: u32,
        max_count: u64,
        batch_size: Option<u64>,
    ) -> Result<Vec<(Node, Analysis)>, EngineError>
    where
        F: Fn(&Node, &Analysis) -> bool,
    {
        let batch_size = batch_size.unwrap_or((self.concurrency as u64) * 16).max(1);
        let mut frontier = Frontier::new(root);
        let mut found = Vec::new();

        while found.len() < filter_count
            && frontier.visited() < max_count
            && !frontier.is_exhausted()
        {
            let budget = batch_size.min(max_count - frontier.visited());
            let batch = self
                .query_breadth_first(&mut frontier, max_depth, budget)
                .await?;
            if batch.is_empty() {
                // Everything left in the frontier is beyond the depth limit.
                break;
            }
            for (node, result) in batch {
                if let CallResult::Analysis(analysis) = result {
                    if predicate(&node, &analysis) {
                        found.push((node, analysis));
                        if found.len() >= filter_count {
                            break;
                        }
                    }
                }
            }
        }
        info!(
            found = found.len(),
            visited = frontier.visited(),
            duplicates = frontier.duplicates(),
            depth = frontier.relative_depth(),
            "breadth-first filter finished"
        );
        Ok(found)
    }
}
