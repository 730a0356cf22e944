//! Margin-bounded traversal of the neighborhood of the principal variation.
//!
//! Starting from a root position, [`NearPvExplorer`] queries the backend's
//! ranked move list and recursively follows every move scoring within a
//! centipawn margin of the best move. The margin can decay per ply, so the
//! search cone narrows with depth; with a margin of zero it degenerates to
//! walking the PV itself. The explorer drives a [`FeedbackOrchestrator`] and
//! terminates when the pool goes quiescent.
//!
//! A [`NearPvVisitor`] observes every completed response and may submit extra
//! requests (typically queueing positions for deep analysis) or produce an
//! output value per position, collected into the final [`NearPvReport`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::{Analysis, CallResult, CdbStatus, Operation, PositionService};
use crate::errors::{EngineError, PolicyError};
use crate::movegraph::{Fingerprint, Node};
use crate::orchestrator::{FeedbackOrchestrator, Response};

/// Widest accepted margin, in centipawns. Anything wider explores far too
/// much of the graph to be useful.
pub const MARGIN_CEILING: u32 = 200;

/// Scores beyond this magnitude denote a proven decisive line. Such nodes
/// are not expanded further.
pub const DECISIVE_SCORE: i32 = 19000;

/// Tuning knobs for a near-PV traversal.
#[derive(Debug, Clone)]
pub struct NearPvParams {
    /// Centipawn window below the best move within which alternatives are
    /// followed.
    pub margin: u32,
    /// Margin shrinkage per ply of depth.
    pub margin_decay: f64,
    /// Hard cap on followed moves per position.
    pub max_branch: usize,
    /// Hard cap on depth below the root.
    pub max_depth: u32,
    /// Worker pool size.
    pub concurrency: usize,
}

impl NearPvParams {
    pub fn new(margin: u32) -> Self {
        Self {
            margin,
            margin_decay: 1.0,
            max_branch: usize::MAX,
            max_depth: u32::MAX,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_margin_decay(mut self, margin_decay: f64) -> Self {
        self.margin_decay = margin_decay;
        self
    }

    pub fn with_max_branch(mut self, max_branch: usize) -> Self {
        self.max_branch = max_branch;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// The margin in force at `relative_depth` plies below the root, after
    /// decay, clamped at zero.
    pub fn margin_at(&self, relative_depth: u32) -> u32 {
        let decayed = f64::from(self.margin) - self.margin_decay * f64::from(relative_depth);
        if decayed <= 0.0 { 0 } else { decayed.round() as u32 }
    }
}

/// Counters describing one finished traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearPvStats {
    /// Query results processed.
    pub nodes: u64,
    /// Positions that contributed at least one new child.
    pub stems: u64,
    /// Submissions skipped because the position was already in flight.
    pub duplicates: u64,
    /// Submissions left unanswered when the traversal stopped. Zero unless
    /// the traversal ended on an error.
    pub outstanding: u64,
    /// Deepest relative depth reached.
    pub seldepth: u32,
}

impl NearPvStats {
    /// Mean count of new children per expanding position.
    pub fn branching_factor(&self) -> f64 {
        let expanded = self.nodes.saturating_sub(1) + self.outstanding;
        let stems = if self.nodes <= 1 {
            self.stems + 1
        } else {
            self.stems
        };
        expanded as f64 / stems.max(1) as f64
    }
}

/// Outcome of [`NearPvExplorer::explore`]. Partial results survive an error:
/// `error` is set and `results`/`stats` cover everything processed before it.
#[derive(Debug)]
pub struct NearPvReport<T> {
    pub results: HashMap<Fingerprint, T>,
    pub stats: NearPvStats,
    pub error: Option<EngineError>,
}

impl<T> NearPvReport<T> {
    /// Promote a partial report into a hard failure.
    pub fn into_result(self) -> Result<(HashMap<Fingerprint, T>, NearPvStats), EngineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.results, self.stats)),
        }
    }
}

/// Observes every completed response during a near-PV traversal.
///
/// The visitor runs on the drive loop, one response at a time, and may submit
/// additional requests through the pool. Returning `Some(value)` records the
/// value against the position's fingerprint in the report.
#[async_trait]
pub trait NearPvVisitor<S: PositionService>: Send {
    type Output: Send;

    async fn visit(
        &mut self,
        pool: &mut FeedbackOrchestrator<S>,
        node: &Node,
        result: &CallResult,
        margin: u32,
        relative_depth: u32,
    ) -> Result<Option<Self::Output>, EngineError>;
}

/// Walks the near-PV neighborhood of a root position.
pub struct NearPvExplorer<S> {
    service: Arc<S>,
    params: NearPvParams,
}

impl<S: PositionService> NearPvExplorer<S> {
    /// Validate the parameters up front; no request is made on failure.
    pub fn new(service: Arc<S>, params: NearPvParams) -> Result<Self, PolicyError> {
        if params.margin > MARGIN_CEILING {
            return Err(PolicyError::MarginTooWide {
                margin: params.margin,
                ceiling: MARGIN_CEILING,
            });
        }
        if !params.margin_decay.is_finite() || params.margin_decay < 0.0 {
            return Err(PolicyError::NegativeDecay(params.margin_decay));
        }
        if params.max_branch == 0 {
            return Err(PolicyError::InvalidLimit(0));
        }
        Ok(Self { service, params })
    }

    /// Explore below `root` until the request pool goes quiescent, handing
    /// every response to `visitor`. Always returns a report; an error stops
    /// the traversal but keeps what was gathered.
    pub async fn explore<V>(&self, root: Node, visitor: &mut V) -> NearPvReport<V::Output>
    where
        V: NearPvVisitor<S>,
    {
        let mut pool = FeedbackOrchestrator::new(Arc::clone(&self.service), self.params.concurrency);
        let mut results = HashMap::new();
        let mut stats = NearPvStats::default();
        let base_depth = root.depth();

        let error = self
            .drive(root, base_depth, &mut pool, visitor, &mut results, &mut stats)
            .await
            .err();

        let (sent, read) = pool.stats();
        stats.outstanding = sent - read;
        info!(
            nodes = stats.nodes,
            stems = stats.stems,
            duplicates = stats.duplicates,
            outstanding = stats.outstanding,
            seldepth = stats.seldepth,
            branching = stats.branching_factor(),
            aborted = error.is_some(),
            "near-pv traversal finished"
        );
        NearPvReport {
            results,
            stats,
            error,
        }
    }

    async fn drive<V>(
        &self,
        root: Node,
        base_depth: u32,
        pool: &mut FeedbackOrchestrator<S>,
        visitor: &mut V,
        results: &mut HashMap<Fingerprint, V::Output>,
        stats: &mut NearPvStats,
    ) -> Result<(), EngineError>
    where
        V: NearPvVisitor<S>,
    {
        pool.submit(Operation::QueryAll, root).await?;

        while !pool.is_quiescent() {
            let Response { op, node, result } = pool.receive().await?;
            let result = result?;
            if op != Operation::QueryAll {
                // Side submissions from the visitor only need their
                // acknowledgement consumed.
                continue;
            }

            stats.nodes += 1;
            let relative_depth = node.depth() - base_depth;
            stats.seldepth = stats.seldepth.max(relative_depth);
            let margin = self.params.margin_at(relative_depth);

            if let Some(value) = visitor
                .visit(pool, &node, &result, margin, relative_depth)
                .await?
            {
                results.insert(node.fingerprint(), value);
            }

            let Some(analysis) = result.analysis() else {
                continue;
            };
            let Some(best) = analysis.best_score() else {
                continue;
            };
            if best.abs() > DECISIVE_SCORE {
                // A proven line; its continuations are settled already.
                continue;
            }
            if relative_depth >= self.params.max_depth {
                continue;
            }

            let mut new_children = 0u64;
            for (index, entry) in analysis.moves.iter().enumerate() {
                if index >= self.params.max_branch {
                    break;
                }
                if entry.score < best.saturating_sub(margin as i32) {
                    break;
                }
                let child = node.play_uci(&entry.uci)?;
                if pool.submit(Operation::QueryAll, child).await? {
                    new_children += 1;
                } else {
                    stats.duplicates += 1;
                }
            }
            if new_children > 0 {
                stats.stems += 1;
                debug!(
                    depth = relative_depth,
                    margin,
                    children = new_children,
                    "expanded near-pv node"
                );
            }
        }
        Ok(())
    }
}

/// The workhorse visitor: queue everything interesting for deep analysis and
/// report known analyses back to the caller.
///
/// Unknown and unreachable positions are queued; trivial and game-over ones
/// are not. Known positions with a decisive score produce no output.
#[derive(Debug, Default)]
pub struct QueueAnyVisitor;

#[async_trait]
impl<S: PositionService> NearPvVisitor<S> for QueueAnyVisitor {
    type Output = Analysis;

    async fn visit(
        &mut self,
        pool: &mut FeedbackOrchestrator<S>,
        node: &Node,
        result: &CallResult,
        _margin: u32,
        _relative_depth: u32,
    ) -> Result<Option<Analysis>, EngineError> {
        match result {
            CallResult::Status(CdbStatus::TrivialBoard | CdbStatus::GameOver) => Ok(None),
            CallResult::Status(_) => {
                pool.submit(Operation::Queue, node.clone()).await?;
                Ok(None)
            }
            CallResult::Analysis(analysis) => {
                if analysis.best_score().is_some_and(|s| s.abs() > DECISIVE_SCORE) {
                    return Ok(None);
                }
                pool.submit(Operation::Queue, node.clone()).await?;
                Ok(Some(analysis.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_beyond_the_ceiling_are_rejected() {
        let err = NearPvExplorer::new(
            Arc::new(crate::api::StaticService::new()),
            NearPvParams::new(MARGIN_CEILING + 1),
        )
        .err();
        assert!(matches!(
            err,
            Some(PolicyError::MarginTooWide {
                margin: 201,
                ceiling: MARGIN_CEILING,
            })
        ));
    }

    #[test]
    fn negative_or_non_finite_decay_is_rejected() {
        let service = Arc::new(crate::api::StaticService::new());
        assert!(matches!(
            NearPvExplorer::new(
                Arc::clone(&service),
                NearPvParams::new(50).with_margin_decay(-0.5)
            )
            .err(),
            Some(PolicyError::NegativeDecay(_))
        ));
        assert!(matches!(
            NearPvExplorer::new(service, NearPvParams::new(50).with_margin_decay(f64::NAN)).err(),
            Some(PolicyError::NegativeDecay(_))
        ));
    }

    #[test]
    fn margin_decays_per_ply_and_clamps_at_zero() {
        let params = NearPvParams::new(10).with_margin_decay(3.0);
        assert_eq!(params.margin_at(0), 10);
        assert_eq!(params.margin_at(1), 7);
        assert_eq!(params.margin_at(3), 1);
        assert_eq!(params.margin_at(4), 0);
        assert_eq!(params.margin_at(100), 0);
    }

    #[test]
    fn fractional_decay_rounds_to_the_nearest_centipawn() {
        let params = NearPvParams::new(10).with_margin_decay(0.4);
        assert_eq!(params.margin_at(1), 10);
        assert_eq!(params.margin_at(2), 9);
    }

    #[test]
    fn branching_factor_handles_the_degenerate_single_node_case() {
        let stats = NearPvStats {
            nodes: 1,
            ..NearPvStats::default()
        };
        assert_eq!(stats.branching_factor(), 0.0);

        let stats = NearPvStats {
            nodes: 7,
            stems: 3,
            ..NearPvStats::default()
        };
        assert_eq!(stats.branching_factor(), 2.0);
    }
}
