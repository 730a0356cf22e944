//! Resumable breadth-first enumeration of the position graph.
//!
//! [`Frontier`] owns the pending queue and the seen-fingerprint set; each call
//! to [`Frontier::iter_resume`] borrows it and yields up to `max_count`
//! further unique positions, stopping early at `max_depth`. Because the state
//! lives in the `Frontier`, successive calls continue exactly where the
//! previous one stopped, and splitting a traversal across calls yields the
//! same sequence as one large call.
//!
//! The root itself is never yielded; enumeration starts from its children.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use crate::errors::PolicyError;
use crate::movegraph::{Fingerprint, Node};

/// Persistent state of a breadth-first traversal.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<Node>,
    seen: HashSet<Fingerprint>,
    yielded: u64,
    duplicates: u64,
    last_depth: u32,
}

impl Frontier {
    /// Start a traversal below `root`. The root's fingerprint is recorded as
    /// seen, so a transposition back to it is counted as a duplicate.
    pub fn new(root: &Node) -> Self {
        let mut seen = HashSet::new();
        seen.insert(root.fingerprint());
        Self {
            queue: root.children().collect(),
            seen,
            yielded: 0,
            duplicates: 0,
            last_depth: 0,
        }
    }

    /// Yield up to `max_count` further unique positions, none deeper than
    /// `max_depth` plies below the root. Both limits must be at least 1.
    pub fn iter_resume(
        &mut self,
        max_depth: u32,
        max_count: u64,
    ) -> Result<FrontierIter<'_>, PolicyError> {
        if max_depth == 0 {
            return Err(PolicyError::InvalidLimit(u64::from(max_depth)));
        }
        if max_count == 0 {
            return Err(PolicyError::InvalidLimit(max_count));
        }
        Ok(FrontierIter {
            frontier: self,
            max_depth,
            remaining: max_count,
        })
    }

    /// Depth of the most recently yielded position, relative to the root.
    pub fn relative_depth(&self) -> u32 {
        self.last_depth
    }

    /// True once the queue has drained: every reachable position within the
    /// depth limits seen so far has been yielded.
    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total unique positions yielded across all resumptions.
    pub fn visited(&self) -> u64 {
        self.yielded
    }

    /// Transpositions skipped across all resumptions.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

/// One resumption of a [`Frontier`] traversal.
pub struct FrontierIter<'a> {
    frontier: &'a mut Frontier,
    max_depth: u32,
    remaining: u64,
}

impl Iterator for FrontierIter<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            let node = self.frontier.queue.pop_front()?;
            if node.depth() > self.max_depth {
                // BFS order means everything behind it is at least as deep;
                // park it for a future resumption with a larger limit.
                self.frontier.queue.push_front(node);
                return None;
            }
            if !self.frontier.seen.insert(node.fingerprint()) {
                self.frontier.duplicates += 1;
                continue;
            }
            for child in node.children() {
                if !self.frontier.seen.contains(&child.fingerprint()) {
                    self.frontier.queue.push_back(child);
                }
            }
            self.frontier.last_depth = node.depth();
            self.frontier.yielded += 1;
            self.remaining -= 1;
            trace!(
                depth = node.depth(),
                visited = self.frontier.yielded,
                "frontier yield"
            );
            return Some(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_of_zero_are_rejected() {
        let mut frontier = Frontier::new(&Node::startpos());
        assert!(matches!(
            frontier.iter_resume(0, 10),
            Err(PolicyError::InvalidLimit(0))
        ));
        assert!(matches!(
            frontier.iter_resume(10, 0),
            Err(PolicyError::InvalidLimit(0))
        ));
    }

    #[test]
    fn first_ply_yields_the_twenty_opening_moves() {
        let mut frontier = Frontier::new(&Node::startpos());
        let nodes: Vec<Node> = frontier.iter_resume(1, 100).unwrap().collect();
        assert_eq!(nodes.len(), 20);
        assert!(nodes.iter().all(|n| n.depth() == 1));
        assert_eq!(frontier.relative_depth(), 1);
        // Depth 1 is fully enumerated but depth 2 children are parked.
        assert!(!frontier.is_exhausted());
    }

    #[test]
    fn yielded_positions_are_unique_and_transpositions_are_counted() {
        let mut frontier = Frontier::new(&Node::startpos());
        let nodes: Vec<Node> = frontier.iter_resume(3, 5000).unwrap().collect();
        let unique: HashSet<Fingerprint> = nodes.iter().map(Node::fingerprint).collect();
        assert_eq!(unique.len(), nodes.len());
        // At three plies from the startpos, move-order transpositions exist
        // (1. e3 e6 2. e4 and 1. e4 e6 2. e3 reach the same position).
        assert!(frontier.duplicates() > 0);
        assert_eq!(frontier.visited(), nodes.len() as u64);
    }

    #[test]
    fn split_traversal_matches_a_single_larger_call() {
        let mut whole = Frontier::new(&Node::startpos());
        let reference: Vec<Fingerprint> = whole
            .iter_resume(2, 60)
            .unwrap()
            .map(|n| n.fingerprint())
            .collect();

        let mut split = Frontier::new(&Node::startpos());
        let mut resumed: Vec<Fingerprint> = split
            .iter_resume(2, 25)
            .unwrap()
            .map(|n| n.fingerprint())
            .collect();
        resumed.extend(split.iter_resume(2, 35).unwrap().map(|n| n.fingerprint()));
        assert_eq!(resumed, reference);
    }

    #[test]
    fn depth_limit_parks_deeper_nodes_for_later_resumption() {
        let mut frontier = Frontier::new(&Node::startpos());
        let shallow: Vec<Node> = frontier.iter_resume(1, 1000).unwrap().collect();
        assert_eq!(shallow.len(), 20);

        // Resuming with a deeper limit picks up the parked second ply.
        let deeper: Vec<Node> = frontier.iter_resume(2, 1000).unwrap().collect();
        assert!(!deeper.is_empty());
        assert!(deeper.iter().all(|n| n.depth() == 2));
    }

    #[test]
    fn exhaustion_is_reached_on_a_tiny_graph() {
        // Lone kings: a sparse graph the iterator can fully drain.
        let root = Node::from_fen("8/8/8/4k3/8/8/8/4K3 w - -").unwrap();
        let mut frontier = Frontier::new(&root);
        let mut total = 0u64;
        while !frontier.is_exhausted() {
            total += frontier.iter_resume(3, 100).unwrap().count() as u64;
            if frontier.relative_depth() >= 3 && frontier.queue.iter().all(|n| n.depth() > 3) {
                break;
            }
        }
        assert!(total > 0);
        assert_eq!(frontier.visited(), total);
    }
}
