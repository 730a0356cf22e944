//! The move-graph collaborator: positions, identity, and expansion.
//!
//! The engines treat positions as opaque [`Node`]s that can report their
//! depth, say whether they are terminal, and expand into child nodes. Identity
//! for deduplication is a [`Fingerprint`]: the FEN stripped of the halfmove
//! clock and fullmove number, which the backend ignores — two nodes with equal
//! fingerprints are transpositions of one another.

use std::fmt;
use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece};
use serde::{Deserialize, Serialize};

use crate::errors::CdbError;

/// Canonical identity of a position: the first four FEN fields (piece
/// placement, side to move, castling rights, en passant square).
///
/// The backend ignores the history counters, and stripping them lets
/// transpositions that differ only in move counters share one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a FEN down to the four fields the backend cares about.
pub fn strip_fen(fen: &str) -> String {
    fen.split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A position in the explored state graph, tagged with its depth relative to
/// the traversal root (the root itself is depth 0).
///
/// Depth is tracked explicitly rather than derived from FEN move counters:
/// every consumer in this crate compares depths relative to its own root, and
/// the counters are stripped from the node's identity anyway.
#[derive(Debug, Clone)]
pub struct Node {
    board: Board,
    depth: u32,
}

impl Node {
    /// Wrap a board as a depth-0 root.
    pub fn root(board: Board) -> Self {
        Self { board, depth: 0 }
    }

    /// The standard chess starting position, as a root.
    pub fn startpos() -> Self {
        Self::root(Board::default())
    }

    /// Parse a FEN into a depth-0 root. The halfmove clock and fullmove
    /// number are ignored if present; at least the four identity fields are
    /// required.
    pub fn from_fen(fen: &str) -> Result<Self, CdbError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(CdbError::BadFen(fen.to_string()));
        }
        let normalized = format!(
            "{} {} {} {} 0 1",
            fields[0], fields[1], fields[2], fields[3]
        );
        let board = Board::from_str(&normalized)
            .map_err(|e| CdbError::BadFen(format!("{fen}: {e}")))?;
        Ok(Self::root(board))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Depth relative to the root this node descends from.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The full FEN of this position (with placeholder move counters).
    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    /// Canonical identity for deduplication.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(strip_fen(&self.board.to_string()))
    }

    /// True when the position has no legal continuation (checkmate or
    /// stalemate).
    pub fn is_terminal(&self) -> bool {
        self.board.status() != BoardStatus::Ongoing
    }

    /// Expand into one child node per legal move, each one ply deeper.
    /// Order is whatever the move generator produces, but it is stable for a
    /// given position.
    pub fn children(&self) -> impl Iterator<Item = Node> + '_ {
        MoveGen::new_legal(&self.board).map(|mv| Node {
            board: self.board.make_move_new(mv),
            depth: self.depth + 1,
        })
    }

    /// Play a move given in UCI notation, producing the child node.
    pub fn play_uci(&self, uci: &str) -> Result<Node, CdbError> {
        MoveGen::new_legal(&self.board)
            .find(|mv| move_uci(*mv) == uci)
            .map(|mv| Node {
                board: self.board.make_move_new(mv),
                depth: self.depth + 1,
            })
            .ok_or_else(|| CdbError::BadMove {
                uci: uci.to_string(),
                fen: self.fen(),
            })
    }
}

/// Render a move in UCI notation (`e2e4`, `e7e8q`).
pub fn move_uci(mv: ChessMove) -> String {
    let promotion = match mv.get_promotion() {
        Some(Piece::Queen) => "q",
        Some(Piece::Rook) => "r",
        Some(Piece::Bishop) => "b",
        Some(Piece::Knight) => "n",
        _ => "",
    };
    format!("{}{}{}", mv.get_source(), mv.get_dest(), promotion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_strips_move_counters() {
        let a = Node::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let b =
            Node::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 42 99").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().split_whitespace().count(), 4);
    }

    #[test]
    fn strip_fen_keeps_first_four_fields() {
        let stripped = strip_fen("8/8/8/8/8/8/8/K6k w - - 13 37");
        assert_eq!(stripped, "8/8/8/8/8/8/8/K6k w - -");
    }

    #[test]
    fn startpos_expands_into_twenty_children_one_ply_deeper() {
        let root = Node::startpos();
        let children: Vec<Node> = root.children().collect();
        assert_eq!(children.len(), 20);
        assert!(children.iter().all(|c| c.depth() == 1));
        let unique: std::collections::HashSet<Fingerprint> =
            children.iter().map(Node::fingerprint).collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn play_uci_accepts_legal_and_rejects_illegal_moves() {
        let root = Node::startpos();
        let child = root.play_uci("e2e4").unwrap();
        assert_eq!(child.depth(), 1);
        assert!(child.fingerprint().as_str().contains("b KQkq"));

        let err = root.play_uci("e2e5").unwrap_err();
        assert!(matches!(err, CdbError::BadMove { .. }));
    }

    #[test]
    fn from_fen_rejects_garbage_and_truncated_input() {
        assert!(matches!(
            Node::from_fen("not a fen at all"),
            Err(CdbError::BadFen(_))
        ));
        assert!(matches!(
            Node::from_fen("8/8/8/8"),
            Err(CdbError::BadFen(_))
        ));
    }

    #[test]
    fn terminal_positions_have_no_children() {
        // A textbook queen stalemate: black to move, no legal moves, no check.
        let node = Node::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - -").unwrap();
        assert!(node.is_terminal());
        assert_eq!(node.children().count(), 0);
    }
}
