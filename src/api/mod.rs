//! The remote position-database client and its service types.
//!
//! ## Components
//!
//! - [`CdbStatus`]: status vocabulary of a single backend response
//! - [`Operation`]: the request kinds the engines can submit
//! - [`Analysis`] / [`CallResult`]: structured response payloads
//! - [`PositionService`]: the async seam the engines drive; implemented by
//!   [`CdbClient`] for the real backend and by mocks in tests
//! - [`CdbClient`]: the HTTP client — GET requests, bounded retries with a
//!   fixed delay, status mapping, and the configurable raise-on set
//!
//! Query-family calls return [`CallResult::Analysis`] on success and
//! [`CallResult::Status`] for every other status; queue-family calls always
//! return a bare status. A position with no legal moves short-circuits to
//! `GameOver` locally, without touching the network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ClientConfig;
use crate::errors::CdbError;
use crate::movegraph::Node;

/// Status of a single backend response.
///
/// `GameOver` is produced locally for checkmate/stalemate positions; the
/// request is never sent over the wire. `UnknownBoard` means the position is
/// not in the database (but may now be added as a result of the query).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CdbStatus {
    Success,
    GameOver,
    InvalidBoard,
    UnknownBoard,
    NoBestMove,
    TrivialBoard,
    LimitExceeded,
    LimitCleared,
}

impl CdbStatus {
    /// Map the wire status text to a status value. An absent status means the
    /// backend ignored the request as trivial. Unrecognized text is a
    /// protocol error, reported with the offending string.
    pub fn from_wire(text: Option<&str>) -> Result<Self, String> {
        match text {
            Some("ok") => Ok(CdbStatus::Success),
            Some("invalid board") => Ok(CdbStatus::InvalidBoard),
            Some("unknown") => Ok(CdbStatus::UnknownBoard),
            Some("nobestmove") => Ok(CdbStatus::NoBestMove),
            Some("rate limit exceeded") => Ok(CdbStatus::LimitExceeded),
            Some("rate limit cleared") => Ok(CdbStatus::LimitCleared),
            None => Ok(CdbStatus::TrivialBoard),
            Some(other) => Err(other.to_string()),
        }
    }
}

/// A request kind submitted to the service.
///
/// `QueryAll` and `Queue` participate in engine-level deduplication; the
/// narrower variants and `Store` bypass it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// All known moves for a position, ranked by score.
    QueryAll,
    /// One best-ranked move.
    QueryBest,
    /// Just the score of the best move.
    QueryScore,
    /// The backend's current principal variation.
    QueryPv,
    /// Request deep analysis of a position.
    Queue,
    /// Report a score for one specific move of a position.
    Store { uci: String },
}

/// Which deduplication set an operation belongs to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupClass {
    Query,
    Queue,
}

impl Operation {
    /// The backend action name for this operation.
    pub fn action(&self) -> &'static str {
        match self {
            Operation::QueryAll => "queryall",
            Operation::QueryBest => "querybest",
            Operation::QueryScore => "queryscore",
            Operation::QueryPv => "querypv",
            Operation::Queue => "queue",
            Operation::Store { .. } => "store",
        }
    }

    /// The deduplication set this operation participates in, if any.
    pub fn dedup_class(&self) -> Option<DedupClass> {
        match self {
            Operation::QueryAll => Some(DedupClass::Query),
            Operation::Queue => Some(DedupClass::Queue),
            _ => None,
        }
    }

    /// True for the query family (read operations with a structured payload).
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Operation::QueryAll
                | Operation::QueryBest
                | Operation::QueryScore
                | Operation::QueryPv
        )
    }
}

/// One ranked move from a `queryall` response.
///
/// `score` is in centipawns from the side-to-move perspective. `rank` mirrors
/// the web interface notation: 2 = best, 1 = good, 0 = worse (a bad position
/// may show 0 for every move). The backend pre-sorts moves by descending
/// score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEntry {
    pub uci: String,
    pub san: String,
    pub score: i32,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub winrate: Option<String>,
}

/// Structured payload of a successful query-family response. Which optional
/// fields are present depends on the action that produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    /// Ranked move list (`queryall`), descending by score.
    #[serde(default)]
    pub moves: Vec<MoveEntry>,
    /// Shortest known path length from this position to the startpos.
    pub ply: Option<i32>,
    /// Move answer of `querybest`.
    pub best_move: Option<String>,
    /// Score answer of `queryscore`.
    pub eval: Option<i32>,
    /// Score reported by `querypv`.
    pub score: Option<i32>,
    /// Depth reported by `querypv`.
    pub depth: Option<i32>,
    /// Principal variation reported by `querypv`, as UCI moves.
    #[serde(default)]
    pub pv: Vec<String>,
}

impl Analysis {
    /// Score of the best move, when a move list is present.
    pub fn best_score(&self) -> Option<i32> {
        self.moves.first().map(|m| m.score)
    }
}

/// Outcome of one service call.
#[derive(Debug, Clone)]
pub enum CallResult {
    /// Successful query-family response.
    Analysis(Analysis),
    /// Terminal status: queue-family acknowledgement, or any non-success
    /// query status. No further expansion is possible from this value.
    Status(CdbStatus),
}

impl CallResult {
    pub fn status(&self) -> CdbStatus {
        match self {
            CallResult::Analysis(_) => CdbStatus::Success,
            CallResult::Status(status) => *status,
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            CallResult::Analysis(analysis) => Some(analysis),
            CallResult::Status(_) => None,
        }
    }
}

/// The async seam between the engines and the backend.
///
/// The engines invoke this concurrently from every worker; implementations
/// must be internally shareable. [`CdbClient`] is the production
/// implementation; tests substitute deterministic mocks.
#[async_trait]
pub trait PositionService: Send + Sync + 'static {
    async fn call(&self, op: &Operation, node: &Node) -> Result<CallResult, CdbError>;
}

#[async_trait]
impl<S: PositionService> PositionService for Arc<S> {
    async fn call(&self, op: &Operation, node: &Node) -> Result<CallResult, CdbError> {
        (**self).call(op, node).await
    }
}

/// Raw shape of a backend JSON response. Every field is optional; which ones
/// arrive depends on the action and the status.
#[derive(Debug, Default, Deserialize)]
struct WireResponse {
    status: Option<String>,
    #[serde(default)]
    moves: Vec<MoveEntry>,
    ply: Option<i32>,
    #[serde(rename = "move")]
    best_move: Option<String>,
    eval: Option<i32>,
    score: Option<i32>,
    depth: Option<i32>,
    #[serde(default)]
    pv: Vec<String>,
}

/// HTTP client for the position database.
///
/// All calls go through the same path: build GET parameters, short-circuit
/// game-over positions, retry transport failures up to the configured budget
/// with a fixed delay, map the wire status, and honor the raise-on set. With
/// `autoclear` enabled, a `LimitExceeded` response triggers one `clearlimit`
/// call and a single retry of the original request instead of an error.
pub struct CdbClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl CdbClient {
    pub fn new(config: ClientConfig) -> Result<Self, CdbError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.timeout)
            .build()
            .map_err(|source| CdbError::Transport {
                attempts: 0,
                source,
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Query all known moves for a position.
    pub async fn query_all(&self, node: &Node) -> Result<CallResult, CdbError> {
        self.request(&Operation::QueryAll, Some(node)).await
    }

    /// Get one best-ranked move. If in doubt, use `query_all`.
    pub async fn query_best(&self, node: &Node) -> Result<CallResult, CdbError> {
        self.request(&Operation::QueryBest, Some(node)).await
    }

    /// Get just the best score for a position.
    pub async fn query_score(&self, node: &Node) -> Result<CallResult, CdbError> {
        self.request(&Operation::QueryScore, Some(node)).await
    }

    /// Get the backend's current principal variation for a position.
    pub async fn query_pv(&self, node: &Node) -> Result<CallResult, CdbError> {
        self.request(&Operation::QueryPv, Some(node)).await
    }

    /// Queue a position for deep analysis.
    pub async fn queue(&self, node: &Node) -> Result<CallResult, CdbError> {
        self.request(&Operation::Queue, Some(node)).await
    }

    /// Report a score for one specific move of a position.
    pub async fn store(&self, node: &Node, uci: &str) -> Result<CallResult, CdbError> {
        self.request(
            &Operation::Store {
                uci: uci.to_string(),
            },
            Some(node),
        )
        .await
    }

    /// Reset this IP address's daily request limit.
    pub async fn clear_limit(&self) -> Result<CdbStatus, CdbError> {
        let wire = self.get_with_retries("clearlimit", None, &[]).await?;
        CdbStatus::from_wire(wire.status.as_deref()).map_err(|text| CdbError::Protocol {
            detail: format!("unrecognized status text {text:?}"),
            fen: String::new(),
        })
    }

    async fn request(&self, op: &Operation, node: Option<&Node>) -> Result<CallResult, CdbError> {
        let fen = node.map(Node::fen).unwrap_or_default();
        if let Some(node) = node {
            if node.is_terminal() {
                return Ok(CallResult::Status(CdbStatus::GameOver));
            }
        }

        let mut extra: Vec<(&'static str, String)> = Vec::new();
        if let Some(node) = node {
            extra.push(("board", node.fen()));
        }
        if let Operation::Store { uci } = op {
            extra.push(("move", format!("move:{uci}")));
        }

        let mut cleared_limit = false;
        loop {
            let wire = self.get_with_retries(op.action(), node, &extra).await?;
            let status =
                CdbStatus::from_wire(wire.status.as_deref()).map_err(|text| CdbError::Protocol {
                    detail: format!("unrecognized status text {text:?}"),
                    fen: fen.clone(),
                })?;

            if status == CdbStatus::LimitExceeded && self.config.autoclear && !cleared_limit {
                let cleared = self.clear_limit().await?;
                if cleared != CdbStatus::LimitCleared {
                    return Err(CdbError::Protocol {
                        detail: format!("clearing the rate limit failed: {cleared:?}"),
                        fen: fen.clone(),
                    });
                }
                cleared_limit = true;
                continue;
            }
            if self.config.raise_on.contains(&status) {
                return Err(CdbError::Rejected {
                    status,
                    fen: fen.clone(),
                });
            }

            if op.is_query() && status == CdbStatus::Success {
                return Ok(CallResult::Analysis(Analysis {
                    moves: wire.moves,
                    ply: wire.ply,
                    best_move: wire.best_move,
                    eval: wire.eval,
                    score: wire.score,
                    depth: wire.depth,
                    pv: wire.pv,
                }));
            }
            return Ok(CallResult::Status(status));
        }
    }

    /// One GET with the bounded retry loop around transport failures.
    async fn get_with_retries(
        &self,
        action: &str,
        node: Option<&Node>,
        extra: &[(&'static str, String)],
    ) -> Result<WireResponse, CdbError> {
        let mut params: Vec<(&'static str, String)> = vec![
            ("action", action.to_string()),
            ("json", "1".to_string()),
        ];
        params.extend_from_slice(extra);
        params.extend(self.config.options.params());

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = async {
                self.http
                    .get(&self.config.base_url)
                    .query(&params)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            }
            .await;

            match outcome {
                Ok(body) => {
                    if body.trim().is_empty() {
                        // The backend sometimes answers trivial requests
                        // with an empty body rather than a null status.
                        return Ok(WireResponse::default());
                    }
                    return serde_json::from_str(&body).map_err(|e| CdbError::Protocol {
                        detail: format!("malformed response body: {e}"),
                        fen: node.map(Node::fen).unwrap_or_default(),
                    });
                }
                Err(source) if attempts <= self.config.max_retries => {
                    warn!(
                        action,
                        attempts,
                        remaining = self.config.max_retries - attempts + 1,
                        error = %source,
                        "transient HTTP failure, retrying after delay"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(source) => return Err(CdbError::Transport { attempts, source }),
            }
        }
    }
}

#[async_trait]
impl PositionService for CdbClient {
    async fn call(&self, op: &Operation, node: &Node) -> Result<CallResult, CdbError> {
        self.request(op, Some(node)).await
    }
}

/// A deterministic in-memory service, keyed by fingerprint.
///
/// Intended for tests and dry runs: query-family calls answer from the
/// canned map (falling back to `UnknownBoard`), and queue-family calls are
/// acknowledged with `Success`.
#[derive(Debug, Default)]
pub struct StaticService {
    responses: HashMap<crate::movegraph::Fingerprint, Analysis>,
}

impl StaticService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: &Node, analysis: Analysis) {
        self.responses.insert(node.fingerprint(), analysis);
    }
}

#[async_trait]
impl PositionService for StaticService {
    async fn call(&self, op: &Operation, node: &Node) -> Result<CallResult, CdbError> {
        if node.is_terminal() {
            return Ok(CallResult::Status(CdbStatus::GameOver));
        }
        if !op.is_query() {
            return Ok(CallResult::Status(CdbStatus::Success));
        }
        Ok(match self.responses.get(&node.fingerprint()) {
            Some(analysis) => CallResult::Analysis(analysis.clone()),
            None => CallResult::Status(CdbStatus::UnknownBoard),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_mapping_covers_the_wire_vocabulary() {
        assert_eq!(CdbStatus::from_wire(Some("ok")), Ok(CdbStatus::Success));
        assert_eq!(
            CdbStatus::from_wire(Some("invalid board")),
            Ok(CdbStatus::InvalidBoard)
        );
        assert_eq!(
            CdbStatus::from_wire(Some("unknown")),
            Ok(CdbStatus::UnknownBoard)
        );
        assert_eq!(
            CdbStatus::from_wire(Some("nobestmove")),
            Ok(CdbStatus::NoBestMove)
        );
        assert_eq!(
            CdbStatus::from_wire(Some("rate limit exceeded")),
            Ok(CdbStatus::LimitExceeded)
        );
        assert_eq!(
            CdbStatus::from_wire(Some("rate limit cleared")),
            Ok(CdbStatus::LimitCleared)
        );
        assert_eq!(CdbStatus::from_wire(None), Ok(CdbStatus::TrivialBoard));
        assert_eq!(
            CdbStatus::from_wire(Some("surprise")),
            Err("surprise".to_string())
        );
    }

    #[test]
    fn dedup_classes_cover_only_query_all_and_queue() {
        assert_eq!(Operation::QueryAll.dedup_class(), Some(DedupClass::Query));
        assert_eq!(Operation::Queue.dedup_class(), Some(DedupClass::Queue));
        assert_eq!(Operation::QueryBest.dedup_class(), None);
        assert_eq!(
            Operation::Store {
                uci: "e2e4".into()
            }
            .dedup_class(),
            None
        );
    }

    #[test]
    fn wire_response_parses_a_queryall_body() {
        let body = r#"{
            "status": "ok",
            "ply": 0,
            "moves": [
                {"uci": "e2e4", "san": "e4", "score": 40, "rank": 2,
                 "note": "! (71-00)", "winrate": "53.46"},
                {"uci": "d2d4", "san": "d4", "score": 35, "rank": 2}
            ]
        }"#;
        let wire: WireResponse = serde_json::from_str(body).unwrap();
        assert_eq!(wire.status.as_deref(), Some("ok"));
        assert_eq!(wire.moves.len(), 2);
        assert_eq!(wire.moves[0].uci, "e2e4");
        assert_eq!(wire.moves[0].score, 40);
        assert_eq!(wire.moves[1].note, None);
    }

    #[tokio::test]
    async fn game_over_positions_short_circuit_without_network() {
        // Bogus endpoint with no retries: any wire traffic would error.
        let config = ClientConfig::default()
            .with_base_url("http://127.0.0.1:9/unreachable")
            .with_retry_policy(0, Duration::from_millis(1));
        let client = CdbClient::new(config).unwrap();
        let stalemate = Node::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - -").unwrap();
        let result = client.query_all(&stalemate).await.unwrap();
        assert_eq!(result.status(), CdbStatus::GameOver);
    }

    #[tokio::test]
    async fn static_service_answers_from_canned_map() {
        let root = Node::startpos();
        let mut service = StaticService::new();
        service.insert(
            &root,
            Analysis {
                moves: vec![MoveEntry {
                    uci: "e2e4".into(),
                    san: "e4".into(),
                    score: 40,
                    rank: 2,
                    note: None,
                    winrate: None,
                }],
                ..Analysis::default()
            },
        );

        let hit = service.call(&Operation::QueryAll, &root).await.unwrap();
        assert_eq!(hit.analysis().unwrap().best_score(), Some(40));

        let miss = service
            .call(&Operation::QueryAll, &root.play_uci("e2e4").unwrap())
            .await
            .unwrap();
        assert_eq!(miss.status(), CdbStatus::UnknownBoard);
    }
}
