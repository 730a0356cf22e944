//! Concurrent exploration of the chessdb.cn position database.
//!
//! The crate is organized around one seam, [`api::PositionService`], and
//! three engines that drive it:
//!
//! - [`executor::RequestExecutor`] fans one operation out over a stream of
//!   positions with bounded concurrency
//! - [`frontier::Frontier`] enumerates the position graph breadth-first,
//!   deduplicated and resumable
//! - [`traversal::NearPvExplorer`] walks the neighborhood of the principal
//!   variation through a feedback worker pool, guided by a centipawn margin
//!
//! [`library::CdbLibrary`] packages the common combinations into single
//! calls. The production service is [`api::CdbClient`]; everything above the
//! seam is generic, so tests and dry runs substitute in-memory services.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cdb_explore::api::CdbClient;
//! use cdb_explore::config::ClientConfig;
//! use cdb_explore::movegraph::Node;
//! use cdb_explore::traversal::{NearPvExplorer, NearPvParams, QueueAnyVisitor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(CdbClient::new(ClientConfig::default())?);
//! let explorer = NearPvExplorer::new(client, NearPvParams::new(20))?;
//! let report = explorer
//!     .explore(Node::startpos(), &mut QueueAnyVisitor)
//!     .await;
//! let (analyses, stats) = report.into_result()?;
//! println!("visited {} positions, kept {}", stats.nodes, analyses.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod executor;
pub mod frontier;
pub mod library;
pub mod movegraph;
pub mod orchestrator;
pub mod traversal;

pub use api::{Analysis, CallResult, CdbClient, CdbStatus, MoveEntry, Operation, PositionService};
pub use config::{ClientConfig, QueryOptions};
pub use errors::{CdbError, EngineError, PolicyError};
pub use executor::RequestExecutor;
pub use frontier::Frontier;
pub use library::CdbLibrary;
pub use movegraph::{Fingerprint, Node};
pub use orchestrator::FeedbackOrchestrator;
pub use traversal::{NearPvExplorer, NearPvParams, NearPvReport, NearPvStats, NearPvVisitor};
