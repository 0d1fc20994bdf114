//! Minimum-cost coverage probe selection over weighted control-flow graphs.
//!
//! Given a procedure's CFG with per-block execution-frequency estimates, pick
//! the cheapest set of blocks to instrument such that execution of every
//! "desired" block can still be inferred after the fact, even when the run
//! stops early at a crash point.

pub mod coverage;
pub mod input;
pub mod select;

use thiserror::Error;

/// Configuration and input errors. Internal invariant violations do not show
/// up here; those abort with a descriptive panic instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("graph has no blocks")]
    EmptyGraph,

    #[error("entry block {0} is not part of the graph")]
    InvalidEntry(String),

    #[error("duplicate block id {0}")]
    DuplicateBlock(String),

    #[error("block {0} targets {1}, which is not part of the graph")]
    UnknownSuccessor(String, String),

    #[error("block {0} has no successors but is not return- or unreachable-terminated")]
    TerminalBlock(String),

    #[error("{set} set names block {node}, which is not part of the optimization graph")]
    UnknownNode { set: &'static str, node: String },

    #[error("optimization level {0} is not supported by this build (enable the `exact` feature)")]
    UnsupportedLevel(&'static str),
}
