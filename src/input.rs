//! On-disk procedure fixtures.
//!
//! A YAML file holds a list of procedures, each with an entry block and a
//! list of blocks carrying frequency estimates and successor edges. This is
//! the driver binary's input format and doubles as a convenient way to write
//! down test graphs.

use serde::{Deserialize, Serialize};

use crate::coverage::{Block, CoverageGraph, Terminator};
use crate::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawProcedure {
    pub name: String,
    pub entry: u64,
    pub blocks: Vec<RawBlock>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawBlock {
    pub id: u64,
    pub frequency: u64,
    #[serde(default)]
    pub successors: Vec<u64>,
    /// Defaults to `branch` for blocks with successors and `return` for
    /// blocks without.
    #[serde(default)]
    pub terminator: Option<Terminator>,
}

impl RawProcedure {
    pub fn to_graph(&self) -> Result<CoverageGraph<u64>, Error> {
        let blocks = self
            .blocks
            .iter()
            .map(|raw| {
                let terminator = raw.terminator.unwrap_or(if raw.successors.is_empty() {
                    Terminator::Return
                } else {
                    Terminator::Branch
                });
                Block::new(raw.id, raw.frequency, raw.successors.clone(), terminator)
            })
            .collect();
        CoverageGraph::new(self.entry, blocks)
    }
}
