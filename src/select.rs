//! Probe selection over any petgraph-compatible graph.
//!
//! Callers that already hold their CFG in a petgraph-shaped structure can
//! run the whole pipeline without building a [`CoverageGraph`] by hand; the
//! only extra requirement is a per-block execution-frequency estimate.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use petgraph::visit::{GraphBase, IntoNeighborsDirected, IntoNodeIdentifiers};
use petgraph::Direction;

use crate::coverage::{Block, CoverageGraph, OptimizationData, OptimizeOptions, Terminator};
use crate::Error;

/// Execution-frequency estimates for the blocks of a graph.
pub trait BlockFrequency: GraphBase {
    fn frequency(&self, node: Self::NodeId) -> u64;
}

impl<'a, N> BlockFrequency for &'a CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    fn frequency(&self, node: Self::NodeId) -> u64 {
        CoverageGraph::frequency(self, node)
    }
}

/// Build a [`CoverageGraph`] from any graph exposing node identifiers,
/// directed neighbors, and block frequencies. Successor-less nodes are
/// treated as returning blocks.
pub fn to_coverage_graph<G>(g: G, entry: G::NodeId) -> Result<CoverageGraph<G::NodeId>, Error>
where
    G: IntoNodeIdentifiers + IntoNeighborsDirected + BlockFrequency,
    G::NodeId: Copy + Eq + Hash + Ord + Debug + Display,
{
    // if the given graph is empty, there is nothing to optimize over
    if g.node_identifiers().next().is_none() {
        return Err(Error::EmptyGraph);
    }

    // the entry must be one of the graph's own nodes
    if !g.node_identifiers().any(|x| x == entry) {
        return Err(Error::InvalidEntry(entry.to_string()));
    }

    let mut blocks: Vec<Block<G::NodeId>> = Vec::new();
    for node in g.node_identifiers() {
        let successors: Vec<G::NodeId> =
            g.neighbors_directed(node, Direction::Outgoing).collect();
        let terminator = if successors.is_empty() {
            Terminator::Return
        } else {
            Terminator::Branch
        };
        blocks.push(Block::new(node, g.frequency(node), successors, terminator));
    }

    CoverageGraph::new(entry, blocks)
}

/// Run probe selection end to end: convert, precompute, optimize.
pub fn optimized_probes<G>(
    g: G,
    entry: G::NodeId,
    options: &OptimizeOptions,
) -> Result<BTreeSet<G::NodeId>, Error>
where
    G: IntoNodeIdentifiers + IntoNeighborsDirected + BlockFrequency,
    G::NodeId: Copy + Eq + Hash + Ord + Debug + Display,
{
    let data = OptimizationData::new(to_coverage_graph(g, entry)?);
    data.optimized_probes(None, None, options)
}
