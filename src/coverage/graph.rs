use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::iter;
use std::slice;

use serde::{Deserialize, Serialize};

use crate::Error;

// blocks that compute a zero cost would otherwise be free probes
const ZERO_COST_FLOOR: f64 = 0.00001;

/// How a basic block ends. Blocks without successors must terminate with
/// either a return or an unreachable; only returning blocks count as crash
/// points, since an unreachable is never actually executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminator {
    Branch,
    Return,
    Unreachable,
}

/// A basic block of the graph: an opaque id, an execution-frequency
/// estimate, and the ordered successor list.
#[derive(Clone, Debug)]
pub struct Block<N> {
    id: N,
    frequency: u64,
    successors: Vec<N>,
    terminator: Terminator,
}

impl<N> Block<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(id: N, frequency: u64, successors: Vec<N>, terminator: Terminator) -> Self {
        Block {
            id,
            frequency,
            successors,
            terminator,
        }
    }

    pub fn id(&self) -> N {
        self.id
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn successors(&self) -> &[N] {
        &self.successors
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }
}

/// A procedure's control-flow graph together with a per-block cost map.
///
/// Costs are derived once, at construction, from the frequency estimates:
/// they are scaled so the entry block costs exactly 1.0, and any block whose
/// scaled frequency collapses to zero gets a small floor cost instead. The
/// graph is read-only after construction.
#[derive(Clone, Debug)]
pub struct CoverageGraph<N> {
    entry: N,
    blocks: BTreeMap<N, Block<N>>,
    preds: BTreeMap<N, Vec<N>>,
    cost: BTreeMap<N, f64>,
}

impl<N> CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(entry: N, blocks: Vec<Block<N>>) -> Result<Self, Error> {
        if blocks.is_empty() {
            return Err(Error::EmptyGraph);
        }

        let mut graph: BTreeMap<N, Block<N>> = BTreeMap::new();
        for block in blocks {
            if block.successors.is_empty() && block.terminator == Terminator::Branch {
                return Err(Error::TerminalBlock(block.id.to_string()));
            }
            let id = block.id;
            if graph.insert(id, block).is_some() {
                return Err(Error::DuplicateBlock(id.to_string()));
            }
        }

        if !graph.contains_key(&entry) {
            return Err(Error::InvalidEntry(entry.to_string()));
        }

        let mut preds: BTreeMap<N, Vec<N>> = BTreeMap::new();
        for id in graph.keys() {
            preds.insert(*id, Vec::new());
        }
        for (id, block) in &graph {
            for target in &block.successors {
                match preds.get_mut(target) {
                    Some(sources) => sources.push(*id),
                    None => {
                        return Err(Error::UnknownSuccessor(id.to_string(), target.to_string()))
                    }
                }
            }
        }

        let cost = Self::fill_in_cost(entry, &graph);

        Ok(CoverageGraph {
            entry,
            blocks: graph,
            preds,
            cost,
        })
    }

    // scale frequencies so that the entry block costs 1.0; the whole/remainder
    // split keeps precision for blocks much hotter than the entry
    fn fill_in_cost(entry: N, blocks: &BTreeMap<N, Block<N>>) -> BTreeMap<N, f64> {
        let mut scale = blocks[&entry].frequency;
        if scale == 0 {
            // a zero entry frequency would poison every ratio
            scale = 1;
        }
        let scale_f = scale as f64;

        let mut cost = BTreeMap::new();
        for (id, block) in blocks {
            let whole = block.frequency / scale;
            let part = block.frequency % scale;
            let mut scaled = whole as f64 + part as f64 / scale_f;
            if scaled == 0.0 {
                scaled = ZERO_COST_FLOOR;
            }
            cost.insert(*id, scaled);
        }
        cost
    }

    pub fn entry(&self) -> N {
        self.entry
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, node: N) -> bool {
        self.blocks.contains_key(&node)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = N> + '_ {
        self.blocks.keys().copied()
    }

    pub fn successors(&self, node: N) -> &[N] {
        match self.blocks.get(&node) {
            Some(block) => &block.successors,
            None => panic!("successors requested for block {node}, which is not in the graph"),
        }
    }

    pub fn predecessors(&self, node: N) -> &[N] {
        match self.preds.get(&node) {
            Some(sources) => sources,
            None => panic!("predecessors requested for block {node}, which is not in the graph"),
        }
    }

    pub fn cost(&self, node: N) -> f64 {
        match self.cost.get(&node) {
            Some(cost) => *cost,
            None => panic!("cost requested for block {node}, which is not in the graph"),
        }
    }

    pub fn frequency(&self, node: N) -> u64 {
        match self.blocks.get(&node) {
            Some(block) => block.frequency,
            None => panic!("frequency requested for block {node}, which is not in the graph"),
        }
    }

    /// All block ids, as a set.
    pub fn all_nodes(&self) -> BTreeSet<N> {
        self.blocks.keys().copied().collect()
    }

    /// Return-terminated blocks: the places where an execution may stop
    /// without running anything further.
    pub fn crash_points(&self) -> BTreeSet<N> {
        self.blocks
            .values()
            .filter(|b| b.terminator == Terminator::Return)
            .map(|b| b.id)
            .collect()
    }

    /// The default desired set: every block with at least one predecessor,
    /// plus the entry. Blocks orphaned by calls that never return are left
    /// out on purpose.
    pub fn default_desired(&self) -> BTreeSet<N> {
        self.blocks
            .keys()
            .filter(|&&id| id == self.entry || !self.preds[&id].is_empty())
            .copied()
            .collect()
    }

    /// Sort blocks by descending cost. Equal costs fall back to descending
    /// id, so the order is deterministic and reproducible across runs.
    pub fn sort_by_cost(&self, blocks: &BTreeSet<N>) -> Vec<N> {
        let mut result: Vec<N> = blocks.iter().copied().collect();
        result.sort_by(|a, b| {
            let first = self.cost(*a);
            let second = self.cost(*b);
            if first == second {
                b.cmp(a)
            } else {
                second.total_cmp(&first)
            }
        });
        result
    }

    pub fn cost_of_set(&self, blocks: &BTreeSet<N>) -> f64 {
        blocks.iter().map(|&b| self.cost(b)).sum()
    }

    // from graph to .dot
    pub fn render_to<W: std::io::Write>(&self, output: &mut W) -> dot2::Result {
        dot2::render(self, output)
    }
}

impl<N> fmt::Display for CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in &self.blocks {
            write!(f, "{} -> {{", id)?;
            for target in &block.successors {
                write!(f, " {}", target)?;
            }
            writeln!(f, " }}")?;
        }
        Ok(())
    }
}

// the visit traits below are what petgraph's dominator computation needs

impl<N> petgraph::visit::GraphBase for CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type NodeId = N;
    type EdgeId = (N, N);
}

impl<'a, N> petgraph::visit::IntoNeighbors for &'a CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Neighbors = iter::Copied<slice::Iter<'a, N>>;

    fn neighbors(self, a: Self::NodeId) -> Self::Neighbors {
        self.successors(a).iter().copied()
    }
}

impl<'a, N> petgraph::visit::IntoNeighborsDirected for &'a CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type NeighborsDirected = iter::Copied<slice::Iter<'a, N>>;

    fn neighbors_directed(
        self,
        n: Self::NodeId,
        d: petgraph::Direction,
    ) -> Self::NeighborsDirected {
        match d {
            petgraph::Direction::Outgoing => self.successors(n).iter().copied(),
            petgraph::Direction::Incoming => self.predecessors(n).iter().copied(),
        }
    }
}

impl<'a, N> petgraph::visit::IntoNodeIdentifiers for &'a CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type NodeIdentifiers = iter::Copied<btree_map::Keys<'a, N, Block<N>>>;

    fn node_identifiers(self) -> Self::NodeIdentifiers {
        self.blocks.keys().copied()
    }
}

impl<N> petgraph::visit::Visitable for CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Map = HashSet<Self::NodeId>;

    fn visit_map(&self) -> Self::Map {
        HashSet::with_capacity(self.blocks.len())
    }

    fn reset_map(&self, map: &mut Self::Map) {
        map.clear()
    }
}

impl<'a, N> dot2::Labeller<'a> for CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Node = N;
    type Edge = (N, N);
    type Subgraph = ();

    // .dot compatible identifier naming the graph
    fn graph_id(&'a self) -> dot2::Result<dot2::Id<'a>> {
        dot2::Id::new("coverage_cfg")
    }

    // maps n to unique (valid .dot) identifier
    fn node_id(&'a self, n: &Self::Node) -> dot2::Result<dot2::Id<'a>> {
        dot2::Id::new(format!("N{}", n))
    }

    // labels of nodes: id and cost
    fn node_label(&'a self, n: &Self::Node) -> dot2::Result<dot2::label::Text<'a>> {
        let label = format!("{}: {:.5}", n, self.cost(*n));
        Ok(dot2::label::Text::LabelStr(label.into()))
    }
}

impl<'a, N> dot2::GraphWalk<'a> for CoverageGraph<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Node = N;
    type Edge = (N, N);
    type Subgraph = ();

    // all nodes of the graph
    fn nodes(&'a self) -> dot2::Nodes<'a, Self::Node> {
        self.blocks.keys().copied().collect()
    }

    // all edges of the graph
    fn edges(&'a self) -> dot2::Edges<'a, Self::Edge> {
        let mut edges: Vec<(N, N)> = Vec::new();
        for (id, block) in &self.blocks {
            for target in &block.successors {
                edges.push((*id, *target));
            }
        }
        edges.into_iter().collect()
    }

    // source node for the given edge
    fn source(&'a self, edge: &Self::Edge) -> Self::Node {
        let &(s, _) = edge;
        s
    }

    // target node for the given edge
    fn target(&'a self, edge: &Self::Edge) -> Self::Node {
        let &(_, t) = edge;
        t
    }
}

/// A rendering of the graph with a chosen probe set highlighted.
pub struct ProbeView<'a, N> {
    graph: &'a CoverageGraph<N>,
    probes: &'a BTreeSet<N>,
}

impl<'a, N> ProbeView<'a, N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(graph: &'a CoverageGraph<N>, probes: &'a BTreeSet<N>) -> Self {
        ProbeView { graph, probes }
    }

    pub fn render_to<W: std::io::Write>(&self, output: &mut W) -> dot2::Result {
        dot2::render(self, output)
    }
}

impl<'a, N> dot2::Labeller<'a> for ProbeView<'a, N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Node = N;
    type Edge = (N, N);
    type Subgraph = ();

    fn graph_id(&'a self) -> dot2::Result<dot2::Id<'a>> {
        dot2::Id::new("coverage_probes")
    }

    fn node_id(&'a self, n: &Self::Node) -> dot2::Result<dot2::Id<'a>> {
        dot2::Id::new(format!("N{}", n))
    }

    fn node_label(&'a self, n: &Self::Node) -> dot2::Result<dot2::label::Text<'a>> {
        let label = format!("{}: {:.5}", n, self.graph.cost(*n));
        Ok(dot2::label::Text::LabelStr(label.into()))
    }

    // probes are filled, the rest keep the default style
    fn node_style(&'a self, n: &Self::Node) -> dot2::Style {
        if self.probes.contains(n) {
            dot2::Style::Filled
        } else {
            dot2::Style::None
        }
    }
}

impl<'a, N> dot2::GraphWalk<'a> for ProbeView<'a, N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    type Node = N;
    type Edge = (N, N);
    type Subgraph = ();

    fn nodes(&'a self) -> dot2::Nodes<'a, Self::Node> {
        self.graph.blocks.keys().copied().collect()
    }

    fn edges(&'a self) -> dot2::Edges<'a, Self::Edge> {
        dot2::GraphWalk::edges(self.graph)
    }

    fn source(&'a self, edge: &Self::Edge) -> Self::Node {
        edge.0
    }

    fn target(&'a self, edge: &Self::Edge) -> Self::Node {
        edge.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64, frequency: u64, successors: &[u64]) -> Block<u64> {
        let terminator = if successors.is_empty() {
            Terminator::Return
        } else {
            Terminator::Branch
        };
        Block::new(id, frequency, successors.to_vec(), terminator)
    }

    #[test]
    fn unknown_successor_is_rejected() {
        let result = CoverageGraph::new(0, vec![block(0, 10, &[7])]);
        assert_eq!(
            result.err(),
            Some(Error::UnknownSuccessor("0".to_string(), "7".to_string()))
        );
    }

    #[test]
    fn branch_without_successors_is_rejected() {
        let blocks = vec![Block::new(0, 10, Vec::new(), Terminator::Branch)];
        let result = CoverageGraph::new(0, blocks);
        assert_eq!(result.err(), Some(Error::TerminalBlock("0".to_string())));
    }

    #[test]
    fn missing_entry_is_rejected() {
        let result = CoverageGraph::new(3, vec![block(0, 10, &[])]);
        assert_eq!(result.err(), Some(Error::InvalidEntry("3".to_string())));
    }

    #[test]
    fn empty_graph_is_rejected() {
        let result = CoverageGraph::<u64>::new(0, Vec::new());
        assert_eq!(result.err(), Some(Error::EmptyGraph));
    }

    #[test]
    fn costs_are_scaled_to_the_entry() {
        let graph = CoverageGraph::new(
            0,
            vec![
                block(0, 1000, &[1, 2]),
                block(1, 500, &[2]),
                block(2, 2500, &[]),
            ],
        )
        .unwrap();

        assert_eq!(graph.cost(0), 1.0);
        assert_eq!(graph.cost(1), 0.5);
        assert_eq!(graph.cost(2), 2.5);
    }

    #[test]
    fn zero_cost_gets_a_floor() {
        let graph =
            CoverageGraph::new(0, vec![block(0, 1000, &[1]), block(1, 0, &[])]).unwrap();
        assert!(graph.cost(1) > 0.0);
    }

    #[test]
    fn sort_is_by_descending_cost_with_descending_id_ties() {
        let graph = CoverageGraph::new(
            0,
            vec![
                block(0, 100, &[1, 2]),
                block(1, 50, &[3]),
                block(2, 50, &[3]),
                block(3, 200, &[]),
            ],
        )
        .unwrap();

        let order = graph.sort_by_cost(&graph.all_nodes());
        assert_eq!(order, vec![3, 0, 2, 1]);
    }

    #[test]
    fn crash_points_are_the_returning_blocks() {
        let blocks = vec![
            block(0, 10, &[1, 2]),
            block(1, 5, &[]),
            Block::new(2, 5, Vec::new(), Terminator::Unreachable),
        ];
        let graph = CoverageGraph::new(0, blocks).unwrap();
        assert_eq!(graph.crash_points(), BTreeSet::from([1]));
    }

    #[test]
    fn default_desired_needs_a_predecessor_or_entry() {
        let graph = CoverageGraph::new(
            0,
            vec![
                block(0, 10, &[2]),
                // an orphan with no predecessors
                block(1, 1, &[2]),
                block(2, 10, &[]),
            ],
        )
        .unwrap();
        assert_eq!(graph.default_desired(), BTreeSet::from([0, 2]));
    }

    #[test]
    #[should_panic(expected = "not in the graph")]
    fn missing_block_lookup_is_fatal() {
        let graph = CoverageGraph::new(0, vec![block(0, 10, &[])]).unwrap();
        graph.cost(42);
    }
}
