//! The dominator-based approximation: fast, not even locally optimal.
//!
//! A block need not be probed itself if every path from it to a crash point
//! runs through a dominator-tree child that is (transitively) covered. The
//! strategy only reasons about reachability to crash points, never about full
//! triangle disambiguation, which is what makes it cheap; it is used either
//! standalone or as a prepass seeding the greedy optimizer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;

use log::debug;
use petgraph::algo::dominators;

use super::graph::CoverageGraph;

/// The dominator tree of a [`CoverageGraph`], held as dense-id parent and
/// child arrays. Only blocks reachable from the entry appear in the tree.
#[derive(Clone, Debug)]
pub struct DominatorTree<N> {
    index: BTreeMap<N, usize>,
    nodes: Vec<N>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    root: usize,
}

impl<N> DominatorTree<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(graph: &CoverageGraph<N>) -> Self {
        let entry = graph.entry();
        let doms = dominators::simple_fast(graph, entry);

        let mut index: BTreeMap<N, usize> = BTreeMap::new();
        let mut nodes: Vec<N> = Vec::new();
        for node in graph.node_ids() {
            if node == entry || doms.immediate_dominator(node).is_some() {
                index.insert(node, nodes.len());
                nodes.push(node);
            }
        }

        let mut parent: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (&node, &id) in &index {
            if node == entry {
                continue;
            }
            // present by construction of the index
            let idom = doms.immediate_dominator(node).unwrap();
            let parent_id = match index.get(&idom) {
                Some(&p) => p,
                None => panic!("immediate dominator {idom} of block {node} is not in the tree"),
            };
            parent[id] = Some(parent_id);
            children[parent_id].push(id);
        }

        let root = index[&entry];
        DominatorTree {
            index,
            nodes,
            parent,
            children,
            root,
        }
    }

    fn id_of(&self, node: N) -> usize {
        match self.index.get(&node) {
            Some(&id) => id,
            None => panic!("block {node} is not in the dominator tree"),
        }
    }

    pub fn contains(&self, node: N) -> bool {
        self.index.contains_key(&node)
    }

    pub fn children_of(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.children[self.id_of(node)].iter().map(|&c| self.nodes[c])
    }

    /// Strict dominance: walks the parent chain, so it is not a cheap check.
    pub fn dominates(&self, dominator: N, dominated: N) -> bool {
        let target = self.id_of(dominator);
        let mut cursor = self.parent[self.id_of(dominated)];
        while let Some(p) = cursor {
            if p == target {
                return true;
            }
            cursor = self.parent[p];
        }
        false
    }

    /// All tree blocks in reverse topological order: children always come
    /// before their parents.
    pub fn reverse_topo(&self) -> Vec<N> {
        let mut order: Vec<N> = Vec::with_capacity(self.nodes.len());
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<(usize, bool)> = vec![(self.root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(self.nodes[id]);
                continue;
            }
            if seen[id] {
                panic!(
                    "dominator structure is not a tree: block {} visited twice",
                    self.nodes[id]
                );
            }
            seen[id] = true;
            stack.push((id, true));
            for &child in self.children[id].iter().rev() {
                stack.push((child, false));
            }
        }

        if order.len() != self.nodes.len() {
            panic!(
                "dominator tree traversal covered {} of {} blocks",
                order.len(),
                self.nodes.len()
            );
        }
        order
    }

    // determine if a path exists from `node` to some exit while bypassing
    // every block in `without`; reaching a successor-less block, or a
    // non-dominated crash point, counts as escaping
    fn exit_without(
        &self,
        graph: &CoverageGraph<N>,
        node: N,
        exits: &BTreeSet<N>,
        without: &BTreeSet<N>,
    ) -> bool {
        let mut visited = without.clone();
        visited.insert(node);
        let mut worklist: Vec<N> = vec![node];

        while let Some(cur) = worklist.pop() {
            visited.insert(cur);
            if graph.successors(cur).is_empty() {
                return true;
            }
            if cur != node && exits.contains(&cur) && !self.dominates(node, cur) {
                return true;
            }
            for &step in graph.successors(cur) {
                if !visited.contains(&step) {
                    worklist.push(step);
                }
            }
        }
        false
    }

    // find the cheapest subset of `node`'s coverable dominator children that
    // still covers it, dropping the most expensive children first;
    // already-committed children are kept since they come for free
    fn cheapest_children(
        &self,
        graph: &CoverageGraph<N>,
        node: N,
        can_cover: &BTreeSet<N>,
        will_cover: &BTreeSet<N>,
        exits: &BTreeSet<N>,
    ) -> BTreeSet<N> {
        let mut coverable: BTreeSet<N> = self
            .children_of(node)
            .filter(|c| can_cover.contains(c))
            .collect();
        if self.exit_without(graph, node, exits, &coverable) {
            panic!(
                "attempt to find cheapest child set for block {node}, which cannot be covered by \
                 its children"
            );
        }

        let removable = graph.sort_by_cost(&coverable);
        for &child in &removable {
            if will_cover.contains(&child) {
                continue;
            }
            let mut others = coverable.clone();
            others.remove(&child);
            if !self.exit_without(graph, node, exits, &others) {
                coverable.remove(&child);
            }
        }

        coverable
    }

    // cover `node` in whatever way necessary: by instrumenting it, or through
    // a cheapest sufficient set of its dominator children, transitively
    fn cover_node(
        &self,
        graph: &CoverageGraph<N>,
        node: N,
        can_cover: &BTreeSet<N>,
        can_inst: &BTreeSet<N>,
        exits: &BTreeSet<N>,
        will_inst: &mut BTreeSet<N>,
        will_cover: &mut BTreeSet<N>,
    ) {
        // explicit stack; the second visit of a block marks it covered after
        // all of its chosen children have been handled
        let mut stack: Vec<(N, bool)> = vec![(node, false)];
        while let Some((cur, done)) = stack.pop() {
            if done {
                will_cover.insert(cur);
                continue;
            }

            let coverable_children: BTreeSet<N> = self
                .children_of(cur)
                .filter(|c| can_cover.contains(c))
                .collect();
            if self.exit_without(graph, cur, exits, &coverable_children) {
                // coverable children are not enough; cur must carry a probe
                if !can_inst.contains(&cur) {
                    panic!(
                        "expected block {cur} to be instrumentable while covering its dominator; \
                         the reachability pass disagrees"
                    );
                }
                will_inst.insert(cur);
                will_cover.insert(cur);
            } else {
                let cheap = self.cheapest_children(graph, cur, can_cover, will_cover, exits);
                stack.push((cur, true));
                for &child in cheap.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
    }

    /// Compute the dominator-based approximation of coverage probes.
    ///
    /// If some desired block cannot be covered at all, the unmodified
    /// `can_probe` set is returned: a conservative fallback, not an error.
    pub fn optimized_probes(
        &self,
        graph: &CoverageGraph<N>,
        can_probe: &BTreeSet<N>,
        want_data: &BTreeSet<N>,
        crash_points: &BTreeSet<N>,
    ) -> BTreeSet<N> {
        let order = self.reverse_topo();

        // reachability pass: which blocks could be covered at all?
        let mut can_cover: BTreeSet<N> = BTreeSet::new();
        let mut need_inst: BTreeSet<N> = BTreeSet::new();
        for &node in &order {
            let covered_children: BTreeSet<N> = self
                .children_of(node)
                .filter(|c| can_cover.contains(c))
                .collect();

            let my_can_inst = can_probe.contains(&node);
            let my_need_inst = self.exit_without(graph, node, crash_points, &covered_children);
            if !my_need_inst || my_can_inst {
                can_cover.insert(node);
            }
            if my_need_inst {
                need_inst.insert(node);
            }
        }

        // give up if we cannot get a coverage set this way
        if want_data.difference(&can_cover).next().is_some() {
            debug!("dominator approximation cannot cover every desired block; giving up");
            return can_probe.clone();
        }

        // commit pass: pick the probes
        let mut will_inst: BTreeSet<N> = BTreeSet::new();
        let mut will_cover: BTreeSet<N> = BTreeSet::new();
        for &node in &order {
            let covered_children: BTreeSet<N> = self
                .children_of(node)
                .filter(|c| will_cover.contains(c))
                .collect();
            if !self.exit_without(graph, node, crash_points, &covered_children) {
                will_cover.insert(node);
            }
            if !want_data.contains(&node) {
                continue;
            }

            if need_inst.contains(&node) && can_probe.contains(&node) {
                will_inst.insert(node);
                will_cover.insert(node);
            } else if !need_inst.contains(&node) {
                self.cover_node(
                    graph,
                    node,
                    &can_cover,
                    can_probe,
                    crash_points,
                    &mut will_inst,
                    &mut will_cover,
                );
                will_cover.insert(node);
            } else {
                debug!(
                    "cannot cover requested block {} under the instrumentation restrictions",
                    node
                );
            }
        }

        if want_data.difference(&will_cover).next().is_some() {
            panic!("dominator optimization failed to cover desired blocks it committed to");
        }

        will_inst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::fixtures::{chain, diamond_bypass, graph, single_loop};
    use crate::coverage::oracle::is_coverage_set;

    #[test]
    fn children_precede_parents() {
        let g = chain();
        let tree = DominatorTree::new(&g);

        let order = tree.reverse_topo();
        assert_eq!(order.len(), g.len());
        for (i, &node) in order.iter().enumerate() {
            for child in tree.children_of(node) {
                let child_pos = order.iter().position(|&n| n == child).unwrap();
                assert!(child_pos < i);
            }
        }
        // the root comes out last
        assert_eq!(*order.last().unwrap(), 0);
    }

    #[test]
    fn dominance_is_strict_and_transitive() {
        let g = chain();
        let tree = DominatorTree::new(&g);

        assert!(tree.dominates(0, 3));
        assert!(tree.dominates(1, 2));
        assert!(!tree.dominates(0, 0));
        assert!(!tree.dominates(2, 1));
    }

    #[test]
    fn unreachable_blocks_stay_out_of_the_tree() {
        // block 9 dangles off to the side with no path from the entry
        let g = graph(
            0,
            &[
                (0, 100, &[1]),
                (1, 100, &[]),
                (9, 1, &[1]),
            ],
        );
        let tree = DominatorTree::new(&g);
        assert!(tree.contains(0));
        assert!(tree.contains(1));
        assert!(!tree.contains(9));
    }

    #[test]
    fn join_gets_the_probe() {
        let g = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = g.crash_points();
        let tree = DominatorTree::new(&g);

        let result = tree.optimized_probes(&g, &g.all_nodes(), &desired, &crash);
        assert_eq!(result, BTreeSet::from([3]));
        assert!(is_coverage_set(&g, &result, &desired, 0, &crash));
    }

    #[test]
    fn straight_line_keeps_one_exit_probe() {
        // reachability-only reasoning cannot tell that a straight line needs
        // no probes at all; covering the desired blocks bottoms out at the
        // exit, which is still sound, just not minimal
        let g = chain();
        let desired = BTreeSet::from([1, 2]);
        let crash = g.crash_points();
        let tree = DominatorTree::new(&g);

        let result = tree.optimized_probes(&g, &g.all_nodes(), &desired, &crash);
        assert_eq!(result, BTreeSet::from([3]));
        assert!(is_coverage_set(&g, &result, &desired, 0, &crash));
    }

    #[test]
    fn loop_keeps_one_exit_probe() {
        let g = single_loop();
        let desired = BTreeSet::from([1]);
        let crash = g.crash_points();
        let tree = DominatorTree::new(&g);

        let result = tree.optimized_probes(&g, &g.all_nodes(), &desired, &crash);
        assert_eq!(result, BTreeSet::from([3]));
        assert!(is_coverage_set(&g, &result, &desired, 0, &crash));
    }

    #[test]
    fn uncoverable_desired_block_falls_back_to_can_probe() {
        // the desired block branches to two exits and nothing downstream may
        // carry a probe, so it cannot be covered at all
        let g = graph(
            0,
            &[
                (0, 100, &[1]),
                (1, 100, &[2, 3]),
                (2, 50, &[4]),
                (3, 50, &[5]),
                (4, 50, &[]),
                (5, 50, &[]),
            ],
        );
        let can_probe = BTreeSet::from([0]);
        let desired = BTreeSet::from([1]);
        let tree = DominatorTree::new(&g);

        let result = tree.optimized_probes(&g, &can_probe, &desired, &g.crash_points());
        assert_eq!(result, can_probe);
    }
}
