//! The exact optimizer: a lazy-constraint (cutting-plane) loop around an
//! integer program.
//!
//! Enumerating every ambiguous triangle up front is combinatorially hopeless,
//! so the loop starts from the triangles visible with no instrumentation at
//! all, solves the relaxed model, then hunts for triangles the proposed
//! solution still leaves ambiguous, at growing distance from each desired
//! block. Each find becomes a new "pick at least one of these blocks"
//! constraint. A solve that admits no new triangle is a verified optimum.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::Instant;

use log::debug;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::graph::CoverageGraph;
use super::solver::{BranchBound, CoverSolver};

const MAX_ITERATIONS: usize = 200;
const INITIAL_MAX_DEPTH: usize = 1;
const MAX_DEPTH_INCREMENT: usize = 1;
const FINAL_MAX_DEPTH: usize = 7;

/// An ambiguous triangle, reduced to what the integer program needs: the
/// instrumentation weight of its cheapest witness paths, and the symmetric
/// difference of the path node sets, which is where a probe must go.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Triangle {
    weight: f64,
    sym_diff: BTreeSet<NodeIndex>,
}

impl Eq for Triangle {}

impl Ord for Triangle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| self.sym_diff.cmp(&other.sym_diff))
    }
}

impl PartialOrd for Triangle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Triangle {
    // paths arrive as edge-target lists, so the starting block of each leg is
    // absent but the leg's endpoint is present
    fn new(
        weight: f64,
        mut alpha_d: Vec<NodeIndex>,
        mut d_beta: Vec<NodeIndex>,
        mut alpha_beta: Vec<NodeIndex>,
        y: &BTreeSet<NodeIndex>,
        use_heuristics: bool,
    ) -> Self {
        if use_heuristics {
            // squeeze alpha and beta closer to d: if the legs of the triangle
            // meet up anywhere besides alpha and beta, the stretches outside
            // the meet-up points only weaken the constraint
            trim_to_common(&mut alpha_d, &mut alpha_beta, true);
            trim_to_common(&mut d_beta, &mut alpha_beta, false);
            if alpha_d.is_empty() {
                // at minimum d itself must survive on its own leg
                panic!("triangle trimming removed the desired block from its own path");
            }
        }

        let alpha_d_nodes: BTreeSet<NodeIndex> = alpha_d.into_iter().collect();
        let d_beta_nodes: BTreeSet<NodeIndex> = d_beta.into_iter().collect();
        let alpha_beta_nodes: BTreeSet<NodeIndex> = alpha_beta.into_iter().collect();

        let through_d: BTreeSet<NodeIndex> =
            alpha_d_nodes.union(&d_beta_nodes).copied().collect();
        let full_sym_diff: BTreeSet<NodeIndex> = through_d
            .symmetric_difference(&alpha_beta_nodes)
            .copied()
            .collect();
        let sym_diff = full_sym_diff.difference(y).copied().collect();

        Triangle { weight, sym_diff }
    }

    pub(crate) fn symmetric_difference(&self) -> &BTreeSet<NodeIndex> {
        &self.sym_diff
    }
}

// If v1 and v2 share any nodes, trim both to the meet-up point: from the
// front (everything up to and including the match goes) or from the back
// (the match and everything after it goes). Repeats until no trim applies,
// but a well-formed pair of shortest-path legs only ever admits one.
fn trim_to_common(v1: &mut Vec<NodeIndex>, v2: &mut Vec<NodeIndex>, trim_from_front: bool) {
    let mut trim_count = 0u32;
    loop {
        let mut did_trim = false;
        if trim_from_front {
            'search: for i in (0..v1.len()).rev() {
                for j in (0..v2.len()).rev() {
                    if v1[i] == v2[j] {
                        v1.drain(..=i);
                        v2.drain(..=j);
                        did_trim = true;
                        trim_count += 1;
                        break 'search;
                    }
                }
            }
        } else {
            'search: for i in 0..v1.len() {
                if let Some(j) = v2.iter().position(|&n| n == v1[i]) {
                    v1.truncate(i);
                    v2.truncate(j);
                    did_trim = true;
                    trim_count += 1;
                    break 'search;
                }
            }
        }
        if !did_trim {
            break;
        }
    }

    if trim_count > 1 {
        panic!("unexpected multiple-trimming of triangle legs during exact optimization");
    }
}

// all nodes on some path from `from` to `to` avoiding `excluding`:
// forward-reachable intersected with backward-reachable
fn connected_excluding<N>(
    graph: &DiGraph<N, ()>,
    from: &BTreeSet<NodeIndex>,
    to: &BTreeSet<NodeIndex>,
    excluding: &BTreeSet<NodeIndex>,
) -> BTreeSet<NodeIndex> {
    let mut visited_fw = from.clone();
    let mut visited_bw = to.clone();

    let mut worklist: VecDeque<NodeIndex> = VecDeque::new();
    for &n in from {
        worklist.extend(graph.neighbors_directed(n, Direction::Outgoing));
    }
    while let Some(n) = worklist.pop_front() {
        if visited_fw.contains(&n) || excluding.contains(&n) {
            continue;
        }
        visited_fw.insert(n);
        worklist.extend(graph.neighbors_directed(n, Direction::Outgoing));
    }

    for &n in to {
        worklist.extend(graph.neighbors_directed(n, Direction::Incoming));
    }
    while let Some(n) = worklist.pop_front() {
        if visited_bw.contains(&n) || excluding.contains(&n) {
            continue;
        }
        visited_bw.insert(n);
        worklist.extend(graph.neighbors_directed(n, Direction::Incoming));
    }

    visited_fw.intersection(&visited_bw).copied().collect()
}

// step a search frontier one hop outward, stopping at members of `to`;
// `visited` persists across calls so repeated hops sweep the graph once
fn one_hop<N>(
    graph: &DiGraph<N, ()>,
    from: &BTreeSet<NodeIndex>,
    to: &BTreeSet<NodeIndex>,
    forward: bool,
    visited: &mut BTreeSet<NodeIndex>,
) -> BTreeSet<NodeIndex> {
    let direction = if forward {
        Direction::Outgoing
    } else {
        Direction::Incoming
    };

    let mut result = BTreeSet::new();
    let mut worklist: VecDeque<NodeIndex> = VecDeque::new();
    for &n in from {
        worklist.extend(graph.neighbors_directed(n, direction));
    }
    while let Some(n) = worklist.pop_front() {
        if !visited.insert(n) {
            continue;
        }
        if to.contains(&n) {
            result.insert(n);
            continue;
        }
        worklist.extend(graph.neighbors_directed(n, direction));
    }

    result
}

/// The exact optimizer for one procedure: a private copy of the graph plus
/// the machinery to find triangles against a candidate assignment.
pub struct ExactOptimizer<N> {
    graph: DiGraph<N, ()>,
    index_of: BTreeMap<N, NodeIndex>,
    cost: Vec<f64>,
    entry: NodeIndex,
    use_heuristics: bool,
}

impl<N> ExactOptimizer<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(source: &CoverageGraph<N>, use_heuristics: bool) -> Self {
        let mut graph: DiGraph<N, ()> = DiGraph::new();
        let mut index_of: BTreeMap<N, NodeIndex> = BTreeMap::new();
        for node in source.node_ids() {
            let index = graph.add_node(node);
            index_of.insert(node, index);
        }
        let cost: Vec<f64> = graph
            .node_indices()
            .map(|index| source.cost(graph[index]))
            .collect();
        for node in source.node_ids() {
            for &target in source.successors(node) {
                graph.add_edge(index_of[&node], index_of[&target], ());
            }
        }
        let entry = index_of[&source.entry()];

        ExactOptimizer {
            graph,
            index_of,
            cost,
            entry,
            use_heuristics,
        }
    }

    fn to_indices(&self, blocks: &BTreeSet<N>, set_name: &str) -> BTreeSet<NodeIndex> {
        blocks
            .iter()
            .map(|b| match self.index_of.get(b) {
                Some(&index) => index,
                None => panic!(
                    "exact optimizer got {set_name} block {b}, which is not in the \
                     optimization graph"
                ),
            })
            .collect()
    }

    fn fill_alphas_betas(
        &self,
        s: &[f64],
        x: &BTreeSet<NodeIndex>,
    ) -> (BTreeSet<NodeIndex>, BTreeSet<NodeIndex>) {
        let mut alphas = BTreeSet::new();
        let mut betas = BTreeSet::new();
        for index in self.graph.node_indices() {
            if s[index.index()] > 0.0 {
                alphas.insert(index);
                betas.insert(index);
            }
        }
        alphas.insert(self.entry);
        betas.extend(x.iter().copied());
        (alphas, betas)
    }

    // the cheapest (least-instrumented) triangle for one (alpha, beta, d)
    // triple, or none if every witness path is blocked
    #[allow(clippy::too_many_arguments)]
    fn triangles_for_pair(
        &self,
        alpha: NodeIndex,
        beta: NodeIndex,
        d: NodeIndex,
        x: &BTreeSet<NodeIndex>,
        s: &[f64],
        y1_cache: &mut BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
        y2_cache: &mut BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
    ) -> BTreeSet<Triangle> {
        debug_assert!(alpha != d && beta != d);
        let nodes_in_graph = self.graph.node_count() as f64;

        let mut x_minus_d = x.clone();
        x_minus_d.remove(&d);

        let y1 = y1_cache
            .entry(alpha)
            .or_insert_with(|| {
                connected_excluding(
                    &self.graph,
                    &BTreeSet::from([self.entry]),
                    &BTreeSet::from([alpha]),
                    &BTreeSet::from([d]),
                )
            })
            .clone();
        let y2 = y2_cache
            .entry(beta)
            .or_insert_with(|| {
                connected_excluding(&self.graph, &BTreeSet::from([beta]), &x_minus_d, &BTreeSet::from([d]))
            })
            .clone();

        debug_assert!(!y1.contains(&d) && !y2.contains(&d));
        if y1.is_empty() || y2.is_empty() {
            return BTreeSet::new();
        }

        let y: BTreeSet<NodeIndex> = y1.union(&y2).copied().collect();

        // instrumented blocks make an edge expensive, blocks already observed
        // on the way in or out (the Y set) are free; the alpha->beta leg must
        // additionally shun d itself
        let arc_weight = |target: NodeIndex| -> f64 {
            if y.contains(&target) {
                0.0
            } else {
                s[target.index()] * nodes_in_graph + 0.1
            }
        };
        let no_d_weight = |target: NodeIndex| -> f64 {
            if target == d {
                nodes_in_graph
            } else {
                arc_weight(target)
            }
        };

        let alpha_d = astar(
            &self.graph,
            alpha,
            |finish| finish == d,
            |e| arc_weight(e.target()),
            |_| 0.0,
        );
        let d_beta = astar(
            &self.graph,
            d,
            |finish| finish == beta,
            |e| arc_weight(e.target()),
            |_| 0.0,
        );
        let alpha_beta = astar(
            &self.graph,
            alpha,
            |finish| finish == beta,
            |e| no_d_weight(e.target()),
            |_| 0.0,
        );

        let (Some((w1, p1)), Some((w2, p2)), Some((w3, p3))) = (alpha_d, d_beta, alpha_beta)
        else {
            return BTreeSet::new();
        };

        let mut result = BTreeSet::new();
        // a node sitting on two legs is paid for twice; counting it once
        // would turn three independent shortest-path queries into something
        // much harder
        let path_weight = w1 + w2 + w3;
        if path_weight < nodes_in_graph {
            result.insert(Triangle::new(
                path_weight,
                p1[1..].to_vec(),
                p2[1..].to_vec(),
                p3[1..].to_vec(),
                &y,
                self.use_heuristics,
            ));
        }
        result
    }

    // triangles for a set of candidate alphas and betas around one d,
    // stopping after `max_triangles` finds (0 means unbounded)
    #[allow(clippy::too_many_arguments)]
    fn triangles_for_d(
        &self,
        alphas: &BTreeSet<NodeIndex>,
        betas: &BTreeSet<NodeIndex>,
        d: NodeIndex,
        x: &BTreeSet<NodeIndex>,
        s: &[f64],
        max_triangles: usize,
        y1_cache: &mut BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
        y2_cache: &mut BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
    ) -> BTreeSet<Triangle> {
        let max_triangles = if max_triangles == 0 {
            usize::MAX
        } else {
            max_triangles
        };

        let mut result = BTreeSet::new();
        'pairs: for &alpha in alphas {
            if alpha == d {
                continue;
            }
            for &beta in betas {
                if beta == d {
                    continue;
                }
                let found =
                    self.triangles_for_pair(alpha, beta, d, x, s, y1_cache, y2_cache);
                if !found.is_empty() {
                    debug!(
                        "found a triangle: ({}, {}, {})",
                        self.graph[alpha], self.graph[beta], self.graph[d]
                    );
                    result.extend(found);
                    if result.len() >= max_triangles {
                        break 'pairs;
                    }
                }
            }
        }
        result
    }

    /// Collect *some* of the ambiguous triangles left by the assignment `s`.
    /// With `max_distance` and `start_distance` both zero, an empty result
    /// means `s` admits no triangle at all; any non-zero cap turns this into
    /// a partial search whose empty result proves nothing.
    pub(crate) fn triangles(
        &self,
        s: &[f64],
        desired: &BTreeSet<NodeIndex>,
        x: &BTreeSet<NodeIndex>,
        max_distance: usize,
        start_distance: usize,
        max_triangles: usize,
        max_per_distance: usize,
    ) -> BTreeSet<Triangle> {
        let (alphas, betas) = self.fill_alphas_betas(s, x);

        let max_distance = if max_distance == 0 {
            usize::MAX
        } else {
            max_distance
        };
        let max_triangles = if max_triangles == 0 {
            usize::MAX
        } else {
            max_triangles
        };
        let max_per_distance = if max_per_distance == 0 {
            usize::MAX
        } else {
            max_per_distance
        };

        let mut result = BTreeSet::new();

        // iterate over the desired blocks first: that filters the alphas and
        // betas worth pairing, and lets the search grow one hop at a time in
        // both directions, with overall cost bounded like a plain BFS
        for &d in desired {
            if s[d.index()] >= 1.0 {
                continue;
            }

            let mut triangles_for_d = 0usize;
            let mut y1_cache: BTreeMap<NodeIndex, BTreeSet<NodeIndex>> = BTreeMap::new();
            let mut y2_cache: BTreeMap<NodeIndex, BTreeSet<NodeIndex>> = BTreeMap::new();

            let mut my_alphas: BTreeSet<NodeIndex> = BTreeSet::new();
            let mut alpha_frontier = BTreeSet::from([d]);
            let mut alpha_visited = BTreeSet::from([d]);
            let mut my_betas: BTreeSet<NodeIndex> = BTreeSet::new();
            let mut beta_frontier = BTreeSet::from([d]);
            let mut beta_visited = BTreeSet::from([d]);

            let mut distance = 0usize;
            while distance < max_distance
                && (!alpha_frontier.is_empty() || !beta_frontier.is_empty())
            {
                alpha_frontier =
                    one_hop(&self.graph, &alpha_frontier, &alphas, false, &mut alpha_visited);
                if distance + 1 >= start_distance {
                    let max_to_find =
                        max_per_distance.min(max_triangles - triangles_for_d);
                    let found = self.triangles_for_d(
                        &alpha_frontier,
                        &my_betas,
                        d,
                        x,
                        s,
                        max_to_find,
                        &mut y1_cache,
                        &mut y2_cache,
                    );
                    if !found.is_empty() {
                        triangles_for_d += found.len();
                        result.extend(found);
                        if triangles_for_d >= max_triangles {
                            break;
                        }
                    }
                }
                my_alphas.extend(alpha_frontier.iter().copied());

                beta_frontier =
                    one_hop(&self.graph, &beta_frontier, &betas, true, &mut beta_visited);
                if distance + 1 >= start_distance {
                    let max_to_find =
                        max_per_distance.min(max_triangles - triangles_for_d);
                    let found = self.triangles_for_d(
                        &my_alphas,
                        &beta_frontier,
                        d,
                        x,
                        s,
                        max_to_find,
                        &mut y1_cache,
                        &mut y2_cache,
                    );
                    if !found.is_empty() {
                        triangles_for_d += found.len();
                        result.extend(found);
                        if triangles_for_d >= max_triangles {
                            break;
                        }
                    }
                }
                my_betas.extend(beta_frontier.iter().copied());

                distance += 1;
            }
        }

        result
    }

    // the deepest frontier any desired block needs before its alphas and
    // betas are exhausted; only used for diagnostics
    fn max_distance(
        &self,
        s: &[f64],
        desired: &BTreeSet<NodeIndex>,
        x: &BTreeSet<NodeIndex>,
    ) -> usize {
        let (alphas, betas) = self.fill_alphas_betas(s, x);
        let mut max_depth = 0usize;

        for &d in desired {
            if s[d.index()] >= 1.0 {
                continue;
            }

            let mut alpha_frontier = BTreeSet::from([d]);
            let mut alpha_visited = BTreeSet::from([d]);
            let mut beta_frontier = BTreeSet::from([d]);
            let mut beta_visited = BTreeSet::from([d]);
            let mut steps = 0usize;
            while !alpha_frontier.is_empty() || !beta_frontier.is_empty() {
                alpha_frontier =
                    one_hop(&self.graph, &alpha_frontier, &alphas, false, &mut alpha_visited);
                beta_frontier =
                    one_hop(&self.graph, &beta_frontier, &betas, true, &mut beta_visited);
                steps += 1;
            }
            max_depth = max_depth.max(steps.saturating_sub(1));
        }

        max_depth
    }

    // turn triangles into "at least one probe here" constraints over the
    // model variables; an empty intersection with the instrumentable set
    // means no well-formed CFG produced this instance
    fn add_constraints(
        &self,
        triangles: &BTreeSet<Triangle>,
        var_of: &HashMap<NodeIndex, usize>,
        constraints: &mut Vec<BTreeSet<usize>>,
    ) {
        for triangle in triangles {
            let vars: BTreeSet<usize> = triangle
                .symmetric_difference()
                .iter()
                .filter_map(|index| var_of.get(index).copied())
                .collect();
            if vars.is_empty() {
                panic!(
                    "coverage problem is infeasible: a triangle admits no instrumentable \
                     block; add more probing candidates"
                );
            }
            constraints.push(vars);
        }
    }

    /// Compute the guaranteed minimum-cost coverage set of `want_data` drawn
    /// from `can_probe`. Either returns a verified optimum or aborts; no
    /// partial results.
    pub fn optimize(
        &self,
        can_probe: &BTreeSet<N>,
        want_data: &BTreeSet<N>,
        crash_points: &BTreeSet<N>,
        log_stats: bool,
    ) -> BTreeSet<N> {
        let i_set = self.to_indices(can_probe, "can-instrument");
        let d_set = self.to_indices(want_data, "desired");
        let x_set = self.to_indices(crash_points, "exit/crash");

        // seed with the triangles visible under no instrumentation: one per
        // desired block per distance
        let no_probes = vec![0.0; self.graph.node_count()];
        let triangle_start = Instant::now();
        let initial_triangles = self.triangles(&no_probes, &d_set, &x_set, 0, 0, 0, 1);
        let mut triangle_time = triangle_start.elapsed();
        debug!(
            "{} initial triangles in {:.3}s",
            initial_triangles.len(),
            triangle_time.as_secs_f64()
        );

        // one binary variable per instrumentable block
        let variables: Vec<NodeIndex> = i_set.iter().copied().collect();
        let var_of: HashMap<NodeIndex, usize> = variables
            .iter()
            .enumerate()
            .map(|(var, &index)| (index, var))
            .collect();
        let costs: Vec<f64> = variables
            .iter()
            .map(|&index| self.cost[index.index()])
            .collect();

        let mut constraints: Vec<BTreeSet<usize>> = Vec::new();
        self.add_constraints(&initial_triangles, &var_of, &mut constraints);

        if log_stats {
            debug!(
                "exact optimization: {} nodes, {} arcs, {} initial triangles, caps: {} \
                 iterations, depths {}..={} by {}",
                self.graph.node_count(),
                self.graph.edge_count(),
                initial_triangles.len(),
                MAX_ITERATIONS,
                INITIAL_MAX_DEPTH,
                FINAL_MAX_DEPTH,
                MAX_DEPTH_INCREMENT,
            );
        }

        let mut solver = BranchBound;
        let mut assignment: Vec<bool> = vec![false; variables.len()];
        let mut optimal = false;
        let mut iteration = 0usize;
        let mut total_solve_time = std::time::Duration::ZERO;
        let mut total_triangle_time = triangle_time;

        while !optimal && iteration < MAX_ITERATIONS {
            let solve_start = Instant::now();
            assignment = match solver.solve(&costs, &constraints) {
                Ok(assignment) => assignment,
                Err(err) => panic!("exact coverage model failed to solve: {err}"),
            };
            let solve_time = solve_start.elapsed();
            total_solve_time += solve_time;

            let objective: f64 = assignment
                .iter()
                .enumerate()
                .filter(|(_, &on)| on)
                .map(|(var, _)| costs[var])
                .sum();

            let mut w = vec![0.0; self.graph.node_count()];
            for (var, &index) in variables.iter().enumerate() {
                if assignment[var] {
                    w[index.index()] = 1.0;
                }
            }

            if log_stats && iteration == 0 {
                debug!(
                    "max triangle search depth: {}",
                    self.max_distance(&w, &d_set, &x_set)
                );
            }

            // look close to each desired block first, widening one hop at a
            // time; only fall back to the unbounded search when nothing turns
            // up nearby
            let triangle_start = Instant::now();
            let mut found = BTreeSet::new();
            let mut depth = INITIAL_MAX_DEPTH;
            while depth <= FINAL_MAX_DEPTH {
                found = self.triangles(&w, &d_set, &x_set, depth, depth, 0, 7);
                if !found.is_empty() {
                    break;
                }
                depth += MAX_DEPTH_INCREMENT;
            }
            if found.is_empty() {
                depth = 0;
                found = self.triangles(&w, &d_set, &x_set, 0, 0, 0, 1);
            }
            triangle_time = triangle_start.elapsed();
            total_triangle_time += triangle_time;

            if found.is_empty() {
                optimal = true;
            } else {
                self.add_constraints(&found, &var_of, &mut constraints);
            }

            if log_stats {
                debug!(
                    "iteration {}: objective {:.4}, {} new triangles at depth {}, solve \
                     {:.3}s, triangles {:.3}s",
                    iteration,
                    objective,
                    found.len(),
                    depth,
                    solve_time.as_secs_f64(),
                    triangle_time.as_secs_f64(),
                );
            }
            iteration += 1;
        }

        if !optimal {
            panic!("exact optimization failed to converge within {MAX_ITERATIONS} iterations");
        }

        let result: BTreeSet<N> = variables
            .iter()
            .enumerate()
            .filter(|(var, _)| assignment[*var])
            .map(|(_, &index)| self.graph[index])
            .collect();

        if log_stats {
            debug!(
                "optimal coverage set: {} probes, cost {:.4}, solve {:.3}s, triangles {:.3}s",
                result.len(),
                result.iter().map(|&b| self.cost[self.index_of[&b].index()]).sum::<f64>(),
                total_solve_time.as_secs_f64(),
                total_triangle_time.as_secs_f64(),
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::fixtures::{chain, diamond_bypass, single_loop};
    use crate::coverage::local::locally_optimal;
    use crate::coverage::oracle::is_coverage_set;

    #[test]
    fn empty_desired_selects_nothing() {
        let graph = diamond_bypass();
        let optimizer = ExactOptimizer::new(&graph, true);
        let result = optimizer.optimize(
            &graph.all_nodes(),
            &BTreeSet::new(),
            &graph.crash_points(),
            false,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn straight_line_selects_nothing() {
        let graph = chain();
        let optimizer = ExactOptimizer::new(&graph, true);
        let result = optimizer.optimize(
            &graph.all_nodes(),
            &BTreeSet::from([1, 2]),
            &graph.crash_points(),
            false,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn loop_selects_nothing() {
        let graph = single_loop();
        let optimizer = ExactOptimizer::new(&graph, true);
        let result = optimizer.optimize(
            &graph.all_nodes(),
            &BTreeSet::from([1]),
            &graph.crash_points(),
            false,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn bypassed_join_takes_more_than_one_round() {
        // the first constraint alone lets the model pick the cheap branch
        // arm; only the second round's triangle forces the join
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();
        let optimizer = ExactOptimizer::new(&graph, true);

        let result = optimizer.optimize(&graph.all_nodes(), &desired, &crash, false);
        assert_eq!(result, BTreeSet::from([3]));
        assert!(is_coverage_set(&graph, &result, &desired, 0, &crash));
    }

    #[test]
    fn exact_never_loses_to_greedy() {
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();

        let exact = ExactOptimizer::new(&graph, true)
            .optimize(&graph.all_nodes(), &desired, &crash, false);
        let greedy = locally_optimal(&graph, &graph.all_nodes(), &desired, &crash);

        assert!(graph.cost_of_set(&exact) <= graph.cost_of_set(&greedy));
        // here the gap is real: greedy keeps both branch arms
        assert!(graph.cost_of_set(&exact) < graph.cost_of_set(&greedy));
    }

    #[test]
    fn heuristic_free_search_agrees() {
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();

        let trimmed = ExactOptimizer::new(&graph, true)
            .optimize(&graph.all_nodes(), &desired, &crash, false);
        let untrimmed = ExactOptimizer::new(&graph, false)
            .optimize(&graph.all_nodes(), &desired, &crash, false);

        assert_eq!(
            graph.cost_of_set(&trimmed),
            graph.cost_of_set(&untrimmed)
        );
    }

    #[test]
    fn trim_to_common_squeezes_shared_tails() {
        let n: Vec<NodeIndex> = (0..6).map(NodeIndex::new).collect();

        // d->beta leg [3, 4, 5] and alpha->beta leg [2, 4, 5] rejoin at 4:
        // everything from the meet-up point onward is spurious
        let mut d_beta = vec![n[3], n[4], n[5]];
        let mut alpha_beta = vec![n[2], n[4], n[5]];
        trim_to_common(&mut d_beta, &mut alpha_beta, false);
        assert_eq!(d_beta, vec![n[3]]);
        assert_eq!(alpha_beta, vec![n[2]]);

        // front-trimming drops shared prefixes instead
        let mut alpha_d = vec![n[1], n[2], n[3]];
        let mut alpha_beta = vec![n[1], n[5]];
        trim_to_common(&mut alpha_d, &mut alpha_beta, true);
        assert_eq!(alpha_d, vec![n[2], n[3]]);
        assert_eq!(alpha_beta, vec![n[5]]);
    }
}
