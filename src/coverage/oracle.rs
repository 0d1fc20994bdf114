//! The coverage-set oracle.
//!
//! A probe set `S` is a coverage set of the desired blocks `D` when, for any
//! execution starting at the entry and ending at a crash point, the set of
//! probes that fired pins down whether each desired block ran. The witness of
//! failure is an "ambiguous triangle" `(alpha, beta, d)`: two executions can
//! pass through `alpha` and `beta` with identical probe signatures while only
//! one of them runs `d`.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::{Debug, Display};
use std::hash::Hash;

use log::debug;

use super::graph::CoverageGraph;

/// Determine if `s` is a coverage set of the desired blocks.
pub fn is_coverage_set<N>(
    graph: &CoverageGraph<N>,
    s: &BTreeSet<N>,
    desired: &BTreeSet<N>,
    entry: N,
    crash_points: &BTreeSet<N>,
) -> bool
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut alphas = s.clone();
    alphas.insert(entry);
    let mut betas = s.clone();
    betas.extend(crash_points.iter().copied());

    // iterating over d first narrows the alphas and betas worth pairing up
    for &d in desired {
        if s.contains(&d) {
            continue;
        }

        let before_d = connected_excluding(
            graph,
            &BTreeSet::from([entry]),
            &BTreeSet::from([d]),
            &BTreeSet::new(),
        );
        let this_alphas: BTreeSet<N> = before_d.intersection(&alphas).copied().collect();

        let after_d =
            connected_excluding(graph, &BTreeSet::from([d]), &betas, &BTreeSet::new());
        let this_betas: BTreeSet<N> = after_d.intersection(&betas).copied().collect();

        for &alpha in &this_alphas {
            if alpha == d {
                continue;
            }
            for &beta in &this_betas {
                if beta == d {
                    continue;
                }
                if has_ambiguous_triangle(graph, alpha, beta, d, entry, crash_points, s) {
                    return false;
                }
            }
        }
    }

    true
}

/// Determine if `s` is a coverage set, considering only the closest alphas
/// and betas around each desired block. A result of `true` does *not*
/// necessarily mean that `s` is a coverage set; this is only a cheap
/// pre-filter in front of [`is_coverage_set`].
pub fn is_coverage_set_close<N>(
    graph: &CoverageGraph<N>,
    s: &BTreeSet<N>,
    desired: &BTreeSet<N>,
    entry: N,
    crash_points: &BTreeSet<N>,
) -> bool
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut alphas = s.clone();
    alphas.insert(entry);
    let mut betas = s.clone();
    betas.extend(crash_points.iter().copied());

    for &d in desired {
        if s.contains(&d) {
            continue;
        }

        let first_alphas = first_two_encountered(graph, d, &alphas, false);
        let first_betas = first_two_encountered(graph, d, &betas, true);

        for &alpha in &first_alphas {
            if alpha == d {
                continue;
            }
            for &beta in &first_betas {
                if beta == d {
                    continue;
                }
                if has_ambiguous_triangle(graph, alpha, beta, d, entry, crash_points, s) {
                    return false;
                }
            }
        }
    }

    true
}

// the first two "layers" of to-set members encountered searching out from
// `from`: the nearest ones, plus the nearest ones beyond each of those
fn first_two_encountered<N>(
    graph: &CoverageGraph<N>,
    from: N,
    to: &BTreeSet<N>,
    forward: bool,
) -> BTreeSet<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut result = BTreeSet::new();
    one_hop(graph, from, to, forward, &mut result);
    let mut second_result = result.clone();
    for &found in &result {
        one_hop(graph, found, to, forward, &mut second_result);
    }
    second_result
}

// search forward/backward from `from`, stopping at members of `to`, and
// collect the members reached into `result`
fn one_hop<N>(
    graph: &CoverageGraph<N>,
    from: N,
    to: &BTreeSet<N>,
    forward: bool,
    result: &mut BTreeSet<N>,
) where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut visited = to.clone();

    let mut worklist: VecDeque<N> = VecDeque::new();
    worklist.push_back(from);
    for &step in neighbors(graph, from, forward) {
        worklist.push_back(step);
    }
    while let Some(n) = worklist.pop_front() {
        if to.contains(&n) {
            result.insert(n);
        }
        if !visited.insert(n) {
            continue;
        }

        for &step in neighbors(graph, n, forward) {
            worklist.push_back(step);
        }
    }
}

fn neighbors<N>(graph: &CoverageGraph<N>, node: N, forward: bool) -> &[N]
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    if forward {
        graph.successors(node)
    } else {
        graph.predecessors(node)
    }
}

/// Determine if an ambiguous triangle exists between a particular `alpha`,
/// `beta`, and desired block `d`.
pub fn has_ambiguous_triangle<N>(
    graph: &CoverageGraph<N>,
    alpha: N,
    beta: N,
    d: N,
    entry: N,
    crash_points: &BTreeSet<N>,
    s: &BTreeSet<N>,
) -> bool
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut x_minus_d = crash_points.clone();
    x_minus_d.remove(&d);

    let y1 = connected_excluding(
        graph,
        &BTreeSet::from([entry]),
        &BTreeSet::from([alpha]),
        &BTreeSet::from([d]),
    );
    let y2 = connected_excluding(graph, &BTreeSet::from([beta]), &x_minus_d, &BTreeSet::from([d]));
    if y1.is_empty() || y2.is_empty() {
        return false;
    }

    // we would compute the Y set here, but all we actually need is S\Y
    let mut s_minus_y = s.clone();
    for n in &y1 {
        s_minus_y.remove(n);
    }
    for n in &y2 {
        s_minus_y.remove(n);
    }

    if !is_connected_excluding(graph, &BTreeSet::from([alpha]), &BTreeSet::from([d]), &s_minus_y) {
        return false;
    }
    if !is_connected_excluding(graph, &BTreeSet::from([d]), &BTreeSet::from([beta]), &s_minus_y) {
        return false;
    }

    s_minus_y.insert(d);
    if !is_connected_excluding(
        graph,
        &BTreeSet::from([alpha]),
        &BTreeSet::from([beta]),
        &s_minus_y,
    ) {
        return false;
    }

    debug!("found triangle: ({alpha}, {beta}, {d})");
    true
}

/// Determine if a path exists from a block in `from` to a block in `to`
/// without passing through any block in `excluding`.
pub fn is_connected_excluding<N>(
    graph: &CoverageGraph<N>,
    from: &BTreeSet<N>,
    to: &BTreeSet<N>,
    excluding: &BTreeSet<N>,
) -> bool
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    // overlapping "from" and "to" connect with a zero-length path
    for n in from {
        if to.contains(n) {
            return true;
        }
    }

    let mut visited = from.clone();
    let mut worklist: VecDeque<N> = VecDeque::new();
    for &n in from {
        for &step in graph.successors(n) {
            worklist.push_back(step);
        }
    }
    while let Some(n) = worklist.pop_front() {
        if visited.contains(&n) || excluding.contains(&n) {
            continue;
        }
        if to.contains(&n) {
            return true;
        }
        visited.insert(n);

        for &step in graph.successors(n) {
            worklist.push_back(step);
        }
    }

    false
}

/// All blocks lying on some path from a block in `from` to a block in `to`
/// while avoiding `excluding`: the intersection of a forward search from
/// `from` with a backward search from `to`.
pub fn connected_excluding<N>(
    graph: &CoverageGraph<N>,
    from: &BTreeSet<N>,
    to: &BTreeSet<N>,
    excluding: &BTreeSet<N>,
) -> BTreeSet<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    let mut visited_fw = from.clone();
    let mut visited_bw = to.clone();

    // search forward from "from"
    let mut worklist: VecDeque<N> = VecDeque::new();
    for &n in from {
        for &step in graph.successors(n) {
            worklist.push_back(step);
        }
    }
    while let Some(n) = worklist.pop_front() {
        if visited_fw.contains(&n) || excluding.contains(&n) {
            continue;
        }
        visited_fw.insert(n);

        for &step in graph.successors(n) {
            worklist.push_back(step);
        }
    }

    // search backward from "to"
    for &n in to {
        for &step in graph.predecessors(n) {
            worklist.push_back(step);
        }
    }
    while let Some(n) = worklist.pop_front() {
        if visited_bw.contains(&n) || excluding.contains(&n) {
            continue;
        }
        visited_bw.insert(n);

        for &step in graph.predecessors(n) {
            worklist.push_back(step);
        }
    }

    visited_fw.intersection(&visited_bw).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::fixtures::{chain, diamond_bypass, single_loop};

    #[test]
    fn straight_line_needs_no_probes() {
        // with the endpoint of a run observable, a straight line is never
        // ambiguous
        let graph = chain();
        let desired = BTreeSet::from([1, 2]);
        let crash = graph.crash_points();

        assert!(is_coverage_set(
            &graph,
            &BTreeSet::new(),
            &desired,
            0,
            &crash
        ));
    }

    #[test]
    fn bypassed_join_is_ambiguous() {
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();

        // the direct entry -> exit edge makes block 3's execution unknowable
        assert!(!is_coverage_set(
            &graph,
            &BTreeSet::new(),
            &desired,
            0,
            &crash
        ));
        // the close variant sees the same nearby triangle
        assert!(!is_coverage_set_close(
            &graph,
            &BTreeSet::new(),
            &desired,
            0,
            &crash
        ));
        // probing the join itself resolves it
        assert!(is_coverage_set(
            &graph,
            &BTreeSet::from([3]),
            &desired,
            0,
            &crash
        ));
        // so does probing both branch arms
        assert!(is_coverage_set(
            &graph,
            &BTreeSet::from([1, 2]),
            &desired,
            0,
            &crash
        ));
    }

    #[test]
    fn probes_never_hurt() {
        // adding probes to an accepted set keeps it accepted
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();

        // both branch arms disambiguate the join without probing it
        let mut s = BTreeSet::from([1, 2]);
        assert!(is_coverage_set(&graph, &s, &desired, 0, &crash));

        for extra in [0u64, 4, 3] {
            s.insert(extra);
            assert!(is_coverage_set(&graph, &s, &desired, 0, &crash));
        }
    }

    #[test]
    fn oracle_is_pure() {
        let graph = diamond_bypass();
        let desired = BTreeSet::from([3]);
        let crash = graph.crash_points();
        let s = BTreeSet::from([1, 2]);

        let first = is_coverage_set(&graph, &s, &desired, 0, &crash);
        let second = is_coverage_set(&graph, &s, &desired, 0, &crash);
        assert_eq!(first, second);
    }

    #[test]
    fn back_edges_terminate() {
        // e -> a -> b -> a, b -> exit: the search must not spin on the cycle
        let graph = single_loop();
        let desired = BTreeSet::from([1]);
        let crash = graph.crash_points();

        assert!(is_coverage_set(
            &graph,
            &BTreeSet::new(),
            &desired,
            0,
            &crash
        ));
        assert!(is_coverage_set_close(
            &graph,
            &BTreeSet::new(),
            &desired,
            0,
            &crash
        ));
    }

    #[test]
    fn connected_excluding_respects_the_excluded_set() {
        let graph = diamond_bypass();

        let on_paths = connected_excluding(
            &graph,
            &BTreeSet::from([0]),
            &BTreeSet::from([3]),
            &BTreeSet::new(),
        );
        assert_eq!(on_paths, BTreeSet::from([0, 1, 2, 3]));

        // cutting block 1 leaves the other arm
        assert!(is_connected_excluding(
            &graph,
            &BTreeSet::from([0]),
            &BTreeSet::from([3]),
            &BTreeSet::from([1])
        ));
        // cutting both arms disconnects the join
        assert!(!is_connected_excluding(
            &graph,
            &BTreeSet::from([0]),
            &BTreeSet::from([3]),
            &BTreeSet::from([1, 2])
        ));
    }
}
