//! Locally-optimal probe selection: start from everything instrumentable and
//! greedily drop the most expensive block the oracle will let go of.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use log::debug;

use super::graph::CoverageGraph;
use super::oracle::{is_coverage_set, is_coverage_set_close};

/// Compute a locally-minimal coverage set of `want_data` drawn from
/// `can_probe`. One descending-cost pass; each removal is kept only if the
/// cheap close check and then the exact oracle both still accept the set.
/// The result is *a* local optimum, not the global one.
pub fn locally_optimal<N>(
    graph: &CoverageGraph<N>,
    can_probe: &BTreeSet<N>,
    want_data: &BTreeSet<N>,
    crash_points: &BTreeSet<N>,
) -> BTreeSet<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    if want_data.is_empty() {
        return BTreeSet::new();
    }
    let entry = graph.entry();

    let mut s = can_probe.clone();
    let try_remove = graph.sort_by_cost(can_probe);
    for (count, &block) in try_remove.iter().enumerate() {
        s.remove(&block);
        debug!(
            "{} / {}: trying to remove {}",
            count + 1,
            try_remove.len(),
            block
        );
        if !is_coverage_set_close(graph, &s, want_data, entry, crash_points) {
            debug!("'{}' refuted close", block);
            s.insert(block);
            continue;
        }
        if !is_coverage_set(graph, &s, want_data, entry, crash_points) {
            debug!("'{}' refuted far", block);
            s.insert(block);
        } else {
            debug!("removed '{}'", block);
        }
    }

    s
}
