//! Coverage-probe optimization over a procedure's weighted CFG.
//!
//! Three strategies share one correctness oracle: a dominator-tree
//! approximation (fast, not locally optimal), a greedy locally-optimal pass,
//! and an exact cutting-plane optimizer. The driver picks one based on the
//! requested level and can re-validate whatever comes back.

pub mod domtree;
#[cfg(feature = "exact")]
pub mod exact;
pub mod graph;
pub mod local;
pub mod oracle;
#[cfg(feature = "exact")]
pub mod solver;

use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use log::{debug, info};

use crate::Error;

pub use self::domtree::DominatorTree;
pub use self::graph::{Block, CoverageGraph, ProbeView, Terminator};

/// How hard to optimize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Level {
    /// No optimization: every instrumentable block gets a probe.
    O0,
    /// Dominator-based approximation only.
    O1,
    /// Locally-minimal approximation (the default).
    #[default]
    O2,
    /// Fully optimal, via the cutting-plane optimizer.
    O3,
}

/// Which approximation `Level::O2` runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApproxStyle {
    /// The dominator approximation alone.
    Dominators,
    /// The basic locally-optimal pass.
    Local,
    /// Dominators as a prepass, then the locally-optimal pass (the default).
    #[default]
    LocalWithPrepass,
}

#[derive(Clone, Debug, Default)]
pub struct OptimizeOptions {
    pub level: Level,
    pub approx_style: ApproxStyle,
    /// Optimize for incomplete executions: the crash set becomes every block
    /// in the CFG instead of just the returning ones.
    pub incomplete_exe: bool,
    /// Re-check the result against the oracle; a mismatch is fatal.
    pub verify_coverage_set: bool,
    /// Re-check that an exact result cannot be improved locally; fatal on
    /// mismatch. Only meaningful at `Level::O3`.
    pub verify_optimality: bool,
    /// Log statistics about the returned set and the solve.
    pub log_stats: bool,
    /// Disable the triangle-trimming heuristics in the exact optimizer.
    pub no_exact_heuristics: bool,
}

/// Per-procedure optimization state, built once from the weighted CFG:
/// the graph itself plus its dominator tree. No hidden process-wide state;
/// every optimization call reads from here and returns a fresh set.
pub struct OptimizationData<N> {
    graph: CoverageGraph<N>,
    tree: DominatorTree<N>,
}

impl<N> OptimizationData<N>
where
    N: Copy + Eq + Hash + Ord + Debug + Display,
{
    pub fn new(graph: CoverageGraph<N>) -> Self {
        let tree = DominatorTree::new(&graph);
        OptimizationData { graph, tree }
    }

    pub fn graph(&self) -> &CoverageGraph<N> {
        &self.graph
    }

    pub fn tree(&self) -> &DominatorTree<N> {
        &self.tree
    }

    /// Get the optimized probe set.
    ///
    /// `can_probe` restricts which blocks may carry a probe and `want_data`
    /// restricts which blocks need to be inferable; both default to the
    /// natural full sets when absent. The crash set is derived from the
    /// graph's returning blocks, or is every block under `incomplete_exe`.
    pub fn optimized_probes(
        &self,
        can_probe: Option<&BTreeSet<N>>,
        want_data: Option<&BTreeSet<N>>,
        options: &OptimizeOptions,
    ) -> Result<BTreeSet<N>, Error> {
        debug!("optimizing graph with entry {}", self.graph.entry());

        let can_probe = match can_probe {
            Some(set) => {
                self.check_nodes(set, "can-instrument")?;
                set.clone()
            }
            None => self.graph.all_nodes(),
        };
        let want_data = match want_data {
            Some(set) => {
                self.check_nodes(set, "desired")?;
                set.clone()
            }
            None => self.graph.default_desired(),
        };
        let crash_points = if options.incomplete_exe {
            self.graph.all_nodes()
        } else {
            self.graph.crash_points()
        };

        let result = match options.level {
            Level::O0 => can_probe.clone(),
            Level::O1 => self
                .tree
                .optimized_probes(&self.graph, &can_probe, &want_data, &crash_points),
            Level::O2 => self.optimized_probes_cheap(
                &can_probe,
                &want_data,
                &crash_points,
                options.approx_style,
            ),
            Level::O3 => {
                self.optimized_probes_full(&can_probe, &want_data, &crash_points, options)?
            }
        };

        if options.log_stats {
            info!(
                "optimized result: {} probes, cost {:.4}",
                result.len(),
                self.graph.cost_of_set(&result)
            );
        }

        if options.verify_coverage_set
            && !oracle::is_coverage_set(
                &self.graph,
                &result,
                &want_data,
                self.graph.entry(),
                &crash_points,
            )
        {
            panic!("optimized result is not a coverage set of the desired blocks");
        }

        Ok(result)
    }

    fn optimized_probes_cheap(
        &self,
        can_probe: &BTreeSet<N>,
        want_data: &BTreeSet<N>,
        crash_points: &BTreeSet<N>,
        style: ApproxStyle,
    ) -> BTreeSet<N> {
        match style {
            ApproxStyle::Dominators => {
                self.tree
                    .optimized_probes(&self.graph, can_probe, want_data, crash_points)
            }
            ApproxStyle::Local => {
                local::locally_optimal(&self.graph, can_probe, want_data, crash_points)
            }
            ApproxStyle::LocalWithPrepass => {
                let seed =
                    self.tree
                        .optimized_probes(&self.graph, can_probe, want_data, crash_points);
                local::locally_optimal(&self.graph, &seed, want_data, crash_points)
            }
        }
    }

    #[cfg(feature = "exact")]
    fn optimized_probes_full(
        &self,
        can_probe: &BTreeSet<N>,
        want_data: &BTreeSet<N>,
        crash_points: &BTreeSet<N>,
        options: &OptimizeOptions,
    ) -> Result<BTreeSet<N>, Error> {
        let optimizer = exact::ExactOptimizer::new(&self.graph, !options.no_exact_heuristics);
        let optimal = optimizer.optimize(can_probe, want_data, crash_points, options.log_stats);

        if options.verify_optimality {
            let seed =
                self.tree
                    .optimized_probes(&self.graph, &optimal, want_data, crash_points);
            let after_local =
                local::locally_optimal(&self.graph, &seed, want_data, crash_points);
            if after_local != optimal {
                panic!(
                    "exact result {:?} is less optimal than a locally-optimal refinement {:?}",
                    optimal, after_local
                );
            }
        }

        Ok(optimal)
    }

    #[cfg(not(feature = "exact"))]
    fn optimized_probes_full(
        &self,
        _can_probe: &BTreeSet<N>,
        _want_data: &BTreeSet<N>,
        _crash_points: &BTreeSet<N>,
        _options: &OptimizeOptions,
    ) -> Result<BTreeSet<N>, Error> {
        Err(Error::UnsupportedLevel("O3"))
    }

    fn check_nodes(&self, set: &BTreeSet<N>, set_name: &'static str) -> Result<(), Error> {
        for node in set {
            if !self.graph.contains(*node) {
                return Err(Error::UnknownNode {
                    set: set_name,
                    node: node.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::graph::{Block, CoverageGraph, Terminator};

    pub fn graph(entry: u64, blocks: &[(u64, u64, &[u64])]) -> CoverageGraph<u64> {
        let blocks = blocks
            .iter()
            .map(|&(id, frequency, successors)| {
                let terminator = if successors.is_empty() {
                    Terminator::Return
                } else {
                    Terminator::Branch
                };
                Block::new(id, frequency, successors.to_vec(), terminator)
            })
            .collect();
        CoverageGraph::new(entry, blocks).unwrap()
    }

    /// `0 -> 1 -> 2 -> 3`, all blocks equally hot.
    pub fn chain() -> CoverageGraph<u64> {
        graph(
            0,
            &[
                (0, 1000, &[1]),
                (1, 1000, &[2]),
                (2, 1000, &[3]),
                (3, 1000, &[]),
            ],
        )
    }

    /// A diamond whose entry can also skip straight to the exit:
    /// `0 -> {1, 2, 4}`, `1 -> 3`, `2 -> 3`, `3 -> 4`. The bypass edge is
    /// what makes the join (block 3) genuinely ambiguous without a probe.
    pub fn diamond_bypass() -> CoverageGraph<u64> {
        graph(
            0,
            &[
                (0, 1000, &[1, 2, 4]),
                (1, 400, &[3]),
                (2, 600, &[3]),
                (3, 900, &[4]),
                (4, 1000, &[]),
            ],
        )
    }

    /// `0 -> 1 -> 2`, `2 -> 1` (back edge), `2 -> 3`.
    pub fn single_loop() -> CoverageGraph<u64> {
        graph(
            0,
            &[
                (0, 1000, &[1]),
                (1, 5000, &[2]),
                (2, 5000, &[1, 3]),
                (3, 1000, &[]),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::diamond_bypass;
    use super::*;

    #[test]
    fn level_zero_probes_everything_instrumentable() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            level: Level::O0,
            ..OptimizeOptions::default()
        };

        let all = data
            .optimized_probes(None, None, &options)
            .unwrap();
        assert_eq!(all, data.graph().all_nodes());

        let restricted = BTreeSet::from([1, 3]);
        let result = data
            .optimized_probes(Some(&restricted), None, &options)
            .unwrap();
        assert_eq!(result, restricted);
    }

    #[test]
    fn dominator_level_is_verified_by_the_oracle() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            level: Level::O1,
            verify_coverage_set: true,
            ..OptimizeOptions::default()
        };

        let desired = BTreeSet::from([3]);
        let result = data
            .optimized_probes(None, Some(&desired), &options)
            .unwrap();
        assert_eq!(result, BTreeSet::from([3]));
    }

    #[test]
    fn default_level_accepts_its_own_result() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            verify_coverage_set: true,
            ..OptimizeOptions::default()
        };

        // the prepass seeds greedy with the dominator result, which already
        // sits at the optimum for this desired block
        let desired = BTreeSet::from([3]);
        let result = data
            .optimized_probes(None, Some(&desired), &options)
            .unwrap();
        assert_eq!(result, BTreeSet::from([3]));
    }

    #[test]
    fn plain_local_style_still_yields_a_coverage_set() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            approx_style: ApproxStyle::Local,
            verify_coverage_set: true,
            ..OptimizeOptions::default()
        };

        let result = data.optimized_probes(None, None, &options).unwrap();
        // local alone cannot discover the join probe, so it keeps both arms
        assert!(data.graph().cost_of_set(&result) >= 1.0);
    }

    #[cfg(feature = "exact")]
    #[test]
    fn exact_level_survives_both_verifications() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            level: Level::O3,
            verify_coverage_set: true,
            verify_optimality: true,
            ..OptimizeOptions::default()
        };

        let desired = BTreeSet::from([3]);
        let result = data
            .optimized_probes(None, Some(&desired), &options)
            .unwrap();
        assert_eq!(result, BTreeSet::from([3]));
    }

    #[test]
    fn unknown_override_nodes_are_a_configuration_error() {
        let data = OptimizationData::new(diamond_bypass());
        let bad = BTreeSet::from([42]);

        let result = data.optimized_probes(Some(&bad), None, &OptimizeOptions::default());
        assert_eq!(
            result.err(),
            Some(Error::UnknownNode {
                set: "can-instrument",
                node: "42".to_string()
            })
        );
    }

    #[test]
    fn incomplete_executions_widen_the_crash_set() {
        let data = OptimizationData::new(diamond_bypass());
        let options = OptimizeOptions {
            incomplete_exe: true,
            verify_coverage_set: true,
            ..OptimizeOptions::default()
        };

        // both branch arms survive: with crashes possible anywhere, their
        // own execution has to be observable directly
        let result = data.optimized_probes(None, None, &options).unwrap();
        assert_eq!(result, BTreeSet::from([1, 2]));
    }
}
