//! The narrow boundary to an integer-program solver.
//!
//! The cutting-plane loop only ever needs one model shape: binary variables
//! with non-negative costs, constraints of the form "at least one of these
//! variables is selected", and a minimized total cost. Any backend that can
//! answer that is usable; the built-in one is a small exact branch-and-bound
//! over the hitting-set formulation.

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("integer program is infeasible: a constraint admits no selectable variable")]
    Infeasible,
}

/// A minimum-cost covering solver: given per-variable costs and "pick at
/// least one of these" constraints, return an optimal 0/1 assignment.
pub trait CoverSolver {
    fn solve(
        &mut self,
        costs: &[f64],
        constraints: &[BTreeSet<usize>],
    ) -> Result<Vec<bool>, SolverError>;
}

/// Exact branch-and-bound backend. Branches over the variables of the first
/// uncovered constraint, cheapest variable first, pruning against the best
/// solution found so far.
#[derive(Debug, Default)]
pub struct BranchBound;

impl CoverSolver for BranchBound {
    fn solve(
        &mut self,
        costs: &[f64],
        constraints: &[BTreeSet<usize>],
    ) -> Result<Vec<bool>, SolverError> {
        for constraint in constraints {
            if constraint.is_empty() {
                return Err(SolverError::Infeasible);
            }
            for &var in constraint {
                if var >= costs.len() {
                    panic!("constraint names variable {var}, but only {} exist", costs.len());
                }
            }
        }

        let mut best: Option<(f64, Vec<bool>)> = None;
        let mut chosen = vec![false; costs.len()];
        Self::branch(costs, constraints, &mut chosen, 0.0, &mut best);

        match best {
            Some((_, selection)) => Ok(selection),
            // unreachable once every constraint is non-empty
            None => Err(SolverError::Infeasible),
        }
    }
}

impl BranchBound {
    fn first_uncovered<'c>(
        constraints: &'c [BTreeSet<usize>],
        chosen: &[bool],
    ) -> Option<&'c BTreeSet<usize>> {
        constraints
            .iter()
            .find(|c| !c.iter().any(|&var| chosen[var]))
    }

    // each uncovered constraint needs at least its cheapest variable, but
    // constraints may share variables, so only the single largest such
    // minimum is a sound addition to the bound
    fn lower_bound(costs: &[f64], constraints: &[BTreeSet<usize>], chosen: &[bool]) -> f64 {
        constraints
            .iter()
            .filter(|c| !c.iter().any(|&var| chosen[var]))
            .map(|c| {
                c.iter()
                    .map(|&var| costs[var])
                    .fold(f64::INFINITY, f64::min)
            })
            .fold(0.0, f64::max)
    }

    fn branch(
        costs: &[f64],
        constraints: &[BTreeSet<usize>],
        chosen: &mut Vec<bool>,
        cost_so_far: f64,
        best: &mut Option<(f64, Vec<bool>)>,
    ) {
        if let Some((best_cost, _)) = best {
            if cost_so_far + Self::lower_bound(costs, constraints, chosen) >= *best_cost {
                return;
            }
        }

        let constraint = match Self::first_uncovered(constraints, chosen) {
            Some(c) => c,
            None => {
                // everything covered
                let better = match best {
                    Some((best_cost, _)) => cost_so_far < *best_cost,
                    None => true,
                };
                if better {
                    *best = Some((cost_so_far, chosen.clone()));
                }
                return;
            }
        };

        let mut vars: Vec<usize> = constraint.iter().copied().collect();
        vars.sort_by(|a, b| costs[*a].total_cmp(&costs[*b]).then(a.cmp(b)));
        for var in vars {
            chosen[var] = true;
            Self::branch(costs, constraints, chosen, cost_so_far + costs[var], best);
            chosen[var] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(vars: &[usize]) -> BTreeSet<usize> {
        vars.iter().copied().collect()
    }

    fn cost_of(costs: &[f64], selection: &[bool]) -> f64 {
        selection
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(var, _)| costs[var])
            .sum()
    }

    #[test]
    fn no_constraints_selects_nothing() {
        let selection = BranchBound.solve(&[1.0, 2.0], &[]).unwrap();
        assert_eq!(selection, vec![false, false]);
    }

    #[test]
    fn shared_variable_beats_two_cheap_ones() {
        // {0,1} and {1,2}: variable 1 covers both for 2.0, cheaper than 0+2
        let costs = [1.5, 2.0, 1.5];
        let constraints = [constraint(&[0, 1]), constraint(&[1, 2])];
        let selection = BranchBound.solve(&costs, &constraints).unwrap();
        assert_eq!(selection, vec![false, true, false]);
    }

    #[test]
    fn disjoint_constraints_all_get_a_pick() {
        let costs = [3.0, 1.0, 5.0, 2.0];
        let constraints = [constraint(&[0, 1]), constraint(&[2, 3])];
        let selection = BranchBound.solve(&costs, &constraints).unwrap();
        assert_eq!(selection, vec![false, true, false, true]);
        assert_eq!(cost_of(&costs, &selection), 3.0);
    }

    #[test]
    fn singleton_constraints_are_forced() {
        let costs = [10.0, 0.5];
        let constraints = [constraint(&[0]), constraint(&[1])];
        let selection = BranchBound.solve(&costs, &constraints).unwrap();
        assert_eq!(selection, vec![true, true]);
    }

    #[test]
    fn empty_constraint_is_infeasible() {
        let result = BranchBound.solve(&[1.0], &[constraint(&[])]);
        assert_eq!(result, Err(SolverError::Infeasible));
    }

    #[test]
    fn optimum_is_found_despite_greedy_traps() {
        // the cheapest variable of the first constraint leaves the second
        // uncovered; paying more for the shared variable wins overall
        let costs = [0.4, 1.0];
        let constraints = [
            constraint(&[0, 1]),
            constraint(&[1]),
        ];
        let selection = BranchBound.solve(&costs, &constraints).unwrap();
        assert_eq!(selection, vec![false, true]);
    }
}
