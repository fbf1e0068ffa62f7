//! Fuzz target comparing the exact and heuristic solvers on arbitrary graphs
use afl::*;
use mztree::{ExactSolver, HeuristicSolver, SolverSettings};

mod common;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Some(graph) = common::graph(data) {
            let settings = SolverSettings::default();
            let exact = ExactSolver::new(&graph, &settings)
                .unwrap()
                .solve();
            let heuristic = HeuristicSolver::new(&graph, &settings).solve();
            match (exact, heuristic) {
                (Some(exact), Some(heuristic)) => {
                    exact.validate(&graph).unwrap();
                    heuristic.validate(&graph).unwrap();
                    assert!(heuristic.score() <= exact.score() + 1e-9);
                }
                (None, None) => (),
                _ => panic!("Only one solver found a tree"),
            }
        }
    });
}
