//! Fuzz target for the ranked tree enumeration
use std::collections::HashSet;

use afl::*;
use mztree::{SolverSettings, TreeIterator};

mod common;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Some(graph) = common::graph(data) {
            let mut seen = HashSet::new();
            let mut last = f64::INFINITY;
            for tree in TreeIterator::new([&graph], SolverSettings::default()).take(64) {
                tree.validate(&graph).unwrap();
                assert!(tree.score() <= last + 1e-9);
                last = tree.score();
                let mut fragments: Vec<usize> = tree.fragment_indices().collect();
                fragments.sort_unstable();
                assert!(seen.insert(fragments), "Duplicate fragment set");
            }
        }
    });
}
