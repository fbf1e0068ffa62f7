#![doc = include_str!("../README.md")]

mod batch;
mod color_set;
mod error;
mod exact;
mod graph;
mod heuristic;
mod iterator;
mod settings;
mod top_k;
mod tree;

pub use batch::*;
pub use color_set::*;
pub use error::*;
pub use exact::ExactSolver;
pub use graph::*;
pub use heuristic::*;
pub use iterator::*;
pub use settings::*;
pub use top_k::*;
pub use tree::{FragmentationTree, TreeNode};

/// The types needed for most uses of this crate
pub mod prelude {
    pub use crate::{
        BatchSearch, ColoredGraph, ColoredGraphBuilder, FragmentationTree, GraphBuilder,
        SolverSettings, TreeError, TreeIterator,
    };
}
