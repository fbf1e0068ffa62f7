//! The [`TreeError`] which makes it easy for downstream users of the error type to match on the exact error.

use context_error::ErrorKind;

/// The kinds of errors that can arise while building fragmentation graphs or computing trees.
///
/// Only [`TreeError::CapacityExceeded`] is a recoverable runtime condition (the heuristic solver
/// takes over), all others signal a graph that violates the contract of the solvers.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TreeError {
    /// There are more colors in the graph than the exact solver handles
    CapacityExceeded,
    /// Two fragments of the same color are connected, or a color is out of range
    #[default]
    InconsistentColoring,
    /// The graph contains a directed cycle
    CyclicGraph,
    /// A fragment cannot be reached from the root
    UnreachableFragment,
    /// A fragment or loss index does not exist
    InvalidIndex,
    /// A loss weight or root score is not a finite number
    InvalidWeight,
    /// A tree does not satisfy the invariants of a colorful subtree of its graph
    InvalidTree,
}

impl ErrorKind for TreeError {
    type Settings = ();
    fn descriptor(&self) -> &'static str {
        match self {
            Self::CapacityExceeded => "warning",
            _ => "error",
        }
    }
    fn ignored(&self, _settings: Self::Settings) -> bool {
        false
    }
    fn is_error(&self, _settings: Self::Settings) -> bool {
        !matches!(self, Self::CapacityExceeded)
    }
}
