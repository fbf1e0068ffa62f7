use serde::{Deserialize, Serialize};

use crate::ColorSet;

/// The settings for the tree computation.
///
/// The exact solver needs memory and time exponential in the number of colors. Set
/// `max_exact_colors` based on the available memory, graphs with more colors are solved with the
/// heuristic instead.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// The maximal number of colors in a graph to still use the exact solver. It can never be
    /// higher than [`ColorSet::CAPACITY`]. The time of an exact solve grows exponentially with
    /// the number of colors and ranked enumeration runs a solve for every undecided fragment of
    /// each returned tree, so raise this only when few trees are needed.
    ///
    /// Default: 12.
    pub max_exact_colors: usize,
    /// Remove any subtree from a heuristic tree that does not improve its score.
    ///
    /// Default: true.
    pub prune_heuristic: bool,
}

impl SolverSettings {
    /// Settings that always use the heuristic solver
    pub const fn heuristic_only() -> Self {
        Self {
            max_exact_colors: 0,
            prune_heuristic: true,
        }
    }

    /// The effective bound on the number of colors for the exact solver
    pub fn exact_capacity(&self) -> usize {
        self.max_exact_colors.min(ColorSet::CAPACITY)
    }
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_exact_colors: 12,
            prune_heuristic: true,
        }
    }
}
