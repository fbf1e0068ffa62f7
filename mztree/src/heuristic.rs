use tracing::trace;

use crate::{ColoredGraph, FragmentationTree, SolverSettings};

/// A fast approximation of the maximum colorful subtree, Prim's algorithm with colors instead
/// of vertices.
///
/// Starting with the losses from the root as frontier it repeatedly commits the heaviest loss
/// in the frontier, removes all frontier losses to the color just used, and adds the losses of
/// the new vertex to colors not yet used. The result is always a valid colorful subtree, but it
/// has no optimality guarantee.
#[derive(Clone, Copy, Debug)]
pub struct HeuristicSolver<'a, F> {
    graph: &'a ColoredGraph<F>,
    prune: bool,
}

impl<'a, F: Clone> HeuristicSolver<'a, F> {
    /// Prepare to solve the given graph
    pub const fn new(graph: &'a ColoredGraph<F>, settings: &SolverSettings) -> Self {
        Self {
            graph,
            prune: settings.prune_heuristic,
        }
    }

    /// Compute a tree. Returns `None` only if the root does not have any outgoing loss.
    pub fn solve(&self) -> Option<FragmentationTree<F>> {
        let graph = self.graph;
        if graph.fragment(graph.root()).outgoing().is_empty() {
            return None;
        }
        let mut frontier: Vec<usize> = graph.fragment(graph.root()).outgoing().to_vec();
        let mut used = vec![false; graph.color_count()];
        let mut selected = Vec::new();

        while let Some(index) = self.heaviest(&frontier) {
            let loss = frontier[index];
            let vertex = graph.loss(loss).target();
            let Some(color) = graph.fragment(vertex).color() else {
                break;
            };
            selected.push(loss);
            used[color] = true;
            frontier.retain(|l| graph.fragment(graph.loss(*l).target()).color() != Some(color));
            frontier.extend(graph.outgoing(vertex).filter_map(|(index, l)| {
                graph
                    .fragment(l.target())
                    .color()
                    .is_some_and(|c| !used[c])
                    .then_some(index)
            }));
        }
        trace!(selected = selected.len(), "heuristic expansion finished");

        if self.prune {
            selected = self.prune(&selected);
        }
        Some(FragmentationTree::from_losses(graph, &selected, false))
    }

    /// The position of the heaviest loss, the first one on ties
    fn heaviest(&self, frontier: &[usize]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, loss) in frontier.iter().enumerate() {
            let weight = self.graph.loss(*loss).weight();
            if best.is_none_or(|(_, w)| weight > w) {
                best = Some((index, weight));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Remove every subtree that does not contribute a positive score. The losses have to be in
    /// the order in which they were committed, parents before children.
    fn prune(&self, selected: &[usize]) -> Vec<usize> {
        let graph = self.graph;
        let mut position_of = vec![None; graph.number_of_fragments()];
        for (position, loss) in selected.iter().enumerate() {
            position_of[graph.loss(*loss).target()] = Some(position);
        }
        let parent = |position: usize| position_of[graph.loss(selected[position]).source()];

        let mut value = vec![0.0; selected.len()];
        for position in (0..selected.len()).rev() {
            value[position] += graph.loss(selected[position]).weight();
            let contribution = value[position];
            if contribution > 0.0
                && let Some(parent) = parent(position)
            {
                value[parent] += contribution;
            }
        }
        let mut keep = vec![false; selected.len()];
        for position in 0..selected.len() {
            let attached = parent(position).is_none_or(|p| keep[p]);
            keep[position] = value[position] > 0.0 && attached;
        }
        selected
            .iter()
            .zip(keep)
            .filter_map(|(loss, keep)| keep.then_some(*loss))
            .collect()
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use super::HeuristicSolver;
    use crate::{ColoredGraph, SolverSettings};

    #[test]
    fn greedy_star() {
        let mut builder = ColoredGraph::builder("M", 2);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 0);
        builder.add_loss(0, a, 10.0, "");
        builder.add_loss(a, b, 5.0, "");
        builder.add_loss(0, c, 8.0, "");
        let graph = builder.build().unwrap();
        let tree = HeuristicSolver::new(&graph, &SolverSettings::default())
            .solve()
            .unwrap();
        tree.validate(&graph).unwrap();
        assert!((tree.score() - 15.0).abs() < 1e-12);
        assert!(tree.contains_fragment(a));
        assert!(tree.contains_fragment(b));
        assert!(!tree.contains_fragment(c));
        assert!(!tree.is_exact());
    }

    #[test]
    fn greedy_is_not_optimal() {
        // Taking the heaviest root loss blocks the better path through the other fragment
        let mut builder = ColoredGraph::builder("M", 2);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 0);
        builder.add_loss(0, a, 10.0, "");
        builder.add_loss(0, c, 8.0, "");
        builder.add_loss(c, b, 7.0, "");
        let graph = builder.build().unwrap();
        let tree = HeuristicSolver::new(&graph, &SolverSettings::default())
            .solve()
            .unwrap();
        tree.validate(&graph).unwrap();
        assert!((tree.score() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn prune_negative_branches() {
        let mut builder = ColoredGraph::builder("M", 3);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 2);
        builder.add_loss(0, a, -1.0, "");
        builder.add_loss(a, b, -2.0, "");
        builder.add_loss(0, c, -0.5, "");
        let graph = builder.build().unwrap();
        let pruned = HeuristicSolver::new(&graph, &SolverSettings::default())
            .solve()
            .unwrap();
        assert_eq!(pruned.number_of_vertices(), 1);
        let full = HeuristicSolver::new(
            &graph,
            &SolverSettings {
                prune_heuristic: false,
                ..SolverSettings::default()
            },
        )
        .solve()
        .unwrap();
        full.validate(&graph).unwrap();
        assert_eq!(full.number_of_vertices(), 4);
        assert!((full.score() + 3.5).abs() < 1e-12);
    }

    #[test]
    fn keep_negative_loss_with_positive_subtree() {
        let mut builder = ColoredGraph::builder("M", 2);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        builder.add_loss(0, a, -1.0, "");
        builder.add_loss(a, b, 4.0, "");
        let graph = builder.build().unwrap();
        let tree = HeuristicSolver::new(&graph, &SolverSettings::default())
            .solve()
            .unwrap();
        assert_eq!(tree.number_of_vertices(), 3);
        assert!((tree.score() - 3.0).abs() < 1e-12);
    }
}
