use std::{collections::BinaryHeap, iter::FusedIterator};

use ordered_float::OrderedFloat;
use tracing::{debug, info, trace, warn};

use crate::{
    ColorSet, ColoredGraph, ExactSolver, FragmentationTree, HeuristicSolver, SolverSettings,
    TopTrees, exact::Constraints,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// No solve has been done yet
    Idle,
    /// The queue holds the best tree of every open part of the solution space
    Ready,
    /// No tree reaches the lower bound, this is final
    Exhausted,
}

/// An open part of the solution space of one graph, together with its optimal tree.
#[derive(Debug)]
struct Pending {
    score: OrderedFloat<f64>,
    graph: usize,
    sequence: usize,
    constraints: Constraints,
    losses: Vec<usize>,
    exact: bool,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    /// Highest score first, then the earliest graph, then the earliest created
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.graph.cmp(&self.graph))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Iterate over the fragmentation trees of one or more graphs (one graph per candidate root
/// formula) in order of decreasing score.
///
/// Within a single graph all trees have a distinct set of fragments. After a tree is returned,
/// the part of the solution space it was the optimum of is split up on the decisions made for
/// every fragment, and the optimum of every new part is computed with the exact solver. Graphs
/// with too many colors for the exact solver only give a single tree from the heuristic solver,
/// in that case [`Self::is_degraded`] is set.
///
/// The lower bound can only be raised. Once no remaining tree reaches the lower bound the
/// iterator is exhausted for good.
///
/// ```
/// use mztree::{ColoredGraph, SolverSettings, TreeIterator};
///
/// let mut builder = ColoredGraph::builder("C8H10N4O2", 2);
/// let a = builder.add_fragment("C7H7N4O2", 0);
/// let b = builder.add_fragment("C6H4N3O2", 1);
/// builder.add_loss(0, a, 2.0, "CH3");
/// builder.add_loss(a, b, 1.0, "CH3N");
/// let graph = builder.build().unwrap();
///
/// let mut trees = TreeIterator::new([&graph], SolverSettings::default());
/// assert_eq!(trees.next().unwrap().score(), 3.0);
/// assert_eq!(trees.next().unwrap().score(), 2.0);
/// ```
#[derive(Debug)]
pub struct TreeIterator<'a, F> {
    graphs: Vec<&'a ColoredGraph<F>>,
    enabled: Vec<bool>,
    settings: SolverSettings,
    queue: BinaryHeap<Pending>,
    lower_bound: f64,
    state: State,
    sequence: usize,
    degraded: bool,
    last_graph: Option<usize>,
}

impl<'a, F: Clone> TreeIterator<'a, F> {
    /// Create an iterator over the trees of all given graphs
    pub fn new(
        graphs: impl IntoIterator<Item = &'a ColoredGraph<F>>,
        settings: SolverSettings,
    ) -> Self {
        let graphs: Vec<_> = graphs.into_iter().collect();
        Self {
            enabled: vec![true; graphs.len()],
            graphs,
            settings,
            queue: BinaryHeap::new(),
            lower_bound: f64::NEG_INFINITY,
            state: State::Idle,
            sequence: 0,
            degraded: false,
            last_graph: None,
        }
    }

    /// Set the initial lower bound, see [`Self::set_lower_bound`]
    #[must_use]
    pub fn with_lower_bound(mut self, lower_bound: f64) -> Self {
        self.set_lower_bound(lower_bound);
        self
    }

    /// Raise the lower bound, no tree with a lower score will be returned anymore. Lowering the
    /// bound is not possible, such a request is ignored.
    pub fn set_lower_bound(&mut self, lower_bound: f64) {
        if lower_bound.is_nan() || lower_bound < self.lower_bound {
            warn!(
                current = self.lower_bound,
                requested = lower_bound,
                "ignored request to lower the lower bound"
            );
        } else if lower_bound > self.lower_bound {
            debug!(lower_bound, "raised lower bound");
            self.lower_bound = lower_bound;
        }
    }

    /// The current lower bound
    pub const fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    /// Check if no trees will be returned anymore
    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    /// Check if any graph had to be solved with the heuristic solver
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The graph of the tree returned last
    pub fn last_graph(&self) -> Option<&'a ColoredGraph<F>> {
        self.last_graph.map(|index| self.graphs[index])
    }

    /// The score of the next tree if there is a next tree
    pub fn peek_score(&mut self) -> Option<f64> {
        self.has_next()
            .then(|| self.queue.peek().map(|p| p.score.0))
            .flatten()
    }

    /// Check if there is a tree left that reaches the lower bound. If not the iterator becomes
    /// exhausted, and will not return trees anymore even if the bound were lowered.
    pub fn has_next(&mut self) -> bool {
        if self.state == State::Idle {
            self.initialise();
        }
        if self.state == State::Exhausted {
            return false;
        }
        while self.queue.peek().is_some_and(|p| !self.enabled[p.graph]) {
            self.queue.pop();
        }
        if self
            .queue
            .peek()
            .is_some_and(|p| p.score.0 >= self.lower_bound)
        {
            true
        } else {
            debug!(lower_bound = self.lower_bound, "tree iterator exhausted");
            self.queue.clear();
            self.state = State::Exhausted;
            false
        }
    }

    /// Get the best tree, the first tree this iterator would return
    pub fn optimal_tree(mut self) -> Option<FragmentationTree<F>> {
        self.next()
    }

    /// Get the best `k` trees. This keeps raising the lower bound to the worst tree kept once
    /// `k` trees are found, so all further work only goes into trees that could still make it.
    pub fn top(mut self, k: usize) -> Vec<FragmentationTree<F>> {
        let mut top = TopTrees::new(k);
        while self.has_next() {
            if top.is_full()
                && self
                    .peek_score()
                    .zip(top.worst_score())
                    .is_none_or(|(next, worst)| next <= worst)
            {
                break;
            }
            let Some(tree) = self.next() else {
                break;
            };
            top.offer(tree);
            if top.is_full()
                && let Some(worst) = top.worst_score()
            {
                self.set_lower_bound(worst);
            }
        }
        top.into_sorted_vec()
    }

    fn initialise(&mut self) {
        self.state = State::Ready;
        for index in 0..self.graphs.len() {
            if !self.enabled[index] {
                continue;
            }
            let graph = self.graphs[index];
            match ExactSolver::new(graph, &self.settings) {
                Ok(solver) => {
                    let constraints = Constraints::default();
                    if let Some(losses) = solver.solve_constrained(&constraints) {
                        self.push(index, constraints, losses, true);
                    }
                }
                Err(_) => {
                    info!(
                        graph = index,
                        colors = graph.color_count(),
                        "too many colors for the exact solver, using the heuristic"
                    );
                    self.degraded = true;
                    if let Some(tree) = HeuristicSolver::new(graph, &self.settings).solve() {
                        self.push(
                            index,
                            Constraints::default(),
                            tree.loss_indices().collect(),
                            false,
                        );
                    }
                }
            }
        }
    }

    /// Queue an optimal tree for a part of the solution space, unless it is below the lower bound
    fn push(&mut self, graph: usize, constraints: Constraints, losses: Vec<usize>, exact: bool) {
        let score = self.graphs[graph].root_score()
            + losses
                .iter()
                .map(|l| self.graphs[graph].loss(*l).weight())
                .sum::<f64>();
        if score < self.lower_bound {
            return;
        }
        self.queue.push(Pending {
            score: OrderedFloat(score),
            graph,
            sequence: self.sequence,
            constraints,
            losses,
            exact,
        });
        self.sequence += 1;
    }

    /// Split the rest of the solution space of the given part on every undecided fragment. For
    /// the i-th undecided fragment the new part keeps the decisions of the tree for all earlier
    /// fragments and makes the opposite decision for this fragment.
    fn branch(&mut self, pending: &Pending) {
        let graph = self.graphs[pending.graph];
        let Ok(solver) = ExactSolver::new(graph, &self.settings) else {
            return;
        };
        let mut in_tree = vec![false; graph.number_of_fragments()];
        for loss in &pending.losses {
            in_tree[graph.loss(*loss).target()] = true;
        }
        let mut decided = vec![false; graph.number_of_fragments()];
        decided[graph.root()] = true;
        for fragment in pending
            .constraints
            .required
            .iter()
            .chain(&pending.constraints.forbidden)
        {
            decided[*fragment] = true;
        }
        let undecided: Vec<usize> = (0..graph.number_of_fragments())
            .filter(|f| !decided[*f] && in_tree[*f])
            .chain((0..graph.number_of_fragments()).filter(|f| !decided[*f] && !in_tree[*f]))
            .collect();

        let mut constraints = pending.constraints.clone();
        let mut required_colors: ColorSet = constraints
            .required
            .iter()
            .filter_map(|f| graph.fragment(*f).color())
            .collect();
        for fragment in undecided {
            let mut child = constraints.clone();
            if in_tree[fragment] {
                child.forbidden.push(fragment);
            } else {
                child.required.push(fragment);
            }
            let conflicting = !in_tree[fragment]
                && graph
                    .fragment(fragment)
                    .color()
                    .is_some_and(|c| required_colors.contains(c));
            if !conflicting && let Some(losses) = solver.solve_constrained(&child) {
                trace!(graph = pending.graph, fragment, "new part of the solution space");
                self.push(pending.graph, child, losses, true);
            }
            if in_tree[fragment] {
                constraints.required.push(fragment);
                if let Some(color) = graph.fragment(fragment).color() {
                    required_colors.insert(color);
                }
            } else {
                constraints.forbidden.push(fragment);
            }
        }
    }
}

impl<F: Clone + PartialEq> TreeIterator<'_, F> {
    /// Only compute trees for graphs with one of the given root formulas
    #[must_use]
    pub fn only_with(mut self, formulas: impl IntoIterator<Item = F>) -> Self {
        let formulas: Vec<F> = formulas.into_iter().collect();
        for (enabled, graph) in self.enabled.iter_mut().zip(&self.graphs) {
            *enabled &= formulas.contains(graph.root_formula());
        }
        self
    }

    /// Do not compute trees for graphs with any of the given root formulas
    #[must_use]
    pub fn without(mut self, formulas: impl IntoIterator<Item = F>) -> Self {
        let formulas: Vec<F> = formulas.into_iter().collect();
        for (enabled, graph) in self.enabled.iter_mut().zip(&self.graphs) {
            *enabled &= !formulas.contains(graph.root_formula());
        }
        self
    }
}

impl<F: Clone> Iterator for TreeIterator<'_, F> {
    type Item = FragmentationTree<F>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let pending = self.queue.pop()?;
        if pending.exact {
            self.branch(&pending);
        }
        self.last_graph = Some(pending.graph);
        Some(FragmentationTree::from_losses(
            self.graphs[pending.graph],
            &pending.losses,
            pending.exact,
        ))
    }
}

impl<F: Clone> FusedIterator for TreeIterator<'_, F> {}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::TreeIterator;
    use crate::{ColoredGraph, SolverSettings};

    /// Two colors with two candidates each, all directly connected to the root
    fn two_by_two(root: &'static str, offset: f64) -> ColoredGraph<&'static str> {
        let mut builder = ColoredGraph::builder(root, 2).root_score(offset);
        let a1 = builder.add_fragment("a1", 0);
        let a2 = builder.add_fragment("a2", 0);
        let b1 = builder.add_fragment("b1", 1);
        let b2 = builder.add_fragment("b2", 1);
        builder.add_loss(0, a1, 5.0, "");
        builder.add_loss(0, a2, 3.0, "");
        builder.add_loss(0, b1, 4.0, "");
        builder.add_loss(0, b2, 1.0, "");
        builder.build().unwrap()
    }

    #[test]
    fn ranked_distinct_trees() {
        let graph = two_by_two("M", 0.0);
        let trees: Vec<_> = TreeIterator::new([&graph], SolverSettings::default()).collect();
        // Every colorful subset of {a1, a2} x {b1, b2}, including the empty one
        assert_eq!(trees.len(), 9);
        let scores: Vec<f64> = trees.iter().map(|t| t.score()).collect();
        assert_eq!(scores, vec![9.0, 7.0, 6.0, 5.0, 4.0, 4.0, 3.0, 1.0, 0.0]);
        for tree in &trees {
            tree.validate(&graph).unwrap();
        }
        let mut sets: Vec<Vec<usize>> = trees
            .iter()
            .map(|t| {
                let mut f: Vec<usize> = t.fragment_indices().collect();
                f.sort_unstable();
                f
            })
            .collect();
        sets.sort();
        sets.dedup();
        assert_eq!(sets.len(), 9);
    }

    #[test]
    fn top_two_color_combinations() {
        let graph = two_by_two("M", 0.0);
        let trees = TreeIterator::new([&graph], SolverSettings::default()).top(2);
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].score(), 9.0);
        assert_eq!(trees[1].score(), 7.0);
        assert!(trees[0].contains_fragment(1) && trees[0].contains_fragment(3));
        assert!(trees[1].contains_fragment(2) && trees[1].contains_fragment(3));
    }

    #[test]
    fn lower_bound_exhausts() {
        let graph = two_by_two("M", 0.0);
        let mut iterator = TreeIterator::new([&graph], SolverSettings::default()).with_lower_bound(6.0);
        assert_eq!(iterator.by_ref().count(), 3);
        assert!(iterator.is_exhausted());
        iterator.set_lower_bound(7.0);
        assert!(!iterator.has_next());
        iterator.set_lower_bound(0.0);
        assert_eq!(iterator.lower_bound(), 7.0);
        assert!(!iterator.has_next());
    }

    #[test]
    fn raise_bound_during_iteration() {
        let graph = two_by_two("M", 0.0);
        let mut iterator = TreeIterator::new([&graph], SolverSettings::default());
        assert_eq!(iterator.next().unwrap().score(), 9.0);
        iterator.set_lower_bound(100.0);
        assert!(iterator.next().is_none());
        assert!(iterator.is_exhausted());
    }

    #[test]
    fn multiple_roots() {
        let first = two_by_two("X", 0.0);
        let second = two_by_two("Y", 2.0);
        let mut iterator = TreeIterator::new([&first, &second], SolverSettings::default());
        let best = iterator.next().unwrap();
        assert_eq!(best.root_formula(), &"Y");
        assert_eq!(best.score(), 11.0);
        assert_eq!(iterator.last_graph().map(ColoredGraph::root_formula), Some(&"Y"));
        // Equal scores resolve to the first graph
        let tie = iterator.next().unwrap();
        assert_eq!(tie.score(), 9.0);
        assert_eq!(tie.root_formula(), &"X");
        let tie = iterator.next().unwrap();
        assert_eq!(tie.score(), 9.0);
        assert_eq!(tie.root_formula(), &"Y");

        let only: Vec<_> = TreeIterator::new([&first, &second], SolverSettings::default())
            .only_with(["X"])
            .collect();
        assert_eq!(only.len(), 9);
        assert!(only.iter().all(|t| t.root_formula() == &"X"));

        let best = TreeIterator::new([&first, &second], SolverSettings::default())
            .without(["Y"])
            .optimal_tree()
            .unwrap();
        assert_eq!(best.root_formula(), &"X");

        assert!(
            TreeIterator::new([&first, &second], SolverSettings::default())
                .without(["X", "Y"])
                .next()
                .is_none()
        );
    }

    #[test]
    fn heuristic_fallback() {
        let graph = two_by_two("M", 0.0);
        let mut iterator = TreeIterator::new([&graph], SolverSettings::heuristic_only());
        let tree = iterator.next().unwrap();
        assert!(!tree.is_exact());
        assert_eq!(tree.score(), 9.0);
        assert!(iterator.is_degraded());
        assert!(iterator.next().is_none());
    }

    #[test]
    fn empty_graph_gives_nothing() {
        let graph = ColoredGraph::builder("M", 3).build().unwrap();
        let mut iterator = TreeIterator::new([&graph], SolverSettings::default());
        assert!(iterator.next().is_none());
        assert!(iterator.is_exhausted());
    }
}
