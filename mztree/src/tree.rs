use std::cmp::Ordering;

use context_error::{BoxedError, Context, CreateError};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::{ColoredGraph, TreeError};

/// A single vertex of a [`FragmentationTree`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TreeNode<F> {
    /// The index of the fragment in the graph
    pub fragment: usize,
    /// The formula of the fragment
    pub formula: F,
    /// The color of the fragment, `None` for the root
    pub color: Option<usize>,
    /// The index of the parent node in the tree, `None` for the root
    pub parent: Option<usize>,
    /// The index of the loss in the graph connecting the parent to this node, `None` for the root
    pub loss: Option<usize>,
    /// The weight of the incoming loss, 0 for the root
    pub loss_weight: f64,
}

/// A fragmentation tree, a colorful subtree of a [`ColoredGraph`] rooted in the graph root.
///
/// The nodes are stored with parents before their children, the root is the first node.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FragmentationTree<F> {
    nodes: Vec<TreeNode<F>>,
    score: f64,
    root_score: f64,
    bonus: f64,
    exact: bool,
}

impl<F: Clone> FragmentationTree<F> {
    /// Create the tree from the selected losses of a graph. The losses have to form an arborescence
    /// from the root of the graph, this is not checked here, see [`Self::validate`].
    pub(crate) fn from_losses(graph: &ColoredGraph<F>, losses: &[usize], exact: bool) -> Self {
        let mut position = vec![0; graph.number_of_fragments()];
        for (index, fragment) in graph.topological_order().iter().enumerate() {
            position[*fragment] = index;
        }
        let ordered = losses
            .iter()
            .copied()
            .sorted_by_key(|loss| position[graph.loss(*loss).target()]);

        let mut node_of = vec![None; graph.number_of_fragments()];
        node_of[graph.root()] = Some(0);
        let mut nodes = vec![TreeNode {
            fragment: graph.root(),
            formula: graph.root_formula().clone(),
            color: None,
            parent: None,
            loss: None,
            loss_weight: 0.0,
        }];
        let mut score = graph.root_score();
        for index in ordered {
            let loss = graph.loss(index);
            node_of[loss.target()] = Some(nodes.len());
            score += loss.weight();
            nodes.push(TreeNode {
                fragment: loss.target(),
                formula: graph.fragment(loss.target()).formula().clone(),
                color: graph.fragment(loss.target()).color(),
                parent: node_of[loss.source()],
                loss: Some(index),
                loss_weight: loss.weight(),
            });
        }
        Self {
            nodes,
            score,
            root_score: graph.root_score(),
            bonus: 0.0,
            exact,
        }
    }
}

impl<F> FragmentationTree<F> {
    /// The score of the tree: the root score plus the weights of all losses
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// The intrinsic score of the root formula as part of [`Self::score`]
    pub const fn root_score(&self) -> f64 {
        self.root_score
    }

    /// An additional score added after the tree computation (isotope pattern, recalibration)
    pub const fn bonus(&self) -> f64 {
        self.bonus
    }

    /// Add to the bonus score, this does not change [`Self::score`]
    pub fn add_bonus(&mut self, bonus: f64) {
        self.bonus += bonus;
    }

    /// The score including the bonus
    pub fn total_score(&self) -> f64 {
        self.score + self.bonus
    }

    /// If this tree was computed by the exact solver, `false` if it came from the heuristic
    pub const fn is_exact(&self) -> bool {
        self.exact
    }

    /// The root node
    pub fn root(&self) -> &TreeNode<F> {
        &self.nodes[0]
    }

    /// The formula of the root
    pub fn root_formula(&self) -> &F {
        &self.nodes[0].formula
    }

    /// All nodes, parents always come before their children
    pub fn nodes(&self) -> &[TreeNode<F>] {
        &self.nodes
    }

    /// The number of vertices including the root
    pub fn number_of_vertices(&self) -> usize {
        self.nodes.len()
    }

    /// The graph indices of all fragments in this tree, including the root
    pub fn fragment_indices(&self) -> impl ExactSizeIterator<Item = usize> {
        self.nodes.iter().map(|n| n.fragment)
    }

    /// The graph indices of all losses in this tree
    pub fn loss_indices(&self) -> impl Iterator<Item = usize> {
        self.nodes.iter().filter_map(|n| n.loss)
    }

    /// Check if the given fragment is part of this tree
    pub fn contains_fragment(&self, fragment: usize) -> bool {
        self.nodes.iter().any(|n| n.fragment == fragment)
    }

    /// The children of the given node
    pub fn children(&self, node: usize) -> impl Iterator<Item = usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == Some(node))
            .map(|(index, _)| index)
    }

    /// Compare the scores of two trees, a higher score is greater
    pub fn cmp_score(&self, other: &Self) -> Ordering {
        OrderedFloat(self.score).cmp(&OrderedFloat(other.score))
    }

    /// Check that this is a colorful subtree of the given graph with a correct score.
    /// # Errors
    /// A [`TreeError::InvalidTree`] describing the first violated invariant.
    pub fn validate(&self, graph: &ColoredGraph<F>) -> Result<(), BoxedError<'static, TreeError>> {
        let invalid = |message: String| {
            Err(BoxedError::new(
                TreeError::InvalidTree,
                "Invalid fragmentation tree",
                message,
                Context::none(),
            ))
        };
        if self.nodes.first().map(|n| n.fragment) != Some(graph.root()) {
            return invalid("The tree is not rooted in the graph root".to_string());
        }
        let mut colors = vec![false; graph.color_count()];
        let mut seen = vec![false; graph.number_of_fragments()];
        let mut score = graph.root_score();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.fragment >= graph.number_of_fragments() || seen[node.fragment] {
                return invalid(format!(
                    "Node {index} has a duplicate or non existing fragment {}",
                    node.fragment
                ));
            }
            seen[node.fragment] = true;
            if index == 0 {
                continue;
            }
            let Some(color) = graph.fragment(node.fragment).color() else {
                return invalid(format!("Node {index} is a second root"));
            };
            match colors.get_mut(color) {
                None => return invalid(format!("Node {index} has a non existing color {color}")),
                Some(true) => return invalid(format!("Color {color} is used twice")),
                Some(used) => *used = true,
            }
            let (Some(parent), Some(loss)) = (node.parent, node.loss) else {
                return invalid(format!("Node {index} has no parent"));
            };
            if parent >= index || loss >= graph.number_of_losses() {
                return invalid(format!("Node {index} has an invalid parent or loss"));
            }
            let loss = graph.loss(loss);
            if loss.source() != self.nodes[parent].fragment || loss.target() != node.fragment {
                return invalid(format!(
                    "Node {index} is connected with a loss that does not connect it to its parent"
                ));
            }
            score += loss.weight();
        }
        if (score - self.score).abs() > 1e-9 * score.abs().max(1.0) {
            return invalid(format!(
                "The score {} is not the sum of the weights {score}",
                self.score
            ));
        }
        Ok(())
    }
}

impl<F: std::fmt::Display> std::fmt::Display for FragmentationTree<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_node<F: std::fmt::Display>(
            tree: &FragmentationTree<F>,
            node: usize,
            depth: usize,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            let n = &tree.nodes[node];
            if n.parent.is_some() {
                writeln!(f, "{:1$}{2} ({3:+.3})", "", depth * 2, n.formula, n.loss_weight)?;
            }
            for child in tree.children(node) {
                write_node(tree, child, depth + 1, f)?;
            }
            Ok(())
        }
        writeln!(
            f,
            "{} score {:.3}{}",
            self.root_formula(),
            self.score,
            if self.exact { "" } else { " (heuristic)" }
        )?;
        write_node(self, 0, 0, f)
    }
}

/// Join the root formulas of a list of trees, used in log messages
pub(crate) fn root_list<F: std::fmt::Debug>(trees: &[FragmentationTree<F>]) -> String {
    trees.iter().map(|t| format!("{:?}", t.root_formula())).join(", ")
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use super::FragmentationTree;
    use crate::{ColoredGraph, HeuristicSolver, SolverSettings};

    #[test]
    fn build_and_validate() {
        let mut builder = ColoredGraph::builder("M", 2).root_score(0.5);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let ra = builder.add_loss(0, a, 10.0, "x");
        let ab = builder.add_loss(a, b, 5.0, "y");
        let graph = builder.build().unwrap();
        let mut tree = FragmentationTree::from_losses(&graph, &[ab, ra], true);
        assert!(tree.validate(&graph).is_ok());
        assert!((tree.score() - 15.5).abs() < 1e-12);
        assert_eq!(tree.number_of_vertices(), 3);
        assert_eq!(tree.nodes()[2].parent, Some(1));
        assert!(tree.contains_fragment(b));
        tree.add_bonus(2.0);
        assert!((tree.total_score() - 17.5).abs() < 1e-12);
        assert!((tree.score() - 15.5).abs() < 1e-12);
        assert_eq!(tree.to_string(), "M score 15.500\n  A (+10.000)\n    B (+5.000)\n");
    }

    #[test]
    fn detect_broken_tree() {
        let mut builder = ColoredGraph::builder("M", 1);
        let a = builder.add_fragment("A", 0);
        let c = builder.add_fragment("C", 0);
        let ra = builder.add_loss(0, a, 1.0, "x");
        let rc = builder.add_loss(0, c, 1.0, "y");
        let graph = builder.build().unwrap();
        let tree = FragmentationTree::from_losses(&graph, &[ra, rc], true);
        assert!(tree.validate(&graph).is_err());
    }

    #[test]
    fn validate_beyond_color_set_width() {
        let colors = 100;
        let mut builder = ColoredGraph::builder("M", colors);
        let mut previous = 0;
        for color in 0..colors {
            let fragment = builder.add_fragment("X", color);
            builder.add_loss(previous, fragment, 1.0, "");
            previous = fragment;
        }
        let graph = builder.build().unwrap();
        let tree = HeuristicSolver::new(&graph, &SolverSettings::default())
            .solve()
            .unwrap();
        assert_eq!(tree.number_of_vertices(), 101);
        assert!(tree.validate(&graph).is_ok());

        // Skipping a fragment reuses no color but still breaks the chain
        let losses: Vec<usize> = (0..colors).filter(|l| *l != 50).collect();
        let broken = FragmentationTree::from_losses(&graph, &losses, false);
        assert!(broken.validate(&graph).is_err());
    }
}
