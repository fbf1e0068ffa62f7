use std::collections::VecDeque;

use context_error::{BoxedError, Context, CreateError};
use serde::{Deserialize, Serialize};

use crate::TreeError;

/// A single candidate explanation for a peak, or the synthetic root of the graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Fragment<F> {
    formula: F,
    color: Option<usize>,
    incoming: Vec<usize>,
    outgoing: Vec<usize>,
}

impl<F> Fragment<F> {
    /// The formula explaining this fragment
    pub const fn formula(&self) -> &F {
        &self.formula
    }

    /// The color of this fragment, `None` for the root which has an out of band color.
    pub const fn color(&self) -> Option<usize> {
        self.color
    }

    /// Check if this is the root of its graph
    pub const fn is_root(&self) -> bool {
        self.color.is_none()
    }

    /// The indices of all losses ending in this fragment
    pub fn incoming(&self) -> &[usize] {
        &self.incoming
    }

    /// The indices of all losses starting from this fragment
    pub fn outgoing(&self) -> &[usize] {
        &self.outgoing
    }
}

/// A neutral loss, a directed edge from a heavier to a lighter fragment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Loss<F> {
    source: usize,
    target: usize,
    weight: f64,
    formula: F,
}

impl<F> Loss<F> {
    /// The index of the fragment this loss starts at
    pub const fn source(&self) -> usize {
        self.source
    }

    /// The index of the fragment this loss ends at
    pub const fn target(&self) -> usize {
        self.target
    }

    /// The score of this loss as given by the scoring model
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// The formula of the loss, only used for diagnostics
    pub const fn formula(&self) -> &F {
        &self.formula
    }
}

/// A fragmentation graph: a DAG rooted in a single candidate formula for the precursor with all
/// candidate fragment explanations colored by the peak they explain.
///
/// A graph can only be created with a [`ColoredGraphBuilder`], which guarantees that the graph is
/// acyclic, every fragment is reachable from the root, no loss connects two fragments of the same
/// color, and all weights are finite. After building the graph is immutable.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColoredGraph<F> {
    fragments: Vec<Fragment<F>>,
    losses: Vec<Loss<F>>,
    colors: usize,
    by_color: Vec<Vec<usize>>,
    topological_order: Vec<usize>,
    root_score: f64,
}

impl<F> ColoredGraph<F> {
    /// Start building a new graph for the given root formula with the given number of colors (peaks).
    pub const fn builder(root: F, colors: usize) -> ColoredGraphBuilder<F> {
        ColoredGraphBuilder::new(root, colors)
    }

    /// The index of the root fragment
    pub const fn root(&self) -> usize {
        0
    }

    /// The formula of the root of this graph
    pub fn root_formula(&self) -> &F {
        &self.fragments[self.root()].formula
    }

    /// The intrinsic score of the root formula, added to the score of every tree of this graph
    pub const fn root_score(&self) -> f64 {
        self.root_score
    }

    /// The number of colors, the root is not counted
    pub const fn color_count(&self) -> usize {
        self.colors
    }

    /// The indices of all fragments with the given color, empty if the color does not exist
    pub fn fragments_by_color(&self, color: usize) -> &[usize] {
        self.by_color.get(color).map_or(&[], Vec::as_slice)
    }

    /// Get a fragment
    /// # Panics
    /// If the index does not exist
    pub fn fragment(&self, index: usize) -> &Fragment<F> {
        &self.fragments[index]
    }

    /// Get a loss
    /// # Panics
    /// If the index does not exist
    pub fn loss(&self, index: usize) -> &Loss<F> {
        &self.losses[index]
    }

    /// All fragments, indexed by their fragment index
    pub fn fragments(&self) -> &[Fragment<F>] {
        &self.fragments
    }

    /// All losses, indexed by their loss index
    pub fn losses(&self) -> &[Loss<F>] {
        &self.losses
    }

    /// The number of fragments including the root
    pub fn number_of_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// The number of losses
    pub fn number_of_losses(&self) -> usize {
        self.losses.len()
    }

    /// All fragment indices ordered such that every loss points forward, starting with the root
    pub fn topological_order(&self) -> &[usize] {
        &self.topological_order
    }

    /// The outgoing losses of a fragment together with their loss index
    /// # Panics
    /// If the fragment does not exist
    pub fn outgoing(&self, fragment: usize) -> impl ExactSizeIterator<Item = (usize, &Loss<F>)> {
        self.fragments[fragment]
            .outgoing
            .iter()
            .map(|index| (*index, &self.losses[*index]))
    }

    /// The incoming losses of a fragment together with their loss index
    /// # Panics
    /// If the fragment does not exist
    pub fn incoming(&self, fragment: usize) -> impl ExactSizeIterator<Item = (usize, &Loss<F>)> {
        self.fragments[fragment]
            .incoming
            .iter()
            .map(|index| (*index, &self.losses[*index]))
    }
}

/// The definition of a fragment in a [`ColoredGraphBuilder`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FragmentDefinition<F> {
    /// The candidate formula
    pub formula: F,
    /// The color, the index of the peak explained by this fragment
    pub color: usize,
}

/// The definition of a loss in a [`ColoredGraphBuilder`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossDefinition<F> {
    /// The source fragment index (0 is the root)
    pub source: usize,
    /// The target fragment index
    pub target: usize,
    /// The score for this loss
    pub weight: f64,
    /// The formula of the loss
    pub formula: F,
}

/// Collects the fragments and losses of a graph and validates them into a [`ColoredGraph`].
///
/// The root has index 0, every added fragment gets the next index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColoredGraphBuilder<F> {
    root: F,
    colors: usize,
    #[serde(default)]
    root_score: f64,
    #[serde(default)]
    fragments: Vec<FragmentDefinition<F>>,
    #[serde(default)]
    losses: Vec<LossDefinition<F>>,
}

impl<F> ColoredGraphBuilder<F> {
    /// Start a new graph for the given root formula and number of colors
    pub const fn new(root: F, colors: usize) -> Self {
        Self {
            root,
            colors,
            root_score: 0.0,
            fragments: Vec::new(),
            losses: Vec::new(),
        }
    }

    /// Set the root intrinsic score
    #[must_use]
    pub const fn root_score(mut self, score: f64) -> Self {
        self.root_score = score;
        self
    }

    /// The formula of the root
    pub const fn root_formula(&self) -> &F {
        &self.root
    }

    /// Add a fragment and get its index
    pub fn add_fragment(&mut self, formula: F, color: usize) -> usize {
        self.fragments.push(FragmentDefinition { formula, color });
        self.fragments.len()
    }

    /// Add a loss between two fragment indices and get its index
    pub fn add_loss(&mut self, source: usize, target: usize, weight: f64, formula: F) -> usize {
        self.losses.push(LossDefinition {
            source,
            target,
            weight,
            formula,
        });
        self.losses.len() - 1
    }

    /// Validate and build the graph.
    /// # Errors
    /// * [`TreeError::InvalidWeight`] if the root score or any weight is not finite.
    /// * [`TreeError::InconsistentColoring`] if a color is out of range or a loss connects two fragments of the same color.
    /// * [`TreeError::InvalidIndex`] if a loss references a non existing fragment or ends in the root.
    /// * [`TreeError::CyclicGraph`] if the losses contain a directed cycle.
    /// * [`TreeError::UnreachableFragment`] if a fragment cannot be reached from the root.
    pub fn build(self) -> Result<ColoredGraph<F>, BoxedError<'static, TreeError>> {
        if !self.root_score.is_finite() {
            return Err(BoxedError::new(
                TreeError::InvalidWeight,
                "Invalid root score",
                format!("The root score {} is not a finite number", self.root_score),
                Context::none(),
            ));
        }
        let mut fragments = Vec::with_capacity(self.fragments.len() + 1);
        fragments.push(Fragment {
            formula: self.root,
            color: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        });
        let mut by_color = vec![Vec::new(); self.colors];
        for definition in self.fragments {
            if definition.color >= self.colors {
                return Err(BoxedError::new(
                    TreeError::InconsistentColoring,
                    "Invalid fragment color",
                    format!(
                        "Fragment {} has color {} while the graph only has {} colors",
                        fragments.len(),
                        definition.color,
                        self.colors
                    ),
                    Context::none(),
                ));
            }
            by_color[definition.color].push(fragments.len());
            fragments.push(Fragment {
                formula: definition.formula,
                color: Some(definition.color),
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        }

        let mut losses = Vec::with_capacity(self.losses.len());
        for (index, definition) in self.losses.into_iter().enumerate() {
            if definition.source >= fragments.len() || definition.target >= fragments.len() {
                return Err(BoxedError::new(
                    TreeError::InvalidIndex,
                    "Invalid loss",
                    format!(
                        "Loss {index} connects {} to {} but there are only {} fragments",
                        definition.source,
                        definition.target,
                        fragments.len()
                    ),
                    Context::none(),
                ));
            }
            if definition.target == 0 {
                return Err(BoxedError::new(
                    TreeError::InvalidIndex,
                    "Invalid loss",
                    format!("Loss {index} ends in the root, the root cannot have incoming losses"),
                    Context::none(),
                ));
            }
            if !definition.weight.is_finite() {
                return Err(BoxedError::new(
                    TreeError::InvalidWeight,
                    "Invalid loss weight",
                    format!(
                        "Loss {index} has weight {} which is not a finite number",
                        definition.weight
                    ),
                    Context::none(),
                ));
            }
            if definition.source == definition.target {
                return Err(BoxedError::new(
                    TreeError::CyclicGraph,
                    "Invalid loss",
                    format!("Loss {index} starts and ends in fragment {}", definition.source),
                    Context::none(),
                ));
            }
            if fragments[definition.source].color.is_some()
                && fragments[definition.source].color == fragments[definition.target].color
            {
                return Err(BoxedError::new(
                    TreeError::InconsistentColoring,
                    "Invalid loss",
                    format!(
                        "Loss {index} connects fragments {} and {} which share color {}",
                        definition.source,
                        definition.target,
                        fragments[definition.target].color.unwrap_or_default()
                    ),
                    Context::none(),
                ));
            }
            fragments[definition.source].outgoing.push(index);
            fragments[definition.target].incoming.push(index);
            losses.push(Loss {
                source: definition.source,
                target: definition.target,
                weight: definition.weight,
                formula: definition.formula,
            });
        }

        let topological_order = topological_order(&fragments, &losses)?;

        Ok(ColoredGraph {
            fragments,
            losses,
            colors: self.colors,
            by_color,
            topological_order,
            root_score: self.root_score,
        })
    }
}

/// Kahn's algorithm, in index order for fragments that become available at the same time
fn topological_order<F>(
    fragments: &[Fragment<F>],
    losses: &[Loss<F>],
) -> Result<Vec<usize>, BoxedError<'static, TreeError>> {
    let mut in_degree: Vec<usize> = fragments.iter().map(|f| f.incoming.len()).collect();
    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(fragments.len());
    while let Some(fragment) = queue.pop_front() {
        order.push(fragment);
        for loss in &fragments[fragment].outgoing {
            let target = losses[*loss].target;
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                queue.push_back(target);
            }
        }
    }
    if order.len() < fragments.len() {
        return Err(BoxedError::new(
            TreeError::CyclicGraph,
            "Cyclic fragmentation graph",
            format!(
                "{} fragments are part of or behind a directed cycle",
                fragments.len() - order.len()
            ),
            Context::none(),
        ));
    }
    if let Some(unreachable) = fragments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, f)| f.incoming.is_empty())
    {
        return Err(BoxedError::new(
            TreeError::UnreachableFragment,
            "Unreachable fragment",
            format!(
                "Fragment {} has no incoming losses and cannot be reached from the root",
                unreachable.0
            ),
            Context::none(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::FullErrorContent;

    use super::ColoredGraph;
    use crate::TreeError;

    #[test]
    fn build_valid() {
        let mut builder = ColoredGraph::builder("C6H12O6", 2).root_score(1.5);
        let a = builder.add_fragment("C6H10O5", 0);
        let b = builder.add_fragment("C5H10O4", 1);
        builder.add_loss(0, a, 2.0, "H2O");
        builder.add_loss(a, b, 1.0, "CO");
        builder.add_loss(0, b, -1.0, "CH2O2");
        let graph = builder.build().unwrap();
        assert_eq!(graph.color_count(), 2);
        assert_eq!(graph.number_of_fragments(), 3);
        assert_eq!(graph.root_formula(), &"C6H12O6");
        assert_eq!(graph.fragments_by_color(1), &[b]);
        assert!(graph.fragments_by_color(5).is_empty());
        assert_eq!(graph.outgoing(0).len(), 2);
        assert_eq!(graph.incoming(b).count(), 2);
        assert_eq!(graph.topological_order(), &[0, 1, 2]);
        assert!(graph.fragment(0).is_root());
        assert_eq!(graph.loss(1).formula(), &"CO");
    }

    #[test]
    fn topological_order_follows_losses() {
        let mut builder = ColoredGraph::builder("R", 3);
        let a = builder.add_fragment("a", 0);
        let b = builder.add_fragment("b", 1);
        let c = builder.add_fragment("c", 2);
        builder.add_loss(0, c, 1.0, "");
        builder.add_loss(c, b, 1.0, "");
        builder.add_loss(b, a, 1.0, "");
        let graph = builder.build().unwrap();
        assert_eq!(graph.topological_order(), &[0, c, b, a]);
    }

    #[test]
    fn reject_invalid() {
        let mut builder = ColoredGraph::builder("R", 1);
        builder.add_fragment("a", 1);
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::InconsistentColoring
        ));

        let mut builder = ColoredGraph::builder("R", 1);
        let a = builder.add_fragment("a", 0);
        let b = builder.add_fragment("b", 0);
        builder.add_loss(0, a, 1.0, "");
        builder.add_loss(a, b, 1.0, "");
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::InconsistentColoring
        ));

        let mut builder = ColoredGraph::builder("R", 2);
        let a = builder.add_fragment("a", 0);
        let b = builder.add_fragment("b", 1);
        builder.add_loss(0, a, 1.0, "");
        builder.add_loss(a, b, 1.0, "");
        builder.add_loss(b, a, 1.0, "");
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::CyclicGraph
        ));

        let mut builder = ColoredGraph::builder("R", 2);
        let a = builder.add_fragment("a", 0);
        let b = builder.add_fragment("b", 1);
        builder.add_loss(b, a, 1.0, "");
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::UnreachableFragment
        ));

        let mut builder = ColoredGraph::builder("R", 1);
        let a = builder.add_fragment("a", 0);
        builder.add_loss(0, a, f64::NAN, "");
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::InvalidWeight
        ));

        let mut builder = ColoredGraph::builder("R", 1);
        let a = builder.add_fragment("a", 0);
        builder.add_loss(0, a + 1, 1.0, "");
        assert!(matches!(
            builder.build().unwrap_err().get_kind(),
            TreeError::InvalidIndex
        ));
    }

    #[test]
    fn builder_from_json() {
        let builder: super::ColoredGraphBuilder<String> = serde_json::from_str(
            r#"{"root": "C2H6O", "colors": 1, "fragments": [{"formula": "C2H4", "color": 0}],
            "losses": [{"source": 0, "target": 1, "weight": 3.5, "formula": "H2O"}]}"#,
        )
        .unwrap();
        let graph = builder.build().unwrap();
        assert_eq!(graph.number_of_losses(), 1);
        assert!((graph.loss(0).weight() - 3.5).abs() < f64::EPSILON);
        assert!(graph.root_score().abs() < f64::EPSILON);
    }
}
