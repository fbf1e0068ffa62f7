use std::fmt::Debug;

use context_error::BoxedError;
#[cfg(feature = "rayon")]
use itertools::Itertools;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    ColoredGraph, FragmentationTree, SolverSettings, TreeError, TreeIterator, tree::root_list,
};

/// Builds the fragmentation graph for a candidate root formula. Weighting the losses is the job
/// of the implementor, the solvers only see the resulting graph.
///
/// This is implemented for all closures `Fn(&F) -> Result<ColoredGraph<F>, BoxedError<..>>`.
pub trait GraphBuilder<F> {
    /// Build the graph for the given root.
    /// # Errors
    /// If no graph can be made for this root, the root is then skipped.
    fn build(&self, root: &F) -> Result<ColoredGraph<F>, BoxedError<'static, TreeError>>;
}

impl<F, T> GraphBuilder<F> for T
where
    T: Fn(&F) -> Result<ColoredGraph<F>, BoxedError<'static, TreeError>>,
{
    fn build(&self, root: &F) -> Result<ColoredGraph<F>, BoxedError<'static, TreeError>> {
        self(root)
    }
}

/// Find the best trees over a set of candidate root formulas.
///
/// ```
/// use mztree::{BatchSearch, ColoredGraph, SolverSettings};
///
/// let build = |root: &&'static str| {
///     let mut builder = ColoredGraph::builder(*root, 1).root_score(root.len() as f64);
///     let a = builder.add_fragment("C", 0);
///     builder.add_loss(0, a, 1.0, "H");
///     builder.build()
/// };
/// let trees = BatchSearch::new(["CH", "CH4O"], SolverSettings::default())
///     .trees(2)
///     .run(&build);
/// assert_eq!(trees[0].root_formula(), &"CH4O");
/// assert_eq!(trees[1].root_formula(), &"CH4O");
/// ```
#[derive(Clone, Debug)]
pub struct BatchSearch<F> {
    candidates: Vec<F>,
    settings: SolverSettings,
    trees: usize,
    lower_bound: f64,
    only_with: Option<Vec<F>>,
    without: Vec<F>,
}

impl<F: Clone + Debug + PartialEq> BatchSearch<F> {
    /// Search over the given candidates, by default only the single best tree is returned
    pub fn new(candidates: impl IntoIterator<Item = F>, settings: SolverSettings) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
            settings,
            trees: 1,
            lower_bound: f64::NEG_INFINITY,
            only_with: None,
            without: Vec::new(),
        }
    }

    /// Set the number of trees to return
    #[must_use]
    pub const fn trees(mut self, k: usize) -> Self {
        self.trees = k;
        self
    }

    /// Only return trees with at least this score
    #[must_use]
    pub const fn lower_bound(mut self, lower_bound: f64) -> Self {
        self.lower_bound = lower_bound;
        self
    }

    /// Skip the given roots
    #[must_use]
    pub fn without(mut self, formulas: impl IntoIterator<Item = F>) -> Self {
        self.without.extend(formulas);
        self
    }

    /// Only search the given roots
    #[must_use]
    pub fn only_with(mut self, formulas: impl IntoIterator<Item = F>) -> Self {
        self.only_with = Some(formulas.into_iter().collect());
        self
    }

    /// The candidates that pass the root filters, in the given order. A repeated candidate is
    /// only kept at its first position.
    fn selected(&self) -> Vec<&F> {
        let mut selected: Vec<&F> = Vec::with_capacity(self.candidates.len());
        for root in &self.candidates {
            if self.only_with.as_ref().is_none_or(|only| only.contains(root))
                && !self.without.contains(root)
                && !selected.contains(&root)
            {
                selected.push(root);
            }
        }
        selected
    }

    fn build_graph(
        &self,
        builder: &impl GraphBuilder<F>,
        root: &F,
    ) -> Option<ColoredGraph<F>> {
        match builder.build(root) {
            Ok(graph) => Some(graph),
            Err(error) => {
                warn!(?root, ?error, "could not build the graph for a candidate root");
                None
            }
        }
    }

    /// Compute the best trees over all candidates. All graphs are built first, after which a
    /// single [`TreeIterator`] shares the lower bound over all candidates.
    pub fn run(&self, builder: &impl GraphBuilder<F>) -> Vec<FragmentationTree<F>> {
        let graphs: Vec<ColoredGraph<F>> = self
            .selected()
            .into_iter()
            .filter_map(|root| self.build_graph(builder, root))
            .collect();
        debug!(
            candidates = self.candidates.len(),
            graphs = graphs.len(),
            "start batch search"
        );
        let trees = TreeIterator::new(&graphs, self.settings)
            .with_lower_bound(self.lower_bound)
            .top(self.trees);
        debug!(roots = %root_list(&trees), "batch search finished");
        trees
    }
}

#[cfg(feature = "rayon")]
impl<F: Clone + Debug + PartialEq + Send + Sync> BatchSearch<F> {
    /// Compute the best trees over all candidates in parallel. Every candidate is built and
    /// searched on its own, the results are merged afterwards: highest score first, then the
    /// candidate order, then the rank within the candidate.
    pub fn par_run(&self, builder: &(impl GraphBuilder<F> + Sync)) -> Vec<FragmentationTree<F>> {
        let per_candidate: Vec<Vec<FragmentationTree<F>>> = self
            .selected()
            .par_iter()
            .map(|root| {
                self.build_graph(builder, root).map_or_else(Vec::new, |graph| {
                    let trees = TreeIterator::new([&graph], self.settings)
                        .with_lower_bound(self.lower_bound)
                        .top(self.trees);
                    if trees.is_empty() {
                        debug!(?root, "no tree for candidate root");
                    }
                    trees
                })
            })
            .collect();
        let trees: Vec<_> = per_candidate
            .into_iter()
            .enumerate()
            .flat_map(|(candidate, trees)| {
                trees
                    .into_iter()
                    .enumerate()
                    .map(move |(rank, tree)| (candidate, rank, tree))
            })
            .sorted_by(|a, b| {
                b.2.cmp_score(&a.2)
                    .then(a.0.cmp(&b.0))
                    .then(a.1.cmp(&b.1))
            })
            .take(self.trees)
            .map(|(_, _, tree)| tree)
            .collect();
        debug!(roots = %root_list(&trees), "parallel batch search finished");
        trees
    }
}

/// Get the single best tree over all candidate roots
pub fn optimal_tree<F: Clone + Debug + PartialEq>(
    candidates: impl IntoIterator<Item = F>,
    builder: &impl GraphBuilder<F>,
    settings: SolverSettings,
) -> Option<FragmentationTree<F>> {
    BatchSearch::new(candidates, settings)
        .trees(1)
        .run(builder)
        .into_iter()
        .next()
}
