use std::collections::{BTreeMap, btree_map::Entry};

use context_error::{BoxedError, Context, CreateError};
use tracing::trace;

use crate::{ColorSet, ColoredGraph, FragmentationTree, SolverSettings, TreeError};

/// Restrictions on the trees considered by a solve, used to partition the solution space when
/// enumerating multiple trees.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Constraints {
    /// Fragments that have to be part of the tree
    pub(crate) required: Vec<usize>,
    /// Fragments that cannot be part of the tree
    pub(crate) forbidden: Vec<usize>,
}

/// The best partial tree below a vertex that uses exactly a certain set of colors (including the
/// color of the vertex itself).
#[derive(Clone, Copy, Debug)]
struct TraceItem {
    weight: f64,
    required: usize,
    origin: Origin,
}

#[derive(Clone, Copy, Debug)]
enum Origin {
    /// Only the vertex itself
    Leaf,
    /// The partial tree for `rest` combined with the extension stored under `extension`
    Merge {
        rest: ColorSet,
        extension: ColorSet,
    },
}

/// The best partial tree hanging from a vertex through one of its outgoing losses, keyed on the
/// colors of the child subtree plus the color of the vertex.
#[derive(Clone, Copy, Debug)]
struct Extension {
    weight: f64,
    required: usize,
    loss: usize,
    child: ColorSet,
}

/// Required fragments are counted first so a partial tree with more of them always wins, the
/// weight only decides between equal counts. Ties keep the earlier entry.
fn improves(required: usize, weight: f64, existing: (usize, f64)) -> bool {
    required > existing.0 || required == existing.0 && weight > existing.1
}

/// Solve the maximum colorful subtree problem exactly with a color-coding dynamic program.
///
/// For every vertex (children before parents) a table maps every set of colors to the best
/// subtree rooted in that vertex that uses exactly those colors. A vertex starts with only itself
/// (weight 0), so a branch is only ever added when it improves the score. Single child branches
/// are then merged in as long as their color sets do not overlap. The optimum is the best entry
/// of the root table.
#[derive(Clone, Copy, Debug)]
pub struct ExactSolver<'a, F> {
    graph: &'a ColoredGraph<F>,
}

impl<'a, F: Clone> ExactSolver<'a, F> {
    /// Prepare to solve the given graph.
    /// # Errors
    /// A [`TreeError::CapacityExceeded`] if the graph has more colors than allowed by the settings.
    pub fn new(
        graph: &'a ColoredGraph<F>,
        settings: &SolverSettings,
    ) -> Result<Self, BoxedError<'static, TreeError>> {
        if graph.color_count() > settings.exact_capacity() {
            Err(BoxedError::new(
                TreeError::CapacityExceeded,
                "Too many colors for the exact solver",
                format!(
                    "The graph has {} colors while the exact solver is limited to {}",
                    graph.color_count(),
                    settings.exact_capacity()
                ),
                Context::none(),
            ))
        } else {
            Ok(Self { graph })
        }
    }

    /// Compute the optimal tree. Returns `None` only if the root does not have any outgoing loss.
    pub fn solve(&self) -> Option<FragmentationTree<F>> {
        self.solve_constrained(&Constraints::default())
            .map(|losses| FragmentationTree::from_losses(self.graph, &losses, true))
    }

    /// Compute the optimal tree that contains all required and none of the forbidden fragments,
    /// returns the selected losses. Returns `None` if no such tree exists, or if the root does not
    /// have any outgoing loss.
    pub(crate) fn solve_constrained(&self, constraints: &Constraints) -> Option<Vec<usize>> {
        let graph = self.graph;
        if graph.fragment(graph.root()).outgoing().is_empty() {
            return None;
        }
        let mut required = vec![false; graph.number_of_fragments()];
        let mut forbidden = vec![false; graph.number_of_fragments()];
        for fragment in &constraints.required {
            required[*fragment] = true;
        }
        for fragment in &constraints.forbidden {
            forbidden[*fragment] = true;
        }
        if forbidden[graph.root()] || required.iter().zip(&forbidden).any(|(r, f)| *r && *f) {
            return None;
        }
        let required_count = required.iter().filter(|r| **r).count();
        let universe = ColorSet::first(graph.color_count());

        let mut tables: Vec<BTreeMap<ColorSet, TraceItem>> =
            vec![BTreeMap::new(); graph.number_of_fragments()];
        let mut extensions: Vec<BTreeMap<ColorSet, Extension>> =
            vec![BTreeMap::new(); graph.number_of_fragments()];

        for &vertex in graph.topological_order().iter().rev() {
            if forbidden[vertex] {
                continue;
            }
            let own = ColorSet::from_color(graph.fragment(vertex).color());

            let mut extension_table: BTreeMap<ColorSet, Extension> = BTreeMap::new();
            for (loss_index, loss) in graph.outgoing(vertex) {
                for (colors, item) in &tables[loss.target()] {
                    if !colors.is_disjoint(own) {
                        continue;
                    }
                    let candidate = Extension {
                        weight: item.weight + loss.weight(),
                        required: item.required,
                        loss: loss_index,
                        child: *colors,
                    };
                    match extension_table.entry(colors.union(own)) {
                        Entry::Vacant(entry) => {
                            entry.insert(candidate);
                        }
                        Entry::Occupied(mut entry) => {
                            if improves(
                                candidate.required,
                                candidate.weight,
                                (entry.get().required, entry.get().weight),
                            ) {
                                entry.insert(candidate);
                            }
                        }
                    }
                }
            }

            let mut table = BTreeMap::new();
            table.insert(
                own,
                TraceItem {
                    weight: 0.0,
                    required: usize::from(required[vertex]),
                    origin: Origin::Leaf,
                },
            );
            for (extension_colors, extension) in &extension_table {
                // A compatible entry holds the own color and none of the other extension colors,
                // so it is never written by this same extension
                let free = universe.difference(*extension_colors);
                let compatible: Vec<(ColorSet, TraceItem)> = if u32::try_from(free.len())
                    .ok()
                    .and_then(|bits| 1_usize.checked_shl(bits))
                    .is_some_and(|subsets| subsets < table.len())
                {
                    free.subsets()
                        .filter_map(|colors| table.get_key_value(&colors.union(own)))
                        .map(|(k, v)| (*k, *v))
                        .collect()
                } else {
                    table
                        .iter()
                        .filter(|(rest, _)| rest.intersection(*extension_colors) == own)
                        .map(|(k, v)| (*k, *v))
                        .collect()
                };
                for (rest, item) in compatible {
                    let candidate = TraceItem {
                        weight: item.weight + extension.weight,
                        required: item.required + extension.required,
                        origin: Origin::Merge {
                            rest,
                            extension: *extension_colors,
                        },
                    };
                    match table.entry(rest.union(*extension_colors)) {
                        Entry::Vacant(entry) => {
                            entry.insert(candidate);
                        }
                        Entry::Occupied(mut entry) => {
                            if improves(
                                candidate.required,
                                candidate.weight,
                                (entry.get().required, entry.get().weight),
                            ) {
                                entry.insert(candidate);
                            }
                        }
                    }
                }
            }
            tables[vertex] = table;
            extensions[vertex] = extension_table;
        }

        let (best_colors, best) = tables[graph.root()].iter().fold(
            None::<(ColorSet, TraceItem)>,
            |best, (colors, item)| match best {
                Some((_, b)) if !improves(item.required, item.weight, (b.required, b.weight)) => {
                    best
                }
                _ => Some((*colors, *item)),
            },
        )?;
        trace!(
            states = tables.iter().map(BTreeMap::len).sum::<usize>(),
            colors = best_colors.len(),
            weight = best.weight,
            "exact solve finished"
        );
        if best.required < required_count {
            return None;
        }

        let mut losses = Vec::with_capacity(best_colors.len());
        let mut stack = vec![(graph.root(), best_colors)];
        while let Some((vertex, colors)) = stack.pop() {
            if let Some(TraceItem {
                origin: Origin::Merge { rest, extension },
                ..
            }) = tables[vertex].get(&colors)
                && let Some(extension) = extensions[vertex].get(extension)
            {
                stack.push((vertex, *rest));
                losses.push(extension.loss);
                stack.push((graph.loss(extension.loss).target(), extension.child));
            }
        }
        Some(losses)
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::FullErrorContent;

    use super::{Constraints, ExactSolver};
    use crate::{ColoredGraph, HeuristicSolver, SolverSettings, TreeError};

    fn scenario() -> ColoredGraph<&'static str> {
        let mut builder = ColoredGraph::builder("M", 2);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 0);
        builder.add_loss(0, a, 10.0, "");
        builder.add_loss(a, b, 5.0, "");
        builder.add_loss(0, c, 8.0, "");
        builder.add_loss(c, b, 1.0, "");
        builder.build().unwrap()
    }

    #[test]
    fn select_best_branch() {
        let graph = scenario();
        let tree = ExactSolver::new(&graph, &SolverSettings::default())
            .unwrap()
            .solve()
            .unwrap();
        tree.validate(&graph).unwrap();
        assert!((tree.score() - 15.0).abs() < 1e-12);
        assert!(tree.contains_fragment(1));
        assert!(tree.contains_fragment(2));
        assert!(!tree.contains_fragment(3));
        assert!(tree.is_exact());
    }

    #[test]
    fn merge_sibling_subtrees() {
        // The optimum is a tree with branching, not a path
        let mut builder = ColoredGraph::builder("M", 4);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 2);
        let d = builder.add_fragment("D", 3);
        builder.add_loss(0, a, 1.0, "");
        builder.add_loss(0, b, 1.0, "");
        builder.add_loss(a, c, 3.0, "");
        builder.add_loss(a, d, 3.0, "");
        builder.add_loss(b, d, 4.0, "");
        let graph = builder.build().unwrap();
        let tree = ExactSolver::new(&graph, &SolverSettings::default())
            .unwrap()
            .solve()
            .unwrap();
        tree.validate(&graph).unwrap();
        // root->A->C (4) + root->B->D (5)
        assert!((tree.score() - 9.0).abs() < 1e-12);
        assert_eq!(tree.number_of_vertices(), 5);
    }

    #[test]
    fn negative_weights_give_root_only() {
        let mut builder = ColoredGraph::builder("M", 2).root_score(-1.0);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        builder.add_loss(0, a, -1.0, "");
        builder.add_loss(a, b, -0.5, "");
        builder.add_loss(0, b, -3.0, "");
        let graph = builder.build().unwrap();
        let tree = ExactSolver::new(&graph, &SolverSettings::default())
            .unwrap()
            .solve()
            .unwrap();
        assert_eq!(tree.number_of_vertices(), 1);
        assert!((tree.score() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_loss_behind_positive_one() {
        let mut builder = ColoredGraph::builder("M", 2);
        let a = builder.add_fragment("A", 0);
        let b = builder.add_fragment("B", 1);
        let c = builder.add_fragment("C", 0);
        builder.add_loss(0, a, -1.0, "");
        builder.add_loss(a, b, 5.0, "");
        builder.add_loss(0, c, 2.0, "");
        let graph = builder.build().unwrap();
        let tree = ExactSolver::new(&graph, &SolverSettings::default())
            .unwrap()
            .solve()
            .unwrap();
        assert!((tree.score() - 4.0).abs() < 1e-12);
        assert!(tree.contains_fragment(b));
    }

    #[test]
    fn empty_graph() {
        let graph = ColoredGraph::builder("M", 0).build().unwrap();
        assert!(
            ExactSolver::new(&graph, &SolverSettings::default())
                .unwrap()
                .solve()
                .is_none()
        );
    }

    #[test]
    fn capacity() {
        let graph = scenario();
        let error = ExactSolver::new(
            &graph,
            &SolverSettings {
                max_exact_colors: 1,
                ..SolverSettings::default()
            },
        )
        .unwrap_err();
        assert!(matches!(error.get_kind(), TreeError::CapacityExceeded));
    }

    #[test]
    fn constraints() {
        let graph = scenario();
        let solver = ExactSolver::new(&graph, &SolverSettings::default()).unwrap();
        let losses = solver
            .solve_constrained(&Constraints {
                required: vec![3],
                forbidden: Vec::new(),
            })
            .unwrap();
        // root->C->B
        assert_eq!(losses.len(), 2);
        let losses = solver
            .solve_constrained(&Constraints {
                required: Vec::new(),
                forbidden: vec![1],
            })
            .unwrap();
        // root->C->B is 9, root->B does not exist
        assert_eq!(losses.len(), 2);
        assert!(
            solver
                .solve_constrained(&Constraints {
                    required: vec![1, 3],
                    forbidden: Vec::new(),
                })
                .is_none()
        );
    }

    #[test]
    fn dense_graph_at_default_limit() {
        let settings = SolverSettings::default();
        let colors = settings.max_exact_colors;
        let mut builder = ColoredGraph::builder(0, colors);
        for fragment in 1..=2 * colors {
            builder.add_fragment(fragment, (fragment - 1) / 2);
        }
        for target in 1..=2 * colors {
            for source in 0..target {
                if source == 0 || (source - 1) / 2 != (target - 1) / 2 {
                    let weight = f64::from(u32::try_from((source * 7 + target * 13) % 11).unwrap());
                    builder.add_loss(source, target, weight - 4.0, 0);
                }
            }
        }
        let graph = builder.build().unwrap();
        let solver = ExactSolver::new(&graph, &settings).unwrap();
        let exact = solver.solve().unwrap();
        exact.validate(&graph).unwrap();
        let heuristic = HeuristicSolver::new(&graph, &settings).solve().unwrap();
        assert!(heuristic.score() <= exact.score());
        assert_eq!(solver.solve(), Some(exact));
    }
}
