use std::{cmp::Reverse, collections::BinaryHeap};

use ordered_float::OrderedFloat;

use crate::FragmentationTree;

#[derive(Debug)]
struct Ranked<F> {
    score: OrderedFloat<f64>,
    order: usize,
    tree: FragmentationTree<F>,
}

impl<F> PartialEq for Ranked<F> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.order == other.order
    }
}

impl<F> Eq for Ranked<F> {}

impl<F> PartialOrd for Ranked<F> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<F> Ord for Ranked<F> {
    /// Higher scores are better, on equal scores the first offered tree is better
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Keeps the best `capacity` trees seen so far.
///
/// Once full, [`Self::worst_score`] is the score any new tree has to beat, which is exactly the
/// lower bound to set on the [`TreeIterator`](crate::TreeIterator) producing the trees.
#[derive(Debug)]
pub struct TopTrees<F> {
    capacity: usize,
    offered: usize,
    heap: BinaryHeap<Reverse<Ranked<F>>>,
}

impl<F> TopTrees<F> {
    /// Create a new empty set that will hold at most `capacity` trees
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            offered: 0,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(1024)),
        }
    }

    /// Offer a tree to the set. If the set is over capacity the worst tree is evicted and
    /// returned, this can be the offered tree itself.
    pub fn offer(&mut self, tree: FragmentationTree<F>) -> Option<FragmentationTree<F>> {
        self.heap.push(Reverse(Ranked {
            score: OrderedFloat(tree.score()),
            order: self.offered,
            tree,
        }));
        self.offered += 1;
        if self.heap.len() > self.capacity {
            self.heap.pop().map(|Reverse(ranked)| ranked.tree)
        } else {
            None
        }
    }

    /// The score of the worst tree kept, `None` if empty
    pub fn worst_score(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(ranked)| ranked.score.0)
    }

    /// Check if the set holds `capacity` trees
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// The number of trees kept
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if no trees are kept
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The maximal number of trees kept
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get all kept trees, best first
    pub fn into_sorted_vec(self) -> Vec<FragmentationTree<F>> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(ranked)| ranked.tree)
            .collect()
    }
}
