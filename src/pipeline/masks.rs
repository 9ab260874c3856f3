//! Propagation mask analysis.
//!
//! For every filter this computes which stream types can possibly arrive at or
//! leave it (accumulated emit) and which types are surely absorbed in its
//! subtree (accumulated block). The scheduler uses both to pick the minimal set
//! of filters a refresh must restart from; the tree analyser reuses the emit
//! map for its checks.

use crate::pipeline::filter::FilterBehavior;
use crate::pipeline::id::FilterId;
use crate::pipeline::stream::StreamTypeMask;
use crate::pipeline::tree::FilterTree;
use std::collections::VecDeque;

/// Accumulated emit and block masks for one analysis pass.
#[derive(Debug, Clone, Default)]
pub struct PropagationMasks {
    emit: Vec<StreamTypeMask>,
    block: Vec<StreamTypeMask>,
}

impl PropagationMasks {
    /// Compute both maps for `tree`.
    ///
    /// Emit is filled breadth-first from the roots:
    /// `emit[n] = (emit[parent] & !block_mask(n)) | emit_mask(n)`.
    ///
    /// Block is filled leaves first: `block[n] = block_mask(n)`, plus the
    /// intersection of the children's `block` when every child holds a valid
    /// cache. A single uncached child, or no children at all, contributes
    /// nothing.
    pub fn compute(tree: &FilterTree) -> Self {
        let n = tree.capacity();
        let mut emit = vec![StreamTypeMask::empty(); n];
        let mut block = vec![StreamTypeMask::empty(); n];

        let order = tree.breadth_first();
        for &id in &order {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let incoming = tree
                .parent(id)
                .map_or(StreamTypeMask::empty(), |p| emit[p.index()]);
            emit[id.index()] = (incoming & !filter.block_mask()) | filter.emit_mask();
        }

        // Reverse breadth-first visits every child before its parent.
        for &id in order.iter().rev() {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let children = tree.children(id);
            let all_cached = !children.is_empty()
                && children
                    .iter()
                    .all(|c| tree.cache(*c).is_some_and(|cache| cache.is_valid()));
            let from_children = if all_cached {
                children
                    .iter()
                    .fold(StreamTypeMask::all(), |acc, c| acc & block[c.index()])
            } else {
                StreamTypeMask::empty()
            };
            block[id.index()] = filter.block_mask() | from_children;
        }

        Self { emit, block }
    }

    pub fn accumulated_emit(&self, id: FilterId) -> StreamTypeMask {
        self.emit.get(id.index()).copied().unwrap_or_default()
    }

    pub fn accumulated_block(&self, id: FilterId) -> StreamTypeMask {
        self.block.get(id.index()).copied().unwrap_or_default()
    }

    /// Types that can arrive at `id` from its parent.
    pub fn incoming(&self, tree: &FilterTree, id: FilterId) -> StreamTypeMask {
        tree.parent(id)
            .map_or(StreamTypeMask::empty(), |p| self.accumulated_emit(p))
    }

    /// Whether a refresh must restart at `id`.
    ///
    /// A filter can be skipped, and the walk started below it, only when all
    /// of these hold:
    /// - it has children;
    /// - every type it can pass on is absorbed by at least one child;
    /// - its cache is valid, so its output can be replayed;
    /// - it forwards nothing from upstream, so the cache is its whole output.
    pub fn is_seed(&self, tree: &FilterTree, id: FilterId) -> bool {
        let Some(filter) = tree.filter(id) else {
            return false;
        };
        let children = tree.children(id);
        if children.is_empty() {
            return true;
        }
        let absorbed = self
            .accumulated_emit(id)
            .types()
            .all(|t| children.iter().any(|c| self.accumulated_block(*c).contains(t.mask())));
        let cache_valid = tree.cache(id).is_some_and(|c| c.is_valid());
        let forwards = self.incoming(tree, id) & !filter.block_mask();

        !(absorbed && cache_valid && forwards.is_empty())
    }

    /// Minimal set of restart points, in breadth-first order.
    ///
    /// Nodes below a chosen seed are never considered: the seed's walk covers
    /// them.
    pub fn seed_set(&self, tree: &FilterTree) -> Vec<FilterId> {
        let mut seeds = Vec::new();
        let mut queue: VecDeque<FilterId> = tree.roots().iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if self.is_seed(tree, id) {
                seeds.push(id);
            } else {
                queue.extend(tree.children(id).iter().copied());
            }
        }
        seeds
    }
}
