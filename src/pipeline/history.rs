//! Bounded undo/redo of filter tree snapshots.
//!
//! Snapshots are configuration-only copies (`FilterTree::clone_uncached`), so
//! restoring one always leads to a full refresh.

use crate::pipeline::tree::FilterTree;
use std::collections::VecDeque;

pub const DEFAULT_UNDO_DEPTH: usize = 16;

pub struct TreeHistory {
    undo: VecDeque<FilterTree>,
    redo: Vec<FilterTree>,
    max_depth: usize,
}

impl TreeHistory {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_depth,
        }
    }

    /// Record `tree` as it is before an edit. Clears the redo stack.
    pub fn push_snapshot(&mut self, tree: &FilterTree) {
        self.record(tree.clone_uncached());
    }

    /// Record a snapshot taken before an edit that has since succeeded.
    pub fn record(&mut self, snapshot: FilterTree) {
        if self.max_depth == 0 {
            return;
        }
        if self.undo.len() == self.max_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(snapshot);
        self.redo.clear();
    }

    /// Swap `current` for the latest snapshot. Returns false when there is
    /// nothing to undo.
    pub fn undo(&mut self, current: &mut FilterTree) -> bool {
        let Some(mut previous) = self.undo.pop_back() else {
            return false;
        };
        previous.swap(current);
        self.redo.push(previous.clone_uncached());
        true
    }

    pub fn redo(&mut self, current: &mut FilterTree) -> bool {
        let Some(mut next) = self.redo.pop() else {
            return false;
        };
        next.swap(current);
        self.undo.push_back(next.clone_uncached());
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for TreeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::{DataLoadFilter, SpectrumPlotFilter};

    #[test]
    fn test_undo_redo_round() {
        let mut tree = FilterTree::new();
        let mut history = TreeHistory::default();
        let load = tree.add_filter(None, DataLoadFilter::default()).unwrap();

        history.push_snapshot(&tree);
        tree.add_filter(Some(load), SpectrumPlotFilter::default())
            .unwrap();
        assert_eq!(tree.len(), 2);

        assert!(history.undo(&mut tree));
        assert_eq!(tree.len(), 1);
        assert!(history.can_redo());

        assert!(history.redo(&mut tree));
        assert_eq!(tree.len(), 2);
        assert!(!history.redo(&mut tree));
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut tree = FilterTree::new();
        let mut history = TreeHistory::new(2);
        for _ in 0..5 {
            history.push_snapshot(&tree);
            tree.add_filter(None, DataLoadFilter::default()).unwrap();
        }
        assert!(history.undo(&mut tree));
        assert!(history.undo(&mut tree));
        assert!(!history.undo(&mut tree));
        assert_eq!(tree.len(), 3);
    }
}
