//! Filter tree: an ordered forest of filters stored in an arena.
//!
//! Slots are addressed by `FilterId` (the slot index). Removing a subtree
//! empties its slots; ids are never reused, so a stale id simply fails to
//! resolve. Parent and child links are explicit index lists, which keeps
//! ancestry queries valid across structural edits.
//!
//! Every structural edit finishes with [`FilterTree::init_filter_tree`], giving
//! each filter a chance to react to its new upstream before the next refresh.

use crate::pipeline::error::{TreeError, TreeResult};
use crate::pipeline::filter::{
    Filter, FilterBehavior, FilterKind, InitContext, PropertyValue, SelectionDevice,
};
use crate::pipeline::id::FilterId;
use crate::pipeline::stream::SharedStream;
use std::collections::VecDeque;

/// A filter's retained copy of its own last successful output.
#[derive(Debug, Default)]
pub struct FilterCache {
    objects: Vec<SharedStream>,
    valid: bool,
}

impl FilterCache {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn objects(&self) -> &[SharedStream] {
        &self.objects
    }

    pub(crate) fn store(&mut self, objects: Vec<SharedStream>) {
        self.objects = objects;
        self.valid = true;
    }

    /// Drop the cached objects. Callers still holding handles keep them alive.
    pub(crate) fn invalidate(&mut self) {
        self.objects.clear();
        self.valid = false;
    }
}

/// One occupied arena slot.
#[derive(Debug)]
pub struct TreeSlot {
    pub(crate) filter: Filter,
    parent: Option<FilterId>,
    children: Vec<FilterId>,
    pub(crate) cache: FilterCache,
    /// Changed since the last refresh; cleared when the scheduler invalidates.
    modified: bool,
    /// Console lines from the last refresh of this filter.
    pub(crate) console: Vec<String>,
    pub(crate) devices: Vec<SelectionDevice>,
}

impl TreeSlot {
    fn new(filter: Filter, parent: Option<FilterId>) -> Self {
        Self {
            filter,
            parent,
            children: Vec::new(),
            cache: FilterCache::default(),
            modified: true,
            console: Vec::new(),
            devices: Vec::new(),
        }
    }
}

/// Ordered forest of filters.
#[derive(Debug, Default)]
pub struct FilterTree {
    slots: Vec<Option<TreeSlot>>,
    roots: Vec<FilterId>,
    /// Bumped by every structural edit.
    generation: u64,
}

impl FilterTree {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Slot access ──

    fn slot(&self, id: FilterId) -> TreeResult<&TreeSlot> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(TreeError::UnknownFilter(id))
    }

    fn slot_mut(&mut self, id: FilterId) -> TreeResult<&mut TreeSlot> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(TreeError::UnknownFilter(id))
    }

    pub(crate) fn get_slot(&self, id: FilterId) -> Option<&TreeSlot> {
        self.slot(id).ok()
    }

    pub(crate) fn get_slot_mut(&mut self, id: FilterId) -> Option<&mut TreeSlot> {
        self.slot_mut(id).ok()
    }

    /// Upper bound on `FilterId::index()` for live filters.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // ── Queries ──

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.slot(id).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn filter(&self, id: FilterId) -> Option<&Filter> {
        self.get_slot(id).map(|s| &s.filter)
    }

    pub fn cache(&self, id: FilterId) -> Option<&FilterCache> {
        self.get_slot(id).map(|s| &s.cache)
    }

    pub fn is_modified(&self, id: FilterId) -> bool {
        self.get_slot(id).is_some_and(|s| s.modified)
    }

    pub fn roots(&self) -> &[FilterId] {
        &self.roots
    }

    pub fn parent(&self, id: FilterId) -> Option<FilterId> {
        self.get_slot(id).and_then(|s| s.parent)
    }

    pub fn children(&self, id: FilterId) -> &[FilterId] {
        self.get_slot(id).map_or(&[], |s| &s.children)
    }

    pub fn is_leaf(&self, id: FilterId) -> bool {
        self.children(id).is_empty()
    }

    /// Number of ancestors; roots have depth 0.
    pub fn depth(&self, id: FilterId) -> usize {
        self.ancestors(id).len()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: FilterId) -> Vec<FilterId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// True when `ancestor` lies strictly above `id`.
    pub fn is_ancestor_of(&self, ancestor: FilterId, id: FilterId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Nearest ancestor of the given kind.
    pub fn ancestor_of_kind(&self, id: FilterId, kind: FilterKind) -> Option<FilterId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.filter(*a).is_some_and(|f| f.kind() == kind))
    }

    pub fn has_ancestor_of_kind(&self, id: FilterId, kind: FilterKind) -> bool {
        self.ancestor_of_kind(id, kind).is_some()
    }

    /// Pre-order over `id` and everything below it.
    pub fn subtree(&self, id: FilterId) -> Vec<FilterId> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.pre_order(&[id])
    }

    /// Pre-order over the whole forest, roots in order.
    pub fn depth_first(&self) -> Vec<FilterId> {
        self.pre_order(&self.roots)
    }

    pub fn breadth_first(&self) -> Vec<FilterId> {
        let mut out = Vec::with_capacity(self.slots.len());
        let mut queue: VecDeque<FilterId> = self.roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            out.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        out
    }

    fn pre_order(&self, start: &[FilterId]) -> Vec<FilterId> {
        let mut out = Vec::new();
        let mut stack: Vec<FilterId> = start.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    // ── Structural edits ──

    /// Insert `filter` as the last child of `parent`, or as a new root.
    pub fn add_filter(
        &mut self,
        parent: Option<FilterId>,
        filter: impl Into<Filter>,
    ) -> TreeResult<FilterId> {
        let id = self.insert_slot(parent, filter.into())?;
        tracing::debug!("Added filter {} under {:?}", id, parent);
        self.structure_changed();
        Ok(id)
    }

    fn insert_slot(&mut self, parent: Option<FilterId>, filter: Filter) -> TreeResult<FilterId> {
        if let Some(p) = parent {
            self.slot(p)?;
        }
        let id = FilterId(self.slots.len() as u32);
        self.slots.push(Some(TreeSlot::new(filter, parent)));
        self.attach(id, parent);
        Ok(id)
    }

    fn attach(&mut self, id: FilterId, parent: Option<FilterId>) {
        match parent.and_then(|p| self.get_slot_mut(p)) {
            Some(p) => p.children.push(id),
            None => self.roots.push(id),
        }
        if let Some(slot) = self.get_slot_mut(id) {
            slot.parent = parent;
        }
    }

    fn detach(&mut self, id: FilterId) {
        match self.parent(id) {
            Some(p) => {
                if let Some(p) = self.get_slot_mut(p) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Delete `id` and all its descendants. Returns the removed filters in
    /// pre-order.
    pub fn remove_subtree(&mut self, id: FilterId) -> TreeResult<Vec<(FilterId, Filter)>> {
        self.slot(id)?;
        let ids = self.subtree(id);
        self.detach(id);
        let removed = ids
            .into_iter()
            .filter_map(|i| {
                self.slots
                    .get_mut(i.index())
                    .and_then(Option::take)
                    .map(|slot| (i, slot.filter))
            })
            .collect::<Vec<_>>();
        tracing::debug!("Removed {} filters rooted at {}", removed.len(), id);
        self.structure_changed();
        Ok(removed)
    }

    /// Re-parent `id` (with its subtree) under `new_parent`, or make it a root.
    pub fn move_subtree(&mut self, id: FilterId, new_parent: Option<FilterId>) -> TreeResult<()> {
        self.slot(id)?;
        if let Some(target) = new_parent {
            self.slot(target)?;
            if target == id || self.is_ancestor_of(id, target) {
                return Err(TreeError::WouldCreateCycle { moved: id, target });
            }
        }
        self.detach(id);
        self.attach(id, new_parent);
        // New upstream: everything from here down must recompute.
        self.slot_mut(id)?.modified = true;
        tracing::debug!("Moved {} under {:?}", id, new_parent);
        self.structure_changed();
        Ok(())
    }

    /// Duplicate the configuration of `id` and its subtree under `new_parent`.
    /// Caches are not copied. Returns the id of the copy of `id`.
    pub fn copy_subtree(
        &mut self,
        id: FilterId,
        new_parent: Option<FilterId>,
    ) -> TreeResult<FilterId> {
        self.slot(id)?;
        if let Some(p) = new_parent {
            self.slot(p)?;
        }
        // Snapshot first so copying under a descendant does not recurse into the copy.
        let source = self.subtree(id);
        let mut mapping: Vec<(FilterId, FilterId)> = Vec::with_capacity(source.len());
        for old in source {
            let parent = if old == id {
                new_parent
            } else {
                let old_parent = self.parent(old);
                mapping
                    .iter()
                    .find(|(o, _)| Some(*o) == old_parent)
                    .map(|(_, n)| *n)
            };
            let filter = self.slot(old)?.filter.duplicate();
            let new = self.insert_slot(parent, filter)?;
            mapping.push((old, new));
        }
        let copy = mapping
            .first()
            .map(|(_, n)| *n)
            .ok_or(TreeError::UnknownFilter(id))?;
        tracing::debug!("Copied subtree {} to {}", id, copy);
        self.structure_changed();
        Ok(copy)
    }

    /// Exchange the whole contents of two trees.
    pub fn swap(&mut self, other: &mut FilterTree) {
        std::mem::swap(self, other);
        self.structure_changed();
        other.structure_changed();
    }

    /// Replace the filter in `id`, keeping its position. Returns the old filter.
    pub fn replace_filter(&mut self, id: FilterId, filter: impl Into<Filter>) -> TreeResult<Filter> {
        let slot = self.slot_mut(id)?;
        let old = std::mem::replace(&mut slot.filter, filter.into());
        slot.modified = true;
        self.structure_changed();
        Ok(old)
    }

    /// Copy of the whole tree with configuration only: same ids, no caches.
    pub fn clone_uncached(&self) -> FilterTree {
        let slots = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|s| TreeSlot {
                    filter: s.filter.duplicate(),
                    parent: s.parent,
                    children: s.children.clone(),
                    cache: FilterCache::default(),
                    modified: true,
                    console: Vec::new(),
                    devices: Vec::new(),
                })
            })
            .collect();
        let mut tree = FilterTree {
            slots,
            roots: self.roots.clone(),
            generation: self.generation,
        };
        tree.init_filter_tree();
        tree
    }

    fn structure_changed(&mut self) {
        self.generation += 1;
        self.init_filter_tree();
    }

    /// Structural pass: hand each filter its parent's init output.
    ///
    /// Runs without touching caches or data. Objects made here are uncached
    /// and dropped when the pass ends.
    pub fn init_filter_tree(&mut self) {
        let mut stack: Vec<(FilterId, Vec<SharedStream>)> = self
            .roots
            .iter()
            .rev()
            .map(|r| (*r, Vec::new()))
            .collect();
        while let Some((id, upstream)) = stack.pop() {
            let Some(slot) = self.get_slot_mut(id) else {
                continue;
            };
            let output = slot.filter.init_structure(&upstream, &InitContext::new(id));
            for child in slot.children.iter().rev() {
                stack.push((*child, output.clone()));
            }
        }
    }

    // ── Edits that affect data ──

    /// Apply a property. Marks the filter modified when it needs a refresh.
    pub fn set_property(
        &mut self,
        id: FilterId,
        key: &str,
        value: &PropertyValue,
    ) -> TreeResult<bool> {
        let slot = self.slot_mut(id)?;
        let needs_refresh = slot
            .filter
            .set_property(key, value)
            .map_err(|source| TreeError::Property { filter: id, source })?;
        if needs_refresh {
            slot.modified = true;
        }
        Ok(needs_refresh)
    }

    pub fn mark_modified(&mut self, id: FilterId) -> TreeResult<()> {
        self.slot_mut(id)?.modified = true;
        Ok(())
    }

    /// Invalidate the cache of every modified filter and of all its
    /// descendants, then clear the modified flags. Returns the invalidated ids.
    pub(crate) fn invalidate_modified(&mut self) -> Vec<FilterId> {
        let modified: Vec<FilterId> = self
            .depth_first()
            .into_iter()
            .filter(|id| self.is_modified(*id))
            .collect();
        let mut invalidated = Vec::new();
        for id in modified {
            for below in self.subtree(id) {
                if let Some(slot) = self.get_slot_mut(below) {
                    slot.modified = false;
                    slot.cache.invalidate();
                    invalidated.push(below);
                }
            }
        }
        invalidated.sort();
        invalidated.dedup();
        invalidated
    }

    /// Console lines from the last refresh, per filter, in depth-first order.
    pub fn console_messages(&self) -> Vec<(FilterId, &str)> {
        self.depth_first()
            .into_iter()
            .filter_map(|id| self.get_slot(id).map(|s| (id, s)))
            .flat_map(|(id, s)| s.console.iter().map(move |m| (id, m.as_str())))
            .collect()
    }
}
