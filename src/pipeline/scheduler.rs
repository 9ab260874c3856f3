//! Refresh scheduler: cached, seeded, depth-first recomputation of a tree.
//!
//! One refresh:
//! 1. Invalidate the caches of modified filters and everything below them.
//! 2. Compute propagation masks and the seed set.
//! 3. Walk each seed's subtree depth-first, keeping the inputs of every open
//!    depth on a value stack. Filters with a valid cache replay it; the others
//!    run `refresh`, caching when the policy admits their estimate.
//! 4. Leaf outputs go to the result list; everything else uncached is
//!    released by the collector as the walk climbs back up.
//!
//! Any filter error or abort unwinds the whole refresh: all uncached objects
//! are released and no partial result is returned. Caches written before the
//! failure stay valid.

use crate::pipeline::collector::{GcStats, RefreshCollector};
use crate::pipeline::error::{RefreshError, RefreshResult};
use crate::pipeline::filter::{
    forward_unblocked, ConsoleMessage, FilterBehavior, RefreshContext, SelectionDevice,
};
use crate::pipeline::id::FilterId;
use crate::pipeline::masks::PropagationMasks;
use crate::pipeline::memory::CachePolicy;
use crate::pipeline::progress::{AbortHandle, ProgressHandle};
use crate::pipeline::stream::{count_points, dedup_by_identity, SharedStream};
use crate::pipeline::tree::FilterTree;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of the most recent refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Running,
    Done,
    Aborted,
    Failed,
}

/// Counters for one refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshStats {
    pub seeds: usize,
    /// Filters whose `refresh` ran.
    pub filters_refreshed: usize,
    /// Filters whose output was replayed from cache.
    pub filters_from_cache: usize,
    /// Filters whose outputs were admitted to the cache.
    pub filters_cached: usize,
    /// Uncached objects allocated by filters that completed.
    pub uncached_allocated: usize,
    pub gc: GcStats,
    pub elapsed: Duration,
}

/// Everything a successful refresh hands to the caller.
#[derive(Debug, Default)]
pub struct RefreshOutput {
    /// Leaf outputs, each object at most once.
    pub objects: Vec<SharedStream>,
    pub console: Vec<ConsoleMessage>,
    pub selection_devices: Vec<SelectionDevice>,
    pub stats: RefreshStats,
}

/// Shared flag that allows one refresh at a time.
#[derive(Debug, Clone, Default)]
pub struct RefreshLock(Arc<AtomicBool>);

impl RefreshLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RefreshLockGuard> {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RefreshLockGuard(self.0.clone()))
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct RefreshLockGuard(Arc<AtomicBool>);

impl Drop for RefreshLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Mutable state of one walk.
#[derive(Default)]
struct Walk {
    collector: RefreshCollector,
    results: Vec<SharedStream>,
    console: Vec<ConsoleMessage>,
    devices: Vec<SelectionDevice>,
    stats: RefreshStats,
}

impl Walk {
    /// Report what a filter wrote to its console and its selection devices.
    fn report(&mut self, id: FilterId, console: &[String], devices: &[SelectionDevice]) {
        self.console.extend(console.iter().map(|message| ConsoleMessage {
            filter: id,
            message: message.clone(),
        }));
        self.devices.extend(devices.iter().cloned());
    }
}

pub struct RefreshScheduler {
    policy: CachePolicy,
    abort: AbortHandle,
    progress: ProgressHandle,
    lock: RefreshLock,
    state: RefreshState,
    last_seeds: Vec<FilterId>,
    last_stats: RefreshStats,
}

impl RefreshScheduler {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            abort: AbortHandle::new(),
            progress: ProgressHandle::new(),
            lock: RefreshLock::new(),
            state: RefreshState::Idle,
            last_seeds: Vec::new(),
            last_stats: RefreshStats::default(),
        }
    }

    /// Use caller-owned progress and abort handles.
    pub fn with_handles(mut self, abort: AbortHandle, progress: ProgressHandle) -> Self {
        self.abort = abort;
        self.progress = progress;
        self
    }

    /// Share the re-entrancy lock with other schedulers driving the same tree.
    pub fn with_lock(mut self, lock: RefreshLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn lock(&self) -> RefreshLock {
        self.lock.clone()
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Seeds chosen by the most recent refresh.
    pub fn last_seeds(&self) -> &[FilterId] {
        &self.last_seeds
    }

    /// Counters of the most recent refresh, including failed ones.
    pub fn last_stats(&self) -> &RefreshStats {
        &self.last_stats
    }

    /// Bring every leaf output of `tree` up to date.
    pub fn refresh(&mut self, tree: &mut FilterTree) -> RefreshResult<RefreshOutput> {
        let Some(_guard) = self.lock.try_acquire() else {
            tracing::warn!("Refresh requested while another refresh is running");
            return Err(RefreshError::AlreadyRunning);
        };
        // Requests made while idle belong to no refresh.
        self.abort.reset();
        let start = Instant::now();
        self.state = RefreshState::Running;

        let invalidated = tree.invalidate_modified();
        if !invalidated.is_empty() {
            tracing::debug!("Invalidated caches: {:?}", invalidated);
        }
        let masks = PropagationMasks::compute(tree);
        let seeds = masks.seed_set(tree);
        let total: usize = seeds.iter().map(|s| tree.subtree(*s).len()).sum();
        tracing::debug!("Refresh seeds {:?} covering {} filters", seeds, total);

        self.progress.begin_refresh(total);
        self.policy.begin_refresh();

        let mut walk = Walk::default();
        walk.stats.seeds = seeds.len();
        let outcome = self.run_seeds(tree, &seeds, &mut walk);
        self.last_seeds = seeds;
        self.progress.finish();
        self.abort.reset();

        let Walk {
            mut collector,
            mut results,
            console,
            devices,
            mut stats,
        } = walk;
        collector.collect_all();
        stats.elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                dedup_by_identity(&mut results);
                stats.gc = collector.stats();
                self.last_stats = stats.clone();
                self.state = RefreshState::Done;
                tracing::info!(
                    "Refresh done: {} refreshed, {} from cache, {} seeds, {} objects in {:?}",
                    stats.filters_refreshed,
                    stats.filters_from_cache,
                    stats.seeds,
                    results.len(),
                    stats.elapsed
                );
                Ok(RefreshOutput {
                    objects: results,
                    console,
                    selection_devices: devices,
                    stats,
                })
            }
            Err(err) => {
                // Harvested leaf outputs never reach the caller.
                collector.release(results);
                self.state = if err.is_abort() {
                    RefreshState::Aborted
                } else {
                    RefreshState::Failed
                };
                let gc = collector.stats();
                stats.gc = gc;
                self.last_stats = stats;
                if err.is_abort() {
                    tracing::info!("Refresh aborted after {:?}", self.last_stats.elapsed);
                } else {
                    tracing::warn!("Refresh failed: {}", err);
                }
                debug_assert!(gc.is_balanced(), "collector left objects behind: {gc:?}");
                Err(err)
            }
        }
    }

    fn run_seeds(
        &mut self,
        tree: &mut FilterTree,
        seeds: &[FilterId],
        walk: &mut Walk,
    ) -> RefreshResult<()> {
        for &seed in seeds {
            self.walk_seed(tree, seed, walk)?;
        }
        Ok(())
    }

    /// Depth-first walk below `seed`. `stack[d]` holds the inputs of the
    /// filter being visited at walk depth `d`; collector level `d` holds the
    /// uncached objects among them.
    fn walk_seed(&mut self, tree: &mut FilterTree, seed: FilterId, walk: &mut Walk) -> RefreshResult<()> {
        // A non-seed parent always has a valid cache that is its whole output.
        let input = tree
            .parent(seed)
            .and_then(|p| tree.cache(p))
            .map(|c| c.objects().to_vec())
            .unwrap_or_default();
        let mut stack: Vec<Vec<SharedStream>> = vec![input];
        let mut pending: Vec<(FilterId, usize)> = vec![(seed, 0)];

        while let Some((id, depth)) = pending.pop() {
            stack.truncate(depth + 1);
            walk.collector.collect_to_level(depth + 1);
            if self.abort.is_requested() {
                return Err(RefreshError::Aborted);
            }

            let outputs = self.run_filter(tree, id, &stack[depth], walk)?;
            walk.collector.track(depth + 1, &outputs);

            let children = tree.children(id);
            if children.is_empty() {
                walk.collector.forget(&outputs);
                walk.results.extend(outputs);
            } else {
                pending.extend(children.iter().rev().map(|c| (*c, depth + 1)));
                stack.push(outputs);
            }
        }
        walk.collector.collect_all();
        Ok(())
    }

    /// Produce the outputs of one filter from `inputs`.
    fn run_filter(
        &mut self,
        tree: &mut FilterTree,
        id: FilterId,
        inputs: &[SharedStream],
        walk: &mut Walk,
    ) -> RefreshResult<Vec<SharedStream>> {
        let Some(slot) = tree.get_slot_mut(id) else {
            return Ok(Vec::new());
        };
        self.progress.begin_filter(id, slot.filter.name());

        if slot.cache.is_valid() {
            let mut outputs = forward_unblocked(inputs, slot.filter.block_mask());
            outputs.extend(slot.cache.objects().iter().cloned());
            walk.stats.filters_from_cache += 1;
            walk.report(id, &slot.console, &slot.devices);
            self.progress.complete_filter();
            tracing::debug!("{} ({}) served from cache", slot.filter.name(), id);
            return Ok(outputs);
        }

        let estimate = slot.filter.cache_size_estimate(count_points(inputs));
        let caching = self.policy.should_cache(estimate);
        if !caching && estimate.is_some() {
            tracing::debug!(
                "{} ({}) not cached: estimate {:?} over budget",
                slot.filter.name(),
                id,
                estimate
            );
        }

        let mut ctx = RefreshContext::new(id, caching, &self.abort, &self.progress);
        let result = slot.filter.refresh(inputs, &mut ctx);
        let allocated = ctx.allocated_uncached();
        let (console, devices) = ctx.into_outputs();
        slot.console = console;
        slot.devices = devices;

        let outputs = result
            .map_err(|err| RefreshError::from_filter(id, slot.filter.name(), err))?;

        if caching {
            let own: Vec<SharedStream> = outputs
                .iter()
                .filter(|o| o.is_cached() && o.owner() == id)
                .cloned()
                .collect();
            slot.cache.store(own);
            walk.stats.filters_cached += 1;
        }
        walk.stats.filters_refreshed += 1;
        walk.stats.uncached_allocated += allocated;
        walk.report(id, &slot.console, &slot.devices);

        self.progress.complete_filter();
        tracing::debug!(
            "{} ({}) refreshed: {} outputs, cached={}",
            slot.filter.name(),
            id,
            outputs.len(),
            caching
        );
        Ok(outputs)
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(CachePolicy::system(50.0))
    }
}
