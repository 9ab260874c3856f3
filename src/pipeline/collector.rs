//! Refresh garbage collector.
//!
//! Holds the single logical owner handle of every uncached stream object
//! produced during one refresh walk. Objects sit in levels that mirror the
//! depth of the walk; popping back up the tree collects the levels below.
//! Leaf outputs handed to the caller are forgotten instead of released.
//!
//! Releasing drops the collector's handle. A filter that is still reading the
//! object through another handle keeps it alive, but the collector never
//! touches it again.

use crate::pipeline::id::ObjectKey;
use crate::pipeline::stream::SharedStream;
use std::collections::{HashMap, HashSet};

/// Counters that make collector completeness observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Distinct uncached objects ever tracked.
    pub tracked: usize,
    pub released: usize,
    /// Handed off to the result list.
    pub forgotten: usize,
}

impl GcStats {
    /// Objects still held by the collector.
    pub fn outstanding(&self) -> usize {
        self.tracked - self.released - self.forgotten
    }

    pub fn is_balanced(&self) -> bool {
        self.outstanding() == 0
    }
}

#[derive(Debug, Default)]
pub struct RefreshCollector {
    levels: Vec<Vec<SharedStream>>,
    /// Level each tracked object lives at.
    index: HashMap<ObjectKey, usize>,
    /// Objects already handed off; never tracked again during this walk.
    handed_off: HashSet<ObjectKey>,
    stats: GcStats,
}

impl RefreshCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the uncached objects in `objects` at `level`.
    ///
    /// Cached objects belong to their producer's cache and are skipped, as are
    /// objects already tracked at any level.
    pub fn track(&mut self, level: usize, objects: &[SharedStream]) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        for object in objects.iter().filter(|o| !o.is_cached()) {
            let key = ObjectKey::of(object);
            if self.index.contains_key(&key) || self.handed_off.contains(&key) {
                continue;
            }
            self.index.insert(key, level);
            self.levels[level].push(object.clone());
            self.stats.tracked += 1;
        }
    }

    /// Stop tracking `objects` without releasing them.
    pub fn forget(&mut self, objects: &[SharedStream]) {
        for object in objects {
            let key = ObjectKey::of(object);
            let Some(level) = self.index.remove(&key) else {
                continue;
            };
            self.levels[level].retain(|o| ObjectKey::of(o) != key);
            self.handed_off.insert(key);
            self.stats.forgotten += 1;
        }
    }

    /// Release every object at levels `>= depth` and keep `depth` levels.
    pub fn collect_to_level(&mut self, depth: usize) {
        if depth >= self.levels.len() {
            return;
        }
        for object in self.levels.drain(depth..).flatten() {
            self.index.remove(&ObjectKey::of(&object));
            self.stats.released += 1;
        }
    }

    pub fn collect_all(&mut self) {
        self.collect_to_level(0);
    }

    /// Release objects that were forgotten into a result list which is now
    /// being discarded (failed or aborted refresh).
    pub fn release(&mut self, objects: Vec<SharedStream>) {
        for object in objects {
            if self.handed_off.remove(&ObjectKey::of(&object)) {
                self.stats.forgotten -= 1;
                self.stats.released += 1;
            }
        }
    }

    pub fn is_tracked(&self, object: &SharedStream) -> bool {
        self.index.contains_key(&ObjectKey::of(object))
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn tracked_len(&self) -> usize {
        self.index.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::stream::{StreamObject, StreamPayload};
    use crate::types::PointCloud;
    use std::sync::Arc;

    fn uncached() -> SharedStream {
        StreamObject::detached(StreamPayload::Points(PointCloud::default()))
    }

    fn cached() -> SharedStream {
        Arc::new(StreamObject::new(
            StreamPayload::Points(PointCloud::default()),
            FilterId(0),
            true,
        ))
    }

    #[test]
    fn test_tracks_each_uncached_object_once() {
        let mut gc = RefreshCollector::new();
        let a = uncached();
        gc.track(1, &[a.clone(), cached()]);
        gc.track(2, &[a.clone()]);
        assert_eq!(gc.tracked_len(), 1);
        assert_eq!(gc.depth(), 3);
        assert!(gc.is_tracked(&a));
    }

    #[test]
    fn test_collect_to_level_releases_deeper_levels() {
        let mut gc = RefreshCollector::new();
        let (a, b, c) = (uncached(), uncached(), uncached());
        gc.track(0, &[a.clone()]);
        gc.track(1, &[b.clone()]);
        gc.track(2, &[c.clone()]);

        gc.collect_to_level(1);
        assert!(gc.is_tracked(&a));
        assert!(!gc.is_tracked(&b));
        assert!(!gc.is_tracked(&c));
        // The collector no longer holds a handle to `b`.
        assert_eq!(Arc::strong_count(&b), 1);

        gc.collect_all();
        assert_eq!(
            gc.stats(),
            GcStats {
                tracked: 3,
                released: 3,
                forgotten: 0
            }
        );
    }

    #[test]
    fn test_forgotten_objects_are_not_retracked() {
        let mut gc = RefreshCollector::new();
        let a = uncached();
        gc.track(1, &[a.clone()]);
        gc.forget(&[a.clone()]);
        gc.track(2, &[a.clone()]);
        assert!(!gc.is_tracked(&a));
        gc.collect_all();
        assert!(gc.stats().is_balanced());
        assert_eq!(gc.stats().forgotten, 1);

        // Failure path: the result list is discarded.
        gc.release(vec![a]);
        let stats = gc.stats();
        assert_eq!((stats.released, stats.forgotten), (1, 0));
        assert!(stats.is_balanced());
    }
}
