//! Progress record and abort flag shared between a refresh and its caller.
//!
//! Both are plain shared values passed explicitly into every refresh. The
//! scheduler and filters write them on the worker thread; the foreground
//! polls `ProgressHandle::snapshot` and sets `AbortHandle::request`.

use crate::pipeline::id::FilterId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Snapshot of refresh progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Filter currently being refreshed.
    pub current_filter: Option<FilterId>,
    pub filter_name: String,
    /// Step within the current filter, for filters with several phases.
    pub step: u32,
    pub max_step: u32,
    /// Percent complete for the current filter. Reaches 100 once per filter.
    pub filter_percent: u8,
    pub filters_done: usize,
    pub filters_total: usize,
}

impl Progress {
    /// Overall completion in percent across all filters of the walk.
    pub fn total_percent(&self) -> u8 {
        if self.filters_total == 0 {
            return 0;
        }
        ((self.filters_done.min(self.filters_total) * 100) / self.filters_total) as u8
    }
}

/// Shared, lockable progress record.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle(Arc<Mutex<Progress>>);

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        // A panicking filter must not make progress unreadable.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Progress {
        self.lock().clone()
    }

    pub(crate) fn begin_refresh(&self, filters_total: usize) {
        let mut p = self.lock();
        *p = Progress {
            filters_total,
            ..Progress::default()
        };
    }

    pub(crate) fn begin_filter(&self, filter: FilterId, name: &str) {
        let mut p = self.lock();
        p.current_filter = Some(filter);
        p.filter_name.clear();
        p.filter_name.push_str(name);
        p.step = 0;
        p.max_step = 0;
        p.filter_percent = 0;
    }

    pub(crate) fn set_step(&self, step: u32, max_step: u32) {
        let mut p = self.lock();
        p.step = step;
        p.max_step = max_step;
    }

    /// Filters report at most 99; only `complete_filter` writes 100.
    pub(crate) fn set_filter_percent(&self, percent: u8) {
        self.lock().filter_percent = percent.min(99);
    }

    pub(crate) fn complete_filter(&self) {
        let mut p = self.lock();
        p.filter_percent = 100;
        p.filters_done += 1;
    }

    pub(crate) fn finish(&self) {
        self.lock().current_filter = None;
    }
}

/// Cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_percent_capped_until_complete() {
        let progress = ProgressHandle::new();
        progress.begin_refresh(2);
        progress.begin_filter(FilterId(0), "Downsample");
        progress.set_filter_percent(150);
        assert_eq!(progress.snapshot().filter_percent, 99);
        progress.complete_filter();
        let snap = progress.snapshot();
        assert_eq!(snap.filter_percent, 100);
        assert_eq!(snap.filters_done, 1);
        assert_eq!(snap.total_percent(), 50);
    }

    #[test]
    fn test_abort_handle_shared() {
        let abort = AbortHandle::new();
        let other = abort.clone();
        assert!(!other.is_requested());
        abort.request();
        assert!(other.is_requested());
        other.reset();
        assert!(!abort.is_requested());
    }
}
