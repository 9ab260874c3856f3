//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod probe_filters;

use pointvis_rs::pipeline::{CachePolicy, CacheStrategy, FixedMemory, RefreshScheduler};
use pointvis_rs::pipeline::{ObjectKey, SharedStream};
use std::collections::HashSet;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Scheduler that caches everything with a known estimate.
pub fn caching_scheduler() -> RefreshScheduler {
    RefreshScheduler::new(CachePolicy::new(
        CacheStrategy::MemoryBudget { max_percent: 100.0 },
        Box::new(FixedMemory(u64::MAX)),
    ))
}

/// Scheduler that never caches.
pub fn uncached_scheduler() -> RefreshScheduler {
    RefreshScheduler::new(CachePolicy::never())
}

/// Allocation identities of `objects`, for comparing result sets.
pub fn identities(objects: &[SharedStream]) -> HashSet<ObjectKey> {
    objects.iter().map(ObjectKey::of).collect()
}

/// Assert no object appears twice in `objects`.
pub fn assert_no_alias(objects: &[SharedStream]) {
    assert_eq!(
        identities(objects).len(),
        objects.len(),
        "result list contains an object twice"
    );
}
