//! Identity types for the filter tree.
//!
//! `FilterId` is a newtype over `u32` that serves as a direct index into the
//! tree arena, giving O(1) lookup. `ObjectKey` identifies a stream object by
//! its allocation so the refresh collector and the result list can reason about
//! aliasing without comparing payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index into `FilterTree::slots`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(pub u32);

impl FilterId {
    pub const INVALID: FilterId = FilterId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "FilterId(INVALID)")
        } else {
            write!(f, "FilterId({})", self.0)
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Allocation identity of a shared stream object.
///
/// Two handles compare equal exactly when they point at the same allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    #[inline]
    pub fn of<T>(object: &Arc<T>) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize)
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_id() {
        let id = FilterId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!FilterId::INVALID.is_valid());
        assert_eq!(format!("{:?}", FilterId::INVALID), "FilterId(INVALID)");
    }

    #[test]
    fn test_object_key_tracks_allocation() {
        let a = Arc::new(5u32);
        let b = Arc::clone(&a);
        let c = Arc::new(5u32);
        assert_eq!(ObjectKey::of(&a), ObjectKey::of(&b));
        assert_ne!(ObjectKey::of(&a), ObjectKey::of(&c));
    }
}
