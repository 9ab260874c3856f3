//! Stream objects: the units of data that travel along tree edges.
//!
//! A `StreamObject` is created only inside a filter's refresh or structural
//! init call and is immutable afterwards. Objects are shared as
//! `Arc<StreamObject>`; the `cached` flag records who is responsible for the
//! object's lifetime:
//!
//! - **cached**: the producing filter's cache owns it. Every other holder is a
//!   borrower and must not count it as its own.
//! - **uncached**: exactly one logical owner exists: the refresh collector
//!   while the walk is running, or the final result list afterwards.

use crate::pipeline::id::{FilterId, ObjectKey};
use crate::types::{Drawable, Plot1D, Plot2D, PointCloud, RangeTable, VoxelGrid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Set of stream types, one bit per [`StreamType`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamTypeMask: u32 {
        const POINTS = 1 << 0;
        const PLOT_1D = 1 << 1;
        const PLOT_2D = 1 << 2;
        const DRAWABLE = 1 << 3;
        const RANGE_TABLE = 1 << 4;
        const VOXELS = 1 << 5;
    }
}

/// Tag of a single stream object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Points,
    Plot1D,
    Plot2D,
    Drawable,
    RangeTable,
    Voxels,
}

impl StreamType {
    pub const ALL: [StreamType; 6] = [
        StreamType::Points,
        StreamType::Plot1D,
        StreamType::Plot2D,
        StreamType::Drawable,
        StreamType::RangeTable,
        StreamType::Voxels,
    ];

    #[inline]
    pub fn mask(self) -> StreamTypeMask {
        match self {
            StreamType::Points => StreamTypeMask::POINTS,
            StreamType::Plot1D => StreamTypeMask::PLOT_1D,
            StreamType::Plot2D => StreamTypeMask::PLOT_2D,
            StreamType::Drawable => StreamTypeMask::DRAWABLE,
            StreamType::RangeTable => StreamTypeMask::RANGE_TABLE,
            StreamType::Voxels => StreamTypeMask::VOXELS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamType::Points => "points",
            StreamType::Plot1D => "plot-1d",
            StreamType::Plot2D => "plot-2d",
            StreamType::Drawable => "drawable",
            StreamType::RangeTable => "range-table",
            StreamType::Voxels => "voxels",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl StreamTypeMask {
    /// Individual stream types contained in this mask.
    pub fn types(self) -> impl Iterator<Item = StreamType> {
        StreamType::ALL
            .into_iter()
            .filter(move |t| self.contains(t.mask()))
    }
}

/// Data carried by a stream object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamPayload {
    Points(PointCloud),
    Plot1D(Plot1D),
    Plot2D(Plot2D),
    Drawable(Drawable),
    RangeTable(RangeTable),
    Voxels(VoxelGrid),
}

impl StreamPayload {
    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamPayload::Points(_) => StreamType::Points,
            StreamPayload::Plot1D(_) => StreamType::Plot1D,
            StreamPayload::Plot2D(_) => StreamType::Plot2D,
            StreamPayload::Drawable(_) => StreamType::Drawable,
            StreamPayload::RangeTable(_) => StreamType::RangeTable,
            StreamPayload::Voxels(_) => StreamType::Voxels,
        }
    }
}

/// One published unit of data.
#[derive(Debug)]
pub struct StreamObject {
    payload: StreamPayload,
    owner: FilterId,
    cached: bool,
}

/// Shared handle used everywhere a stream object travels.
pub type SharedStream = Arc<StreamObject>;

impl StreamObject {
    pub(crate) fn new(payload: StreamPayload, owner: FilterId, cached: bool) -> Self {
        Self {
            payload,
            owner,
            cached,
        }
    }

    /// Wrap a payload that does not belong to any filter in the tree.
    ///
    /// Used by callers that feed a tree from outside and by tests.
    pub fn detached(payload: StreamPayload) -> SharedStream {
        Arc::new(Self::new(payload, FilterId::INVALID, false))
    }

    #[inline]
    pub fn stream_type(&self) -> StreamType {
        self.payload.stream_type()
    }

    #[inline]
    pub fn payload(&self) -> &StreamPayload {
        &self.payload
    }

    /// Filter that produced this object (a back reference, never owning).
    #[inline]
    pub fn owner(&self) -> FilterId {
        self.owner
    }

    #[inline]
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn as_points(&self) -> Option<&PointCloud> {
        match &self.payload {
            StreamPayload::Points(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_range_table(&self) -> Option<&RangeTable> {
        match &self.payload {
            StreamPayload::RangeTable(r) => Some(r),
            _ => None,
        }
    }

    /// Number of points carried, zero for non-point payloads.
    pub fn point_count(&self) -> usize {
        self.as_points().map_or(0, PointCloud::len)
    }
}

/// Total number of points across a set of objects.
pub fn count_points(objects: &[SharedStream]) -> usize {
    objects.iter().map(|o| o.point_count()).sum()
}

/// Union of the stream types present in `objects`.
pub fn mask_of(objects: &[SharedStream]) -> StreamTypeMask {
    objects
        .iter()
        .fold(StreamTypeMask::empty(), |acc, o| acc | o.stream_type().mask())
}

/// Drop repeated handles to the same allocation, keeping first occurrences.
pub fn dedup_by_identity(objects: &mut Vec<SharedStream>) {
    let mut seen = std::collections::HashSet::with_capacity(objects.len());
    objects.retain(|o| seen.insert(ObjectKey::of(o)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ion, PointCloud};

    fn points(n: usize) -> SharedStream {
        StreamObject::detached(StreamPayload::Points(PointCloud::new(vec![
            Ion::default();
            n
        ])))
    }

    #[test]
    fn test_mask_types_iteration() {
        let mask = StreamTypeMask::POINTS | StreamTypeMask::VOXELS;
        let types: Vec<_> = mask.types().collect();
        assert_eq!(types, vec![StreamType::Points, StreamType::Voxels]);
        assert_eq!(StreamTypeMask::empty().types().count(), 0);
    }

    #[test]
    fn test_count_and_mask_of() {
        let objs = vec![
            points(3),
            points(4),
            StreamObject::detached(StreamPayload::RangeTable(Default::default())),
        ];
        assert_eq!(count_points(&objs), 7);
        assert_eq!(
            mask_of(&objs),
            StreamTypeMask::POINTS | StreamTypeMask::RANGE_TABLE
        );
    }

    #[test]
    fn test_dedup_by_identity_keeps_distinct_equal_payloads() {
        let a = points(1);
        let b = points(1);
        let mut list = vec![a.clone(), b.clone(), a.clone(), b, a];
        dedup_by_identity(&mut list);
        assert_eq!(list.len(), 2);
    }
}
