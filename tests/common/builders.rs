//! Test data builders for creating filter trees

use super::probe_filters::{ProbeControl, ProbeFilter};
use pointvis_rs::pipeline::{
    BoundingBoxFilter, DataLoadFilter, DownsampleFilter, FilterId, FilterTree, RangeFileFilter,
    SpectrumPlotFilter, StreamTypeMask, VoxelNormalisation, VoxeliseFilter,
};

/// Builder for a probe filter with chosen masks.
pub struct ProbeBuilder {
    name: String,
    emit: StreamTypeMask,
    block: StreamTypeMask,
    uses: StreamTypeMask,
    estimate: Option<u64>,
    points: usize,
    reports: bool,
}

impl ProbeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            emit: StreamTypeMask::empty(),
            block: StreamTypeMask::empty(),
            uses: StreamTypeMask::empty(),
            estimate: Some(64),
            points: 4,
            reports: false,
        }
    }

    pub fn emits(mut self, mask: StreamTypeMask) -> Self {
        self.emit = mask;
        self
    }

    pub fn blocks(mut self, mask: StreamTypeMask) -> Self {
        self.block = mask;
        self
    }

    pub fn uses(mut self, mask: StreamTypeMask) -> Self {
        self.uses = mask;
        self
    }

    /// `None` makes the filter uncacheable.
    pub fn estimate(mut self, estimate: Option<u64>) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn points(mut self, points: usize) -> Self {
        self.points = points;
        self
    }

    /// Write a console line and a selection device on every refresh.
    pub fn reporting(mut self) -> Self {
        self.reports = true;
        self
    }

    pub fn build(self) -> (ProbeFilter, ProbeControl) {
        let control = ProbeControl::default();
        let filter = ProbeFilter {
            name: self.name,
            emit: self.emit,
            block: self.block,
            uses: self.uses,
            estimate: self.estimate,
            points: self.points,
            value: 0,
            reports: self.reports,
            control: control.clone(),
        };
        (filter, control)
    }

    /// Build and add under `parent`.
    pub fn add(self, tree: &mut FilterTree, parent: Option<FilterId>) -> (FilterId, ProbeControl) {
        let (filter, control) = self.build();
        let id = tree
            .add_filter(parent, pointvis_rs::pipeline::Filter::plugin(filter))
            .unwrap();
        (id, control)
    }
}

/// Ids of the filters in [`lattice_tree`].
pub struct LatticeIds {
    pub load: FilterId,
    pub down: FilterId,
    pub range: FilterId,
    pub spectrum: FilterId,
    pub voxels: FilterId,
    pub bbox: FilterId,
}

/// A realistic tree of built-in filters:
///
/// ```text
/// load ─┬─ down ─┬─ voxels
///       │        └─ bbox
///       └─ range ── spectrum
/// ```
pub fn lattice_tree(points: usize) -> (FilterTree, LatticeIds) {
    let mut tree = FilterTree::new();
    let load = tree
        .add_filter(None, DataLoadFilter::lattice(points, 0.5, vec![1.0, 2.0, 3.0]))
        .unwrap();
    let down = tree
        .add_filter(Some(load), DownsampleFilter::fraction(0.5))
        .unwrap();
    let voxels = tree
        .add_filter(Some(down), VoxeliseFilter::new(4, VoxelNormalisation::Count))
        .unwrap();
    let bbox = tree
        .add_filter(Some(down), BoundingBoxFilter::default())
        .unwrap();
    let range = tree
        .add_filter(
            Some(load),
            RangeFileFilter::new(
                pointvis_rs::types::RangeTable::new(vec![
                    pointvis_rs::types::IonRange::new("A", 0.5, 1.5),
                    pointvis_rs::types::IonRange::new("B", 1.5, 2.5),
                ]),
            ),
        )
        .unwrap();
    let spectrum = tree
        .add_filter(Some(range), SpectrumPlotFilter::new(0.1))
        .unwrap();
    (
        tree,
        LatticeIds {
            load,
            down,
            range,
            spectrum,
            voxels,
            bbox,
        },
    )
}
