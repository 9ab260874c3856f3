//! Filter abstraction for the tree.
//!
//! Two-layer design:
//! - **`FilterBehavior` trait**: the contract the engine relies on, and the
//!   extension point for user-defined filters.
//! - **`Filter` enum**: all built-in filters plus a `Plugin` variant. Match arms
//!   dispatch statically for built-ins, so each kind's masks are visible at the
//!   definition site.
//!
//! The engine never looks at filter internals; it reasons through the masks
//! and the analysis declarations, and calls `refresh` with a `RefreshContext`
//! that carries the abort flag, the progress record and the caching decision.

use crate::pipeline::error::FilterError;
use crate::pipeline::filters::{
    BoundingBoxFilter, CompositionProfileFilter, DataLoadFilter, DownsampleFilter,
    RangeFileFilter, SpectrumPlotFilter, VoxeliseFilter,
};
use crate::pipeline::id::FilterId;
use crate::pipeline::progress::{AbortHandle, ProgressHandle};
use crate::pipeline::stream::{SharedStream, StreamObject, StreamPayload, StreamTypeMask};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of points a filter processes between abort checks.
pub const ABORT_CHECK_INTERVAL: usize = 4096;

/// Kinds of filter known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    /// Point cloud source.
    DataLoad,
    /// Keeps a fraction or fixed number of points.
    Downsample,
    /// Assigns points to species by mass range.
    RangeFile,
    /// Mass-to-charge histogram.
    SpectrumPlot,
    /// Bins points onto a regular 3D grid.
    Voxelise,
    /// Axis-aligned box around the incoming points.
    BoundingBox,
    /// Per-species fractions along one axis.
    CompositionProfile,
    /// Filter supplied by the embedding application.
    External,
}

impl FilterKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            FilterKind::DataLoad => "Data Load",
            FilterKind::Downsample => "Downsample",
            FilterKind::RangeFile => "Range File",
            FilterKind::SpectrumPlot => "Spectrum Plot",
            FilterKind::Voxelise => "Voxelise",
            FilterKind::BoundingBox => "Bounding Box",
            FilterKind::CompositionProfile => "Composition Profile",
            FilterKind::External => "External",
        }
    }

    /// Built-in kinds the factory can create.
    pub fn builtin() -> &'static [FilterKind] {
        &[
            FilterKind::DataLoad,
            FilterKind::Downsample,
            FilterKind::RangeFile,
            FilterKind::SpectrumPlot,
            FilterKind::Voxelise,
            FilterKind::BoundingBox,
            FilterKind::CompositionProfile,
        ]
    }

    pub fn description(&self) -> &'static str {
        match self {
            FilterKind::DataLoad => "Provides the point cloud that feeds the tree.",
            FilterKind::Downsample => {
                "Keeps a fraction or a fixed number of points.\n\
                 Per-species mode keeps a different fraction per range."
            }
            FilterKind::RangeFile => {
                "Assigns points to species by mass range.\n\
                 Optionally drops points outside every range."
            }
            FilterKind::SpectrumPlot => "Histogram of mass-to-charge values.",
            FilterKind::Voxelise => "Counts or densities on a regular 3D grid.",
            FilterKind::BoundingBox => "Draws the axis-aligned bounds of the points.",
            FilterKind::CompositionProfile => {
                "Species fractions in slabs along one axis.\n\
                 Requires a Range File upstream."
            }
            FilterKind::External => "Filter provided outside the engine.",
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Value of a filter property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and integers widened to float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// Build the error a filter returns for a property it cannot accept.
pub fn bad_property(key: &str, value: &PropertyValue) -> FilterError {
    FilterError::specific(1, format!("invalid value {value} for property '{key}'"))
}

/// Shape of an interactive handle the UI may attach to a filter property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SelectionShape {
    Sphere { centre: [f32; 3], radius: f32 },
    Box { min: [f32; 3], max: [f32; 3] },
    Plane { origin: [f32; 3], normal: [f32; 3] },
}

/// Interaction handle produced during refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionDevice {
    pub filter: FilterId,
    /// Property updated when the user drags the device.
    pub property: String,
    pub shape: SelectionShape,
}

/// Console line produced by a filter during refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMessage {
    pub filter: FilterId,
    pub message: String,
}

/// Per-call context handed to `FilterBehavior::refresh`.
pub struct RefreshContext<'a> {
    filter: FilterId,
    caching: bool,
    abort: &'a AbortHandle,
    progress: &'a ProgressHandle,
    console: Vec<String>,
    devices: Vec<SelectionDevice>,
    allocated_uncached: usize,
}

impl<'a> RefreshContext<'a> {
    pub fn new(
        filter: FilterId,
        caching: bool,
        abort: &'a AbortHandle,
        progress: &'a ProgressHandle,
    ) -> Self {
        Self {
            filter,
            caching,
            abort,
            progress,
            console: Vec::new(),
            devices: Vec::new(),
            allocated_uncached: 0,
        }
    }

    /// Allocate a new output object owned by the refreshing filter.
    ///
    /// The object is marked cached when the scheduler enabled caching for this
    /// filter; the scheduler then keeps it in the filter's cache.
    pub fn emit(&mut self, payload: StreamPayload) -> SharedStream {
        if !self.caching {
            self.allocated_uncached += 1;
        }
        Arc::new(StreamObject::new(payload, self.filter, self.caching))
    }

    #[inline]
    pub fn should_abort(&self) -> bool {
        self.abort.is_requested()
    }

    /// `Err(Aborted)` when cancellation was requested.
    #[inline]
    pub fn check_abort(&self) -> Result<(), FilterError> {
        if self.should_abort() {
            Err(FilterError::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn set_progress(&self, percent: u8) {
        self.progress.set_filter_percent(percent);
    }

    pub fn set_step(&self, step: u32, max_step: u32) {
        self.progress.set_step(step, max_step);
    }

    pub fn console(&mut self, message: impl Into<String>) {
        self.console.push(message.into());
    }

    pub fn add_selection_device(&mut self, property: impl Into<String>, shape: SelectionShape) {
        self.devices.push(SelectionDevice {
            filter: self.filter,
            property: property.into(),
            shape,
        });
    }

    pub fn filter(&self) -> FilterId {
        self.filter
    }

    pub fn is_caching(&self) -> bool {
        self.caching
    }

    pub(crate) fn allocated_uncached(&self) -> usize {
        self.allocated_uncached
    }

    pub(crate) fn into_outputs(self) -> (Vec<String>, Vec<SelectionDevice>) {
        (self.console, self.devices)
    }
}

/// Context for the structural init pass. Objects made here are never cached.
pub struct InitContext {
    filter: FilterId,
}

impl InitContext {
    pub(crate) fn new(filter: FilterId) -> Self {
        Self { filter }
    }

    pub fn emit(&self, payload: StreamPayload) -> SharedStream {
        Arc::new(StreamObject::new(payload, self.filter, false))
    }
}

/// Inputs whose type is not in `block`, as new handles.
pub fn forward_unblocked(inputs: &[SharedStream], block: StreamTypeMask) -> Vec<SharedStream> {
    inputs
        .iter()
        .filter(|o| !block.contains(o.stream_type().mask()))
        .cloned()
        .collect()
}

/// The contract every filter implements.
///
/// Masks are static declarations: they must hold for any data and agree with
/// what `refresh` does, since refresh skipping and tree analysis rely on them.
pub trait FilterBehavior: Send {
    fn kind(&self) -> FilterKind;

    fn name(&self) -> &str {
        self.kind().display_name()
    }

    /// Types this filter can produce.
    fn emit_mask(&self) -> StreamTypeMask;

    /// Incoming types consumed without being forwarded.
    fn block_mask(&self) -> StreamTypeMask;

    /// Incoming types required to do useful work.
    fn use_mask(&self) -> StreamTypeMask;

    /// Compute outputs from `inputs`: every unblocked input forwarded, plus new
    /// objects allocated through `ctx.emit`. Must not retain `inputs`.
    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError>;

    /// Structural bookkeeping after a topology change, independent of data.
    fn init_structure(
        &mut self,
        upstream: &[SharedStream],
        _ctx: &InitContext,
    ) -> Vec<SharedStream> {
        forward_unblocked(upstream, self.block_mask())
    }

    /// Bytes the cache would need for `input_points` incoming points.
    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        None
    }

    /// Duplicate the configuration, never the cache.
    fn clone_uncached(&self) -> Box<dyn FilterBehavior>;

    /// Apply a property. `Ok(true)` when the change needs a refresh.
    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError>;

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        Vec::new()
    }

    /// Output point density no longer reflects the input.
    fn alters_density(&self) -> bool {
        false
    }

    /// Output species ratios no longer reflect the input.
    fn alters_composition(&self) -> bool {
        false
    }

    /// Result depends on point density. `ranged` is true below a range file.
    fn density_sensitive(&self, _ranged: bool) -> bool {
        false
    }

    /// Result depends on species ratios.
    fn composition_sensitive(&self, _ranged: bool) -> bool {
        false
    }

    fn required_ancestor(&self) -> Option<FilterKind> {
        None
    }

    /// Discards points that fall outside every range.
    fn drops_unranged(&self) -> bool {
        false
    }

    /// Expects points outside every range to reach it.
    fn needs_unranged(&self) -> bool {
        false
    }
}

/// Built-in filters plus user plugins.
pub enum Filter {
    DataLoad(DataLoadFilter),
    Downsample(DownsampleFilter),
    RangeFile(RangeFileFilter),
    SpectrumPlot(SpectrumPlotFilter),
    Voxelise(VoxeliseFilter),
    BoundingBox(BoundingBoxFilter),
    CompositionProfile(CompositionProfileFilter),
    Plugin(Box<dyn FilterBehavior>),
}

macro_rules! dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            Filter::DataLoad($f) => $body,
            Filter::Downsample($f) => $body,
            Filter::RangeFile($f) => $body,
            Filter::SpectrumPlot($f) => $body,
            Filter::Voxelise($f) => $body,
            Filter::BoundingBox($f) => $body,
            Filter::CompositionProfile($f) => $body,
            Filter::Plugin($f) => $body,
        }
    };
}

macro_rules! impl_from_builtin {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(impl From<$ty> for Filter {
            fn from(f: $ty) -> Self {
                Filter::$variant(f)
            }
        })*
    };
}

impl_from_builtin! {
    DataLoad => DataLoadFilter,
    Downsample => DownsampleFilter,
    RangeFile => RangeFileFilter,
    SpectrumPlot => SpectrumPlotFilter,
    Voxelise => VoxeliseFilter,
    BoundingBox => BoundingBoxFilter,
    CompositionProfile => CompositionProfileFilter,
}

impl Filter {
    pub fn plugin(behavior: impl FilterBehavior + 'static) -> Self {
        Filter::Plugin(Box::new(behavior))
    }

    /// Configuration-only copy.
    pub fn duplicate(&self) -> Filter {
        match self {
            Filter::DataLoad(f) => Filter::DataLoad(f.clone()),
            Filter::Downsample(f) => Filter::Downsample(f.clone()),
            Filter::RangeFile(f) => Filter::RangeFile(f.clone()),
            Filter::SpectrumPlot(f) => Filter::SpectrumPlot(f.clone()),
            Filter::Voxelise(f) => Filter::Voxelise(f.clone()),
            Filter::BoundingBox(f) => Filter::BoundingBox(f.clone()),
            Filter::CompositionProfile(f) => Filter::CompositionProfile(f.clone()),
            Filter::Plugin(f) => Filter::Plugin(f.clone_uncached()),
        }
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl FilterBehavior for Filter {
    fn kind(&self) -> FilterKind {
        dispatch!(self, f => f.kind())
    }

    fn name(&self) -> &str {
        dispatch!(self, f => f.name())
    }

    fn emit_mask(&self) -> StreamTypeMask {
        dispatch!(self, f => f.emit_mask())
    }

    fn block_mask(&self) -> StreamTypeMask {
        dispatch!(self, f => f.block_mask())
    }

    fn use_mask(&self) -> StreamTypeMask {
        dispatch!(self, f => f.use_mask())
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        dispatch!(self, f => f.refresh(inputs, ctx))
    }

    fn init_structure(&mut self, upstream: &[SharedStream], ctx: &InitContext) -> Vec<SharedStream> {
        dispatch!(self, f => f.init_structure(upstream, ctx))
    }

    fn cache_size_estimate(&self, input_points: usize) -> Option<u64> {
        dispatch!(self, f => f.cache_size_estimate(input_points))
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.duplicate())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        dispatch!(self, f => f.set_property(key, value))
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        dispatch!(self, f => f.properties())
    }

    fn alters_density(&self) -> bool {
        dispatch!(self, f => f.alters_density())
    }

    fn alters_composition(&self) -> bool {
        dispatch!(self, f => f.alters_composition())
    }

    fn density_sensitive(&self, ranged: bool) -> bool {
        dispatch!(self, f => f.density_sensitive(ranged))
    }

    fn composition_sensitive(&self, ranged: bool) -> bool {
        dispatch!(self, f => f.composition_sensitive(ranged))
    }

    fn required_ancestor(&self) -> Option<FilterKind> {
        dispatch!(self, f => f.required_ancestor())
    }

    fn drops_unranged(&self) -> bool {
        dispatch!(self, f => f.drops_unranged())
    }

    fn needs_unranged(&self) -> bool {
        dispatch!(self, f => f.needs_unranged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointCloud;

    #[test]
    fn test_property_value_accessors() {
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::Int(4).as_int(), Some(4));
        assert_eq!(PropertyValue::Int(4).as_float(), Some(4.0));
        assert_eq!(PropertyValue::Float(0.5).as_float(), Some(0.5));
        assert_eq!(PropertyValue::Text("x".into()).as_str(), Some("x"));
        assert_eq!(PropertyValue::Text("x".into()).as_bool(), None);
    }

    #[test]
    fn test_context_marks_cached_outputs() {
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();

        let mut ctx = RefreshContext::new(FilterId(2), true, &abort, &progress);
        let obj = ctx.emit(StreamPayload::Points(PointCloud::default()));
        assert!(obj.is_cached());
        assert_eq!(obj.owner(), FilterId(2));
        assert_eq!(ctx.allocated_uncached(), 0);

        let mut ctx = RefreshContext::new(FilterId(2), false, &abort, &progress);
        let obj = ctx.emit(StreamPayload::Points(PointCloud::default()));
        assert!(!obj.is_cached());
        assert_eq!(ctx.allocated_uncached(), 1);

        abort.request();
        assert_eq!(ctx.check_abort(), Err(FilterError::Aborted));
    }

    #[test]
    fn test_forward_unblocked() {
        let pts = StreamObject::detached(StreamPayload::Points(PointCloud::default()));
        let rng = StreamObject::detached(StreamPayload::RangeTable(Default::default()));
        let out = forward_unblocked(&[pts, rng.clone()], StreamTypeMask::POINTS);
        assert_eq!(out.len(), 1);
        assert!(Arc::ptr_eq(&out[0], &rng));
    }

    #[test]
    fn test_duplicate_keeps_kind() {
        let original = Filter::from(DownsampleFilter::fraction(0.25));
        let copy = original.duplicate();
        assert_eq!(copy.kind(), FilterKind::Downsample);
        assert_eq!(copy.properties(), original.properties());
    }
}
