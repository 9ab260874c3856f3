//! Plugin filters with configurable masks, for exercising the engine.

use pointvis_rs::pipeline::{
    forward_unblocked, FilterBehavior, FilterError, FilterKind, PropertyValue, RefreshContext,
    SelectionShape, SharedStream, StreamPayload, StreamType, StreamTypeMask,
};
use pointvis_rs::types::{Bounds, Drawable, Ion, Plot1D, Plot2D, PointCloud, RangeTable, VoxelGrid};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Longest a held refresh waits for an abort before carrying on.
const HOLD_LIMIT: Duration = Duration::from_secs(5);

/// Shared view into a probe filter after it has moved into a tree.
#[derive(Debug, Clone, Default)]
pub struct ProbeControl {
    calls: Arc<AtomicUsize>,
    fail: Arc<Mutex<Option<FilterError>>>,
    hold: Arc<AtomicBool>,
}

impl ProbeControl {
    /// Number of times `refresh` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next refresh return `err` after emitting its objects.
    pub fn fail_next(&self, err: FilterError) {
        *self.fail.lock().unwrap() = Some(err);
    }

    /// Make the next refresh spin until the refresh is aborted.
    pub fn hold_next_until_abort(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }
}

/// Emits one object per type in its emit mask and forwards the rest.
#[derive(Debug, Clone)]
pub struct ProbeFilter {
    pub(crate) name: String,
    pub(crate) emit: StreamTypeMask,
    pub(crate) block: StreamTypeMask,
    pub(crate) uses: StreamTypeMask,
    pub(crate) estimate: Option<u64>,
    pub(crate) points: usize,
    pub(crate) value: i64,
    /// Write a console line and a selection device on every refresh.
    pub(crate) reports: bool,
    pub(crate) control: ProbeControl,
}

impl ProbeFilter {
    fn payload(&self, ty: StreamType) -> StreamPayload {
        let bounds = Bounds {
            min: [0.0; 3],
            max: [1.0; 3],
        };
        match ty {
            StreamType::Points => StreamPayload::Points(PointCloud::new(
                (0..self.points)
                    .map(|i| Ion::new([i as f32, 0.0, 0.0], 1.0 + self.value as f32))
                    .collect(),
            )),
            StreamType::Plot1D => StreamPayload::Plot1D(Plot1D {
                title: self.name.clone(),
                ..Default::default()
            }),
            StreamType::Plot2D => StreamPayload::Plot2D(Plot2D::default()),
            StreamType::Drawable => StreamPayload::Drawable(Drawable::Label {
                position: [0.0; 3],
                text: self.name.clone(),
            }),
            StreamType::RangeTable => StreamPayload::RangeTable(RangeTable::default()),
            StreamType::Voxels => StreamPayload::Voxels(VoxelGrid::new([1, 1, 1], bounds)),
        }
    }
}

impl FilterBehavior for ProbeFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::External
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn emit_mask(&self) -> StreamTypeMask {
        self.emit
    }

    fn block_mask(&self) -> StreamTypeMask {
        self.block
    }

    fn use_mask(&self) -> StreamTypeMask {
        self.uses
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        self.control.calls.fetch_add(1, Ordering::SeqCst);
        if self.control.hold.swap(false, Ordering::SeqCst) {
            let start = Instant::now();
            while start.elapsed() < HOLD_LIMIT {
                ctx.check_abort()?;
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        ctx.check_abort()?;
        if self.reports {
            ctx.console(format!("{} refreshed with value {}", self.name, self.value));
            ctx.add_selection_device(
                "value",
                SelectionShape::Sphere {
                    centre: [0.0; 3],
                    radius: 1.0 + self.value as f32,
                },
            );
        }
        let mut out = forward_unblocked(inputs, self.block);
        for ty in self.emit.types() {
            out.push(ctx.emit(self.payload(ty)));
        }
        if let Some(err) = self.control.fail.lock().unwrap().take() {
            return Err(err);
        }
        Ok(out)
    }

    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        self.estimate
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match (key, value.as_int()) {
            ("value", Some(v)) => {
                let changed = v != self.value;
                self.value = v;
                Ok(changed)
            }
            _ => Err(FilterError::specific(1, format!("unknown property '{key}'"))),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        vec![("value".to_string(), PropertyValue::Int(self.value))]
    }
}
