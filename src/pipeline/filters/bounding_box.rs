//! BoundingBoxFilter: axis-aligned box around the incoming points.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, forward_unblocked, FilterBehavior, FilterKind, PropertyValue, RefreshContext,
};
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Bounds, Drawable};

#[derive(Debug, Clone, Default)]
pub struct BoundingBoxFilter {
    /// One box per point batch instead of one around everything.
    per_batch: bool,
    /// Add a label with the box dimensions at the max corner.
    show_label: bool,
}

impl BoundingBoxFilter {
    pub fn per_batch(mut self) -> Self {
        self.per_batch = true;
        self
    }
}

fn label_for(bounds: &Bounds) -> Drawable {
    Drawable::Label {
        position: bounds.max,
        text: format!(
            "{:.1} x {:.1} x {:.1} nm",
            bounds.extent(0),
            bounds.extent(1),
            bounds.extent(2)
        ),
    }
}

impl FilterBehavior for BoundingBoxFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::BoundingBox
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::DRAWABLE
    }

    fn block_mask(&self) -> StreamTypeMask {
        StreamTypeMask::empty()
    }

    fn use_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        ctx.check_abort()?;
        let mut out = forward_unblocked(inputs, self.block_mask());

        let per_batch: Vec<Bounds> = inputs
            .iter()
            .filter_map(|o| o.as_points().and_then(|c| c.bounds()))
            .collect();
        let boxes = if self.per_batch {
            per_batch
        } else {
            per_batch
                .into_iter()
                .reduce(|a, b| a.union(&b))
                .into_iter()
                .collect()
        };

        for bounds in &boxes {
            out.push(ctx.emit(StreamPayload::Drawable(Drawable::BoundingBox {
                min: bounds.min,
                max: bounds.max,
            })));
            if self.show_label {
                out.push(ctx.emit(StreamPayload::Drawable(label_for(bounds))));
            }
        }
        ctx.set_progress(100);
        Ok(out)
    }

    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        Some(2 * std::mem::size_of::<Drawable>() as u64)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        let v = value.as_bool().ok_or_else(|| bad_property(key, value))?;
        let slot = match key {
            "per_batch" => &mut self.per_batch,
            "show_label" => &mut self.show_label,
            _ => return Err(bad_property(key, value)),
        };
        let changed = *slot != v;
        *slot = v;
        Ok(changed)
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        vec![
            ("per_batch".to_string(), PropertyValue::Bool(self.per_batch)),
            ("show_label".to_string(), PropertyValue::Bool(self.show_label)),
        ]
    }
}
