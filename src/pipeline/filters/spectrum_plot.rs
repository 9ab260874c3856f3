//! SpectrumPlotFilter: mass-to-charge histogram of the incoming points.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, forward_unblocked, FilterBehavior, FilterKind, PropertyValue, RefreshContext,
};
use crate::pipeline::filters::{bin_count, for_each_ion, parse_bin_width, zeroed_counts};
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::Plot1D;

#[derive(Debug, Clone)]
pub struct SpectrumPlotFilter {
    bin_width: f32,
    /// Plot `log10(1 + count)` instead of raw counts.
    log_scale: bool,
}

impl SpectrumPlotFilter {
    pub fn new(bin_width: f32) -> Self {
        Self {
            bin_width,
            log_scale: false,
        }
    }

    pub fn bin_width(&self) -> f32 {
        self.bin_width
    }
}

impl Default for SpectrumPlotFilter {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl FilterBehavior for SpectrumPlotFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::SpectrumPlot
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::PLOT_1D
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
        let mut out = forward_unblocked(inputs, self.block_mask());

        ctx.set_step(1, 2);
        let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
        for cloud in inputs.iter().filter_map(|o| o.as_points()) {
            for ion in &cloud.ions {
                lo = lo.min(ion.mass);
                hi = hi.max(ion.mass);
            }
        }
        if lo > hi {
            ctx.console("No points to histogram");
            return Ok(out);
        }

        let bins = bin_count(hi - lo, self.bin_width)?;
        let mut counts = zeroed_counts(bins)?;

        ctx.set_step(2, 2);
        let bin_width = self.bin_width;
        for_each_ion(inputs, ctx, |_, ion| {
            let bin = (((ion.mass - lo) / bin_width) as usize).min(bins - 1);
            counts[bin] += 1;
        })?;

        let points = counts
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let y = if self.log_scale {
                    (1.0 + c as f32).log10()
                } else {
                    c as f32
                };
                [lo + i as f32 * bin_width, y]
            })
            .collect();

        out.push(ctx.emit(StreamPayload::Plot1D(Plot1D {
            title: "Mass spectrum".to_string(),
            x_label: "Mass-to-charge (Da)".to_string(),
            y_label: if self.log_scale { "log10 count" } else { "Count" }.to_string(),
            series: None,
            points,
        })));
        Ok(out)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match key {
            "bin_width" => {
                let v = parse_bin_width(key, value)?;
                let changed = v != self.bin_width;
                self.bin_width = v;
                Ok(changed)
            }
            "log_scale" => {
                let v = value.as_bool().ok_or_else(|| bad_property(key, value))?;
                let changed = v != self.log_scale;
                self.log_scale = v;
                Ok(changed)
            }
            _ => Err(bad_property(key, value)),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        vec![
            (
                "bin_width".to_string(),
                PropertyValue::Float(self.bin_width as f64),
            ),
            ("log_scale".to_string(), PropertyValue::Bool(self.log_scale)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::progress::{AbortHandle, ProgressHandle};
    use crate::pipeline::stream::{StreamObject, StreamType};
    use crate::types::{Ion, PointCloud};

    #[test]
    fn test_histogram_counts() {
        let ions = [1.0, 1.05, 2.0, 3.0]
            .iter()
            .map(|&m| Ion::new([0.0; 3], m))
            .collect();
        let input = StreamObject::detached(StreamPayload::Points(PointCloud::new(ions)));
        let mut filter = SpectrumPlotFilter::new(1.0);
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);

        let out = filter.refresh(&[input], &mut ctx).unwrap();
        // Points are forwarded, the plot is appended.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].stream_type(), StreamType::Points);
        let StreamPayload::Plot1D(plot) = out[1].payload() else {
            panic!("expected a plot");
        };
        let counts: Vec<f32> = plot.points.iter().map(|p| p[1]).collect();
        assert_eq!(counts, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        let mut filter = SpectrumPlotFilter::default();
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);
        assert!(filter.refresh(&[], &mut ctx).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_positive_bin_width() {
        let mut filter = SpectrumPlotFilter::default();
        assert!(filter
            .set_property("bin_width", &PropertyValue::Float(0.0))
            .is_err());
        assert!(filter
            .set_property("bin_width", &PropertyValue::Int(2))
            .unwrap());
        assert_eq!(filter.bin_width(), 2.0);
    }

    fn masses(masses: &[f32]) -> SharedStream {
        let ions = masses.iter().map(|&m| Ion::new([0.0; 3], m)).collect();
        StreamObject::detached(StreamPayload::Points(PointCloud::new(ions)))
    }

    #[test]
    fn test_tiny_bin_width_is_an_error_not_a_panic() {
        let mut filter = SpectrumPlotFilter::default();
        assert!(filter
            .set_property("bin_width", &PropertyValue::Float(1e-60))
            .is_err());
        filter
            .set_property("bin_width", &PropertyValue::Float(1e-9))
            .unwrap();

        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);
        let err = filter.refresh(&[masses(&[1.0, 60.0])], &mut ctx).unwrap_err();
        assert!(matches!(err, FilterError::Specific { code: 2, .. }));
    }

    #[test]
    fn test_reports_bounds_then_binning_step() {
        let mut filter = SpectrumPlotFilter::new(1.0);
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);
        filter.refresh(&[masses(&[1.0, 2.0])], &mut ctx).unwrap();
        let snapshot = progress.snapshot();
        assert_eq!((snapshot.step, snapshot.max_step), (2, 2));
    }
}
