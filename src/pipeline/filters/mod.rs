//! Built-in filter implementations.

pub mod bounding_box;
pub mod composition_profile;
pub mod data_load;
pub mod downsample;
pub mod range_file;
pub mod spectrum_plot;
pub mod voxelise;

pub use bounding_box::BoundingBoxFilter;
pub use composition_profile::{CompositionProfileFilter, ProfileNormalisation};
pub use data_load::{DataLoadFilter, DataSource};
pub use downsample::{DownsampleFilter, DownsampleMode};
pub use range_file::RangeFileFilter;
pub use spectrum_plot::SpectrumPlotFilter;
pub use voxelise::{VoxelNormalisation, VoxeliseFilter};

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{bad_property, PropertyValue, RefreshContext};
use crate::pipeline::stream::SharedStream;
use crate::types::RangeTable;

/// Bytes per point held in a cached point batch.
pub(crate) const BYTES_PER_ION: u64 = std::mem::size_of::<crate::types::Ion>() as u64;

/// Histograms and profiles with more bins than this are rejected.
pub(crate) const MAX_BINS: usize = 1 << 20;

/// Parse a bin width property: finite and strictly positive once narrowed to `f32`.
pub(crate) fn parse_bin_width(key: &str, value: &PropertyValue) -> Result<f32, FilterError> {
    value
        .as_float()
        .map(|v| v as f32)
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| bad_property(key, value))
}

/// Number of bins of `width` covering `extent`, or a code 2 error when the
/// count is not representable or exceeds [`MAX_BINS`].
pub(crate) fn bin_count(extent: f32, width: f32) -> Result<usize, FilterError> {
    let ratio = (extent / width).floor();
    if !(width.is_finite() && width > 0.0)
        || !ratio.is_finite()
        || ratio < 0.0
        || ratio >= MAX_BINS as f32
    {
        return Err(FilterError::specific(
            2,
            format!("bin width {width} is too small for an extent of {extent}"),
        ));
    }
    Ok(ratio as usize + 1)
}

/// Zeroed counter vector, reporting allocation failure instead of aborting.
pub(crate) fn zeroed_counts(len: usize) -> Result<Vec<u64>, FilterError> {
    let mut counts = Vec::new();
    counts
        .try_reserve_exact(len)
        .map_err(|_| FilterError::OutOfMemory)?;
    counts.resize(len, 0u64);
    Ok(counts)
}

/// First range table among the inputs.
pub(crate) fn find_range_table(inputs: &[SharedStream]) -> Option<&RangeTable> {
    inputs.iter().find_map(|o| o.as_range_table())
}

/// Walk every point of every point batch, checking abort and reporting progress
/// once per `ABORT_CHECK_INTERVAL` points.
pub(crate) fn for_each_ion<F>(
    inputs: &[SharedStream],
    ctx: &RefreshContext<'_>,
    mut visit: F,
) -> Result<(), FilterError>
where
    F: FnMut(&SharedStream, &crate::types::Ion),
{
    use crate::pipeline::filter::ABORT_CHECK_INTERVAL;

    let total = crate::pipeline::stream::count_points(inputs).max(1);
    let mut done = 0usize;
    for object in inputs {
        let Some(cloud) = object.as_points() else {
            continue;
        };
        for chunk in cloud.ions.chunks(ABORT_CHECK_INTERVAL) {
            ctx.check_abort()?;
            for ion in chunk {
                visit(object, ion);
            }
            done += chunk.len();
            ctx.set_progress(((done * 100) / total) as u8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_count() {
        assert_eq!(bin_count(0.0, 1.0).unwrap(), 1);
        assert_eq!(bin_count(2.5, 1.0).unwrap(), 3);
        assert!(matches!(
            bin_count(1.0, 1e-9),
            Err(FilterError::Specific { code: 2, .. })
        ));
        assert!(bin_count(1.0, f32::MIN_POSITIVE / 4.0).is_err());
        assert!(bin_count(1.0, 0.0).is_err());
        assert!(bin_count(f32::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_bin_width_underflowing_f32_is_rejected() {
        assert!(parse_bin_width("bin_width", &PropertyValue::Float(1e-60)).is_err());
        assert!(parse_bin_width("bin_width", &PropertyValue::Float(1e60)).is_err());
        assert!(parse_bin_width("bin_width", &PropertyValue::Float(-1.0)).is_err());
        assert_eq!(
            parse_bin_width("bin_width", &PropertyValue::Float(0.25)).unwrap(),
            0.25
        );
    }
}
