//! Factory for default-configured built-in filters.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{Filter, FilterBehavior, FilterKind, PropertyValue};
use crate::pipeline::filters::{
    BoundingBoxFilter, CompositionProfileFilter, DataLoadFilter, DownsampleFilter,
    RangeFileFilter, SpectrumPlotFilter, VoxeliseFilter,
};

/// Creates filters by kind.
///
/// `External` kinds cannot be created here; the embedding application builds
/// them itself and wraps them with [`Filter::plugin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterFactory;

impl FilterFactory {
    pub fn create(kind: FilterKind) -> Result<Filter, FilterError> {
        let filter = match kind {
            FilterKind::DataLoad => Filter::from(DataLoadFilter::default()),
            FilterKind::Downsample => Filter::from(DownsampleFilter::default()),
            FilterKind::RangeFile => Filter::from(RangeFileFilter::default()),
            FilterKind::SpectrumPlot => Filter::from(SpectrumPlotFilter::default()),
            FilterKind::Voxelise => Filter::from(VoxeliseFilter::default()),
            FilterKind::BoundingBox => Filter::from(BoundingBoxFilter::default()),
            FilterKind::CompositionProfile => Filter::from(CompositionProfileFilter::default()),
            FilterKind::External => {
                return Err(FilterError::specific(
                    3,
                    "external filters are supplied by the host application",
                ))
            }
        };
        Ok(filter)
    }

    /// Create and apply `properties` in order; the first rejected value fails
    /// the whole call.
    pub fn create_with_properties<'a, I>(kind: FilterKind, properties: I) -> Result<Filter, FilterError>
    where
        I: IntoIterator<Item = (&'a str, &'a PropertyValue)>,
    {
        let mut filter = Self::create(kind)?;
        for (key, value) in properties {
            filter.set_property(key, value)?;
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_kind_is_constructible() {
        for &kind in FilterKind::builtin() {
            let filter = FilterFactory::create(kind).unwrap();
            assert_eq!(filter.kind(), kind);
            // Defaults must round-trip through their own property list.
            let props = filter.properties();
            let copy = FilterFactory::create_with_properties(
                kind,
                props.iter().map(|(k, v)| (k.as_str(), v)),
            )
            .unwrap();
            assert_eq!(copy.properties(), props);
        }
        assert!(FilterFactory::create(FilterKind::External).is_err());
    }

    #[test]
    fn test_bad_property_fails_creation() {
        let value = PropertyValue::Text("fast".into());
        let err = FilterFactory::create_with_properties(
            FilterKind::Downsample,
            [("fraction", &value)],
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Specific { code: 1, .. }));
    }
}
