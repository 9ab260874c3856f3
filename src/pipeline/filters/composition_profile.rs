//! CompositionProfileFilter: per-species fractions in slabs along one axis.
//!
//! Needs a range table from a `RangeFile` ancestor to know the species. One
//! `Plot1D` series is emitted per species, plus one for unranged points when
//! `include_unranged` is set.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, forward_unblocked, FilterBehavior, FilterKind, PropertyValue, RefreshContext,
    SelectionShape,
};
use crate::pipeline::filters::{
    bin_count, find_range_table, for_each_ion, parse_bin_width, zeroed_counts, MAX_BINS,
};
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Bounds, Plot1D};
use serde::{Deserialize, Serialize};

const UNRANGED_SERIES: &str = "Unranged";

/// Value plotted per slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileNormalisation {
    /// Share of the slab's points belonging to the species.
    Fraction,
    /// Species points per unit slab volume.
    Density,
}

#[derive(Debug, Clone)]
pub struct CompositionProfileFilter {
    /// 0 = x, 1 = y, 2 = z.
    axis: usize,
    bin_width: f32,
    normalisation: ProfileNormalisation,
    include_unranged: bool,
}

impl CompositionProfileFilter {
    pub fn new(axis: usize, bin_width: f32) -> Self {
        Self {
            axis: axis.min(2),
            bin_width,
            normalisation: ProfileNormalisation::Fraction,
            include_unranged: false,
        }
    }

    pub fn with_normalisation(mut self, normalisation: ProfileNormalisation) -> Self {
        self.normalisation = normalisation;
        self
    }

    pub fn including_unranged(mut self) -> Self {
        self.include_unranged = true;
        self
    }

    fn axis_normal(&self) -> [f32; 3] {
        let mut n = [0.0; 3];
        n[self.axis] = 1.0;
        n
    }
}

impl Default for CompositionProfileFilter {
    fn default() -> Self {
        Self::new(2, 1.0)
    }
}

impl FilterBehavior for CompositionProfileFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::CompositionProfile
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::PLOT_1D
    }

    fn block_mask(&self) -> StreamTypeMask {
        StreamTypeMask::empty()
    }

    fn use_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS | StreamTypeMask::RANGE_TABLE
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        let mut out = forward_unblocked(inputs, self.block_mask());

        let Some(table) = find_range_table(inputs) else {
            ctx.console("No range table upstream; profile skipped");
            return Ok(out);
        };
        ctx.set_step(1, 2);
        let bounds = inputs
            .iter()
            .filter_map(|o| o.as_points().and_then(|c| c.bounds()))
            .reduce(|a, b| a.union(&b));
        let Some(bounds) = bounds else {
            ctx.console("No points to profile");
            return Ok(out);
        };

        let species = table.species_names();
        let series = species.len() + 1;
        let origin = bounds.min[self.axis];
        let bins = bin_count(bounds.extent(self.axis), self.bin_width)?;
        let cells = bins
            .checked_mul(series)
            .filter(|n| *n <= MAX_BINS)
            .ok_or_else(|| {
                FilterError::specific(2, format!("{bins} bins x {series} series is too many"))
            })?;

        // counts[bin * series + s]; the last series slot holds unranged points.
        let mut counts = zeroed_counts(cells)?;
        ctx.set_step(2, 2);
        let (axis, bin_width) = (self.axis, self.bin_width);
        for_each_ion(inputs, ctx, |_, ion| {
            let bin = (((ion.position[axis] - origin) / bin_width) as usize).min(bins - 1);
            let slot = table
                .species_of(ion.mass)
                .and_then(|r| species.iter().position(|s| *s == table.ranges[r].name))
                .unwrap_or(series - 1);
            counts[bin * series + slot] += 1;
        })?;

        let slab_volume = slab_volume(&bounds, self.axis, self.bin_width);
        let mut names: Vec<&str> = species.clone();
        if self.include_unranged {
            names.push(UNRANGED_SERIES);
        }

        for (s, name) in names.iter().enumerate() {
            let points = (0..bins)
                .map(|b| {
                    let row = &counts[b * series..(b + 1) * series];
                    let considered: u64 = if self.include_unranged {
                        row.iter().sum()
                    } else {
                        row[..series - 1].iter().sum()
                    };
                    let value = match self.normalisation {
                        ProfileNormalisation::Fraction if considered > 0 => {
                            row[s] as f32 / considered as f32
                        }
                        ProfileNormalisation::Fraction => 0.0,
                        ProfileNormalisation::Density if slab_volume > 0.0 => {
                            row[s] as f32 / slab_volume
                        }
                        ProfileNormalisation::Density => row[s] as f32,
                    };
                    [origin + (b as f32 + 0.5) * bin_width, value]
                })
                .collect();
            out.push(ctx.emit(StreamPayload::Plot1D(Plot1D {
                title: "Composition profile".to_string(),
                x_label: format!("{} (nm)", ["x", "y", "z"][self.axis]),
                y_label: match self.normalisation {
                    ProfileNormalisation::Fraction => "Fraction",
                    ProfileNormalisation::Density => "Density (nm^-3)",
                }
                .to_string(),
                series: Some(name.to_string()),
                points,
            })));
        }

        ctx.add_selection_device(
            "axis",
            SelectionShape::Plane {
                origin: bounds.min,
                normal: self.axis_normal(),
            },
        );
        Ok(out)
    }

    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        // Bin count depends on the data extent.
        None
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match key {
            "axis" => {
                let v = value
                    .as_int()
                    .filter(|v| (0..3).contains(v))
                    .ok_or_else(|| bad_property(key, value))? as usize;
                let changed = v != self.axis;
                self.axis = v;
                Ok(changed)
            }
            "bin_width" => {
                let v = parse_bin_width(key, value)?;
                let changed = v != self.bin_width;
                self.bin_width = v;
                Ok(changed)
            }
            "normalisation" => {
                let v = match value.as_str() {
                    Some("fraction") => ProfileNormalisation::Fraction,
                    Some("density") => ProfileNormalisation::Density,
                    _ => return Err(bad_property(key, value)),
                };
                let changed = v != self.normalisation;
                self.normalisation = v;
                Ok(changed)
            }
            "include_unranged" => {
                let v = value.as_bool().ok_or_else(|| bad_property(key, value))?;
                let changed = v != self.include_unranged;
                self.include_unranged = v;
                Ok(changed)
            }
            _ => Err(bad_property(key, value)),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        let normalisation = match self.normalisation {
            ProfileNormalisation::Fraction => "fraction",
            ProfileNormalisation::Density => "density",
        };
        vec![
            ("axis".to_string(), PropertyValue::Int(self.axis as i64)),
            (
                "bin_width".to_string(),
                PropertyValue::Float(self.bin_width as f64),
            ),
            (
                "normalisation".to_string(),
                PropertyValue::Text(normalisation.to_string()),
            ),
            (
                "include_unranged".to_string(),
                PropertyValue::Bool(self.include_unranged),
            ),
        ]
    }

    fn density_sensitive(&self, _ranged: bool) -> bool {
        self.normalisation == ProfileNormalisation::Density
    }

    fn composition_sensitive(&self, ranged: bool) -> bool {
        ranged
    }

    fn required_ancestor(&self) -> Option<FilterKind> {
        Some(FilterKind::RangeFile)
    }

    fn needs_unranged(&self) -> bool {
        self.include_unranged
    }
}

/// Volume of one slab of `bin_width` along `axis` across the other two extents.
fn slab_volume(bounds: &Bounds, axis: usize, bin_width: f32) -> f32 {
    (0..3)
        .filter(|a| *a != axis)
        .map(|a| bounds.extent(a))
        .product::<f32>()
        * bin_width
}
