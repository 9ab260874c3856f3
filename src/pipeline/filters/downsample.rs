//! DownsampleFilter: keeps a subset of the incoming points.
//!
//! Selection is deterministic: the n-th point of a category is kept when the
//! running kept-count falls behind `fraction * seen`. Per-species mode applies
//! a separate fraction to each range, which changes the composition of the
//! output, so the tree analyser treats the two modes differently.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, FilterBehavior, FilterKind, PropertyValue, RefreshContext,
};
use crate::pipeline::filters::{find_range_table, for_each_ion, BYTES_PER_ION};
use crate::pipeline::stream::{count_points, SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Ion, PointCloud};
use std::collections::HashMap;

/// How many points to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownsampleMode {
    /// Keep this fraction of the points, in `[0, 1]`.
    Fraction(f32),
    /// Keep at most this many points.
    FixedCount(usize),
}

/// Evenly spaced keep/drop decisions for one category of points.
#[derive(Debug, Clone, Copy)]
struct Thinner {
    fraction: f64,
    seen: u64,
    kept: u64,
}

impl Thinner {
    fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            seen: 0,
            kept: 0,
        }
    }

    fn keep(&mut self) -> bool {
        self.seen += 1;
        let target = (self.seen as f64 * self.fraction).floor() as u64;
        if target > self.kept {
            self.kept += 1;
            true
        } else {
            false
        }
    }
}

/// Downsample filter.
#[derive(Debug, Clone)]
pub struct DownsampleFilter {
    mode: DownsampleMode,
    /// Per-species fractions; enabled when `per_species` is set.
    per_species: bool,
    species_fractions: Vec<(String, f32)>,
}

impl DownsampleFilter {
    pub fn fraction(fraction: f32) -> Self {
        Self {
            mode: DownsampleMode::Fraction(fraction.clamp(0.0, 1.0)),
            per_species: false,
            species_fractions: Vec::new(),
        }
    }

    pub fn fixed_count(count: usize) -> Self {
        Self {
            mode: DownsampleMode::FixedCount(count),
            per_species: false,
            species_fractions: Vec::new(),
        }
    }

    /// Per-species fractions; species not listed use the base fraction.
    pub fn per_species(base: f32, fractions: Vec<(String, f32)>) -> Self {
        Self {
            mode: DownsampleMode::Fraction(base.clamp(0.0, 1.0)),
            per_species: true,
            species_fractions: fractions,
        }
    }

    pub fn mode(&self) -> DownsampleMode {
        self.mode
    }

    fn base_fraction(&self, input_points: usize) -> f64 {
        match self.mode {
            DownsampleMode::Fraction(f) => f as f64,
            DownsampleMode::FixedCount(n) if input_points > 0 => {
                (n as f64 / input_points as f64).min(1.0)
            }
            DownsampleMode::FixedCount(_) => 1.0,
        }
    }

    fn species_fraction(&self, name: Option<&str>, base: f64) -> f64 {
        name.and_then(|n| {
            self.species_fractions
                .iter()
                .find(|(s, _)| s == n)
                .map(|(_, f)| *f as f64)
        })
        .unwrap_or(base)
    }
}

impl Default for DownsampleFilter {
    fn default() -> Self {
        Self::fraction(0.1)
    }
}

/// Parse `"Fe:0.5,Cr:1"`.
fn parse_species_fractions(text: &str) -> Option<Vec<(String, f32)>> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|part| {
            let (name, frac) = part.split_once(':')?;
            let frac: f32 = frac.trim().parse().ok()?;
            (0.0..=1.0)
                .contains(&frac)
                .then(|| (name.trim().to_string(), frac))
        })
        .collect()
}

impl FilterBehavior for DownsampleFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Downsample
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn block_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn use_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        let total = count_points(inputs);
        let base = self.base_fraction(total);
        let table = if self.per_species {
            find_range_table(inputs)
        } else {
            None
        };
        if self.per_species && table.is_none() {
            ctx.console("No range table upstream; per-species fractions ignored");
        }

        // One output batch per input batch, so species tags survive.
        let mut batches: Vec<Vec<Ion>> = Vec::new();
        let mut batch_of: HashMap<usize, usize> = HashMap::new();
        let mut thinners: HashMap<Option<usize>, Thinner> = HashMap::new();

        for_each_ion(inputs, ctx, |object, ion| {
            let species = table.and_then(|t| t.species_of(ion.mass));
            let thinner = thinners.entry(species).or_insert_with(|| {
                let name = species.and_then(|i| table.map(|t| t.ranges[i].name.as_str()));
                Thinner::new(self.species_fraction(name, base))
            });
            if thinner.keep() {
                let key = std::sync::Arc::as_ptr(object) as usize;
                let slot = *batch_of.entry(key).or_insert_with(|| {
                    batches.push(Vec::new());
                    batches.len() - 1
                });
                batches[slot].push(*ion);
            }
        })?;

        let mut out = crate::pipeline::filter::forward_unblocked(inputs, self.block_mask());
        let mut kept = 0;
        for object in inputs {
            let Some(cloud) = object.as_points() else {
                continue;
            };
            let key = std::sync::Arc::as_ptr(object) as usize;
            let ions = batch_of
                .get(&key)
                .map(|&i| std::mem::take(&mut batches[i]))
                .unwrap_or_default();
            kept += ions.len();
            out.push(ctx.emit(StreamPayload::Points(PointCloud {
                ions,
                species: cloud.species.clone(),
            })));
        }

        ctx.console(format!("Kept {kept} of {total} points"));
        Ok(out)
    }

    fn cache_size_estimate(&self, input_points: usize) -> Option<u64> {
        let kept = match self.mode {
            DownsampleMode::Fraction(f) => (input_points as f64 * f as f64).ceil() as u64,
            DownsampleMode::FixedCount(n) => n.min(input_points) as u64,
        };
        Some(kept * BYTES_PER_ION)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        let before = (self.mode, self.per_species, self.species_fractions.clone());
        match key {
            "fraction" => {
                let f = value
                    .as_float()
                    .filter(|f| (0.0..=1.0).contains(f))
                    .ok_or_else(|| bad_property(key, value))?;
                self.mode = DownsampleMode::Fraction(f as f32);
            }
            "count" => {
                let n = value
                    .as_int()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| bad_property(key, value))?;
                self.mode = DownsampleMode::FixedCount(n as usize);
            }
            "per_species" => {
                self.per_species = value.as_bool().ok_or_else(|| bad_property(key, value))?;
            }
            "species_fractions" => {
                self.species_fractions = value
                    .as_str()
                    .and_then(parse_species_fractions)
                    .ok_or_else(|| bad_property(key, value))?;
            }
            _ => return Err(bad_property(key, value)),
        }
        Ok(before != (self.mode, self.per_species, self.species_fractions.clone()))
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        let mut props = match self.mode {
            DownsampleMode::Fraction(f) => {
                vec![("fraction".to_string(), PropertyValue::Float(f as f64))]
            }
            DownsampleMode::FixedCount(n) => {
                vec![("count".to_string(), PropertyValue::Int(n as i64))]
            }
        };
        props.push((
            "per_species".to_string(),
            PropertyValue::Bool(self.per_species),
        ));
        if !self.species_fractions.is_empty() {
            let text = self
                .species_fractions
                .iter()
                .map(|(s, f)| format!("{s}:{f}"))
                .collect::<Vec<_>>()
                .join(",");
            props.push(("species_fractions".to_string(), PropertyValue::Text(text)));
        }
        props
    }

    fn alters_density(&self) -> bool {
        match self.mode {
            DownsampleMode::Fraction(f) => f < 1.0,
            DownsampleMode::FixedCount(_) => true,
        }
    }

    fn alters_composition(&self) -> bool {
        self.per_species && !self.species_fractions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::progress::{AbortHandle, ProgressHandle};
    use crate::pipeline::stream::StreamObject;
    use crate::types::{IonRange, RangeTable};

    fn run(filter: &mut DownsampleFilter, inputs: &[SharedStream]) -> Vec<SharedStream> {
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(1), false, &abort, &progress);
        filter.refresh(inputs, &mut ctx).unwrap()
    }

    fn cloud(masses: &[f32]) -> SharedStream {
        let ions = masses.iter().map(|&m| Ion::new([0.0; 3], m)).collect();
        StreamObject::detached(StreamPayload::Points(PointCloud::new(ions)))
    }

    #[test]
    fn test_thinner_keeps_exact_fraction() {
        let mut t = Thinner::new(0.25);
        let kept = (0..100).filter(|_| t.keep()).count();
        assert_eq!(kept, 25);
    }

    #[test]
    fn test_fraction_mode() {
        let mut filter = DownsampleFilter::fraction(0.5);
        let out = run(&mut filter, &[cloud(&[1.0; 10])]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].point_count(), 5);
        assert!(filter.alters_density());
        assert!(!filter.alters_composition());
    }

    #[test]
    fn test_fixed_count_mode() {
        let mut filter = DownsampleFilter::fixed_count(3);
        let out = run(&mut filter, &[cloud(&[1.0; 12])]);
        assert_eq!(count_points(&out), 3);
        assert_eq!(filter.cache_size_estimate(12), Some(3 * BYTES_PER_ION));
    }

    #[test]
    fn test_per_species_uses_range_table() {
        let table = StreamObject::detached(StreamPayload::RangeTable(RangeTable::new(vec![
            IonRange::new("A", 0.5, 1.5),
            IonRange::new("B", 1.5, 2.5),
        ])));
        let mut filter = DownsampleFilter::per_species(1.0, vec![("A".to_string(), 0.0)]);
        let out = run(&mut filter, &[table, cloud(&[1.0, 2.0, 1.0, 2.0])]);

        // Range table forwarded, points re-emitted.
        assert_eq!(out.len(), 2);
        let pts = out.iter().find_map(|o| o.as_points()).unwrap();
        assert!(pts.ions.iter().all(|i| i.mass == 2.0));
        assert_eq!(pts.len(), 2);
        assert!(filter.alters_composition());
    }

    #[test]
    fn test_set_property_reports_change() {
        let mut filter = DownsampleFilter::fraction(0.5);
        assert!(!filter
            .set_property("fraction", &PropertyValue::Float(0.5))
            .unwrap());
        assert!(filter
            .set_property("fraction", &PropertyValue::Float(0.2))
            .unwrap());
        assert!(filter
            .set_property("fraction", &PropertyValue::Float(2.0))
            .is_err());
        assert_eq!(
            parse_species_fractions("Fe:0.5, Cr:1"),
            Some(vec![("Fe".to_string(), 0.5), ("Cr".to_string(), 1.0)])
        );
    }
}
