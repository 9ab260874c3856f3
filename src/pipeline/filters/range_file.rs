//! RangeFileFilter: assigns points to species by mass range.
//!
//! Emits the range table itself plus one point batch per species. Points
//! outside every range are either dropped or passed on as an untagged batch.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, forward_unblocked, FilterBehavior, FilterKind, InitContext, PropertyValue,
    RefreshContext,
};
use crate::pipeline::filters::{for_each_ion, BYTES_PER_ION};
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Ion, IonRange, PointCloud, RangeTable};

/// Range file filter.
#[derive(Debug, Clone)]
pub struct RangeFileFilter {
    table: RangeTable,
    drop_unranged: bool,
}

impl RangeFileFilter {
    pub fn new(table: RangeTable) -> Self {
        Self {
            table,
            drop_unranged: true,
        }
    }

    pub fn keep_unranged(mut self) -> Self {
        self.drop_unranged = false;
        self
    }

    pub fn table(&self) -> &RangeTable {
        &self.table
    }
}

impl Default for RangeFileFilter {
    fn default() -> Self {
        Self::new(RangeTable::default())
    }
}

/// Parse `"Fe:27.5-28.5,Cr:25.5-26.5"`.
pub(crate) fn parse_ranges(text: &str) -> Option<RangeTable> {
    let ranges = text
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|part| {
            let (name, interval) = part.split_once(':')?;
            let (low, high) = interval.split_once('-')?;
            let low: f32 = low.trim().parse().ok()?;
            let high: f32 = high.trim().parse().ok()?;
            (low < high).then(|| IonRange::new(name.trim(), low, high))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(RangeTable::new(ranges))
}

fn format_ranges(table: &RangeTable) -> String {
    table
        .ranges
        .iter()
        .map(|r| format!("{}:{}-{}", r.name, r.low, r.high))
        .collect::<Vec<_>>()
        .join(",")
}

impl FilterBehavior for RangeFileFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::RangeFile
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS | StreamTypeMask::RANGE_TABLE
    }

    fn block_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS | StreamTypeMask::RANGE_TABLE
    }

    fn use_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        let species = self.table.species_names();
        let mut per_species: Vec<Vec<Ion>> = vec![Vec::new(); species.len()];
        let mut unranged = Vec::new();

        for_each_ion(inputs, ctx, |_, ion| match self.table.species_of(ion.mass) {
            Some(range) => {
                let name = self.table.ranges[range].name.as_str();
                // species_names() is built from the same table, so the lookup succeeds.
                if let Some(slot) = species.iter().position(|s| *s == name) {
                    per_species[slot].push(*ion);
                }
            }
            None => unranged.push(*ion),
        })?;

        let mut out = forward_unblocked(inputs, self.block_mask());
        out.push(ctx.emit(StreamPayload::RangeTable(self.table.clone())));

        let mut ranged = 0;
        for (name, ions) in species.iter().zip(per_species) {
            ranged += ions.len();
            out.push(ctx.emit(StreamPayload::Points(PointCloud::with_species(ions, *name))));
        }
        let unranged_count = unranged.len();
        if !self.drop_unranged {
            out.push(ctx.emit(StreamPayload::Points(PointCloud::new(unranged))));
        }

        ctx.console(format!(
            "Ranged {ranged} points into {} species; {unranged_count} unranged{}",
            species.len(),
            if self.drop_unranged { " (dropped)" } else { "" }
        ));
        Ok(out)
    }

    fn init_structure(&mut self, upstream: &[SharedStream], ctx: &InitContext) -> Vec<SharedStream> {
        // Descendants look for a range table during init to learn species names.
        let mut out = forward_unblocked(upstream, self.block_mask());
        out.push(ctx.emit(StreamPayload::RangeTable(self.table.clone())));
        out
    }

    fn cache_size_estimate(&self, input_points: usize) -> Option<u64> {
        let table_bytes = (self.table.ranges.len() * std::mem::size_of::<IonRange>()) as u64;
        Some(input_points as u64 * BYTES_PER_ION + table_bytes)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match key {
            "ranges" => {
                let table = value
                    .as_str()
                    .and_then(parse_ranges)
                    .ok_or_else(|| bad_property(key, value))?;
                let changed = table != self.table;
                self.table = table;
                Ok(changed)
            }
            "drop_unranged" => {
                let v = value.as_bool().ok_or_else(|| bad_property(key, value))?;
                let changed = v != self.drop_unranged;
                self.drop_unranged = v;
                Ok(changed)
            }
            _ => Err(bad_property(key, value)),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        vec![
            (
                "ranges".to_string(),
                PropertyValue::Text(format_ranges(&self.table)),
            ),
            (
                "drop_unranged".to_string(),
                PropertyValue::Bool(self.drop_unranged),
            ),
        ]
    }

    fn drops_unranged(&self) -> bool {
        self.drop_unranged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::progress::{AbortHandle, ProgressHandle};
    use crate::pipeline::stream::{count_points, StreamObject, StreamType};

    fn table() -> RangeTable {
        parse_ranges("A:0.5-1.5,B:1.5-2.5").unwrap()
    }

    fn cloud(masses: &[f32]) -> SharedStream {
        let ions = masses.iter().map(|&m| Ion::new([0.0; 3], m)).collect();
        StreamObject::detached(StreamPayload::Points(PointCloud::new(ions)))
    }

    #[test]
    fn test_parse_ranges() {
        let t = table();
        assert_eq!(t.ranges.len(), 2);
        assert_eq!(t.ranges[1], IonRange::new("B", 1.5, 2.5));
        assert!(parse_ranges("A:2-1").is_none());
        assert!(parse_ranges("nonsense").is_none());
        assert_eq!(format_ranges(&t), "A:0.5-1.5,B:1.5-2.5");
    }

    #[test]
    fn test_split_by_species() {
        let mut filter = RangeFileFilter::new(table());
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);

        let out = filter
            .refresh(&[cloud(&[1.0, 2.0, 2.1, 9.0])], &mut ctx)
            .unwrap();
        // Range table + A + B; unranged dropped by default.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].stream_type(), StreamType::RangeTable);
        assert_eq!(out[1].as_points().unwrap().species.as_deref(), Some("A"));
        assert_eq!(out[2].point_count(), 2);
        assert_eq!(count_points(&out), 3);
        assert!(filter.drops_unranged());
    }

    #[test]
    fn test_keep_unranged() {
        let mut filter = RangeFileFilter::new(table()).keep_unranged();
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);

        let out = filter.refresh(&[cloud(&[1.0, 9.0])], &mut ctx).unwrap();
        assert_eq!(count_points(&out), 2);
        assert!(!filter.drops_unranged());
    }
}
