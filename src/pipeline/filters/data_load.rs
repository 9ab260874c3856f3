//! DataLoadFilter: point cloud source.
//!
//! Reading instrument files is handled outside the engine; this filter either
//! serves points handed to it in memory or generates a regular lattice, which
//! is what project files and benches use.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, FilterBehavior, FilterKind, PropertyValue, RefreshContext, ABORT_CHECK_INTERVAL,
};
use crate::pipeline::filters::BYTES_PER_ION;
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Ion, PointCloud};
use std::sync::Arc;

/// Where the points come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    /// Points supplied by the caller. Shared between copies of the filter.
    Memory(Arc<Vec<Ion>>),
    /// `count` points on a cubic lattice, masses cycling through `masses`.
    Lattice {
        count: usize,
        spacing: f32,
        masses: Vec<f32>,
    },
}

/// Source filter.
#[derive(Debug, Clone)]
pub struct DataLoadFilter {
    source: DataSource,
    /// Upper bound on points emitted; 0 = unlimited.
    max_points: usize,
}

impl DataLoadFilter {
    pub fn from_ions(ions: Vec<Ion>) -> Self {
        Self {
            source: DataSource::Memory(Arc::new(ions)),
            max_points: 0,
        }
    }

    pub fn lattice(count: usize, spacing: f32, masses: Vec<f32>) -> Self {
        Self {
            source: DataSource::Lattice {
                count,
                spacing,
                masses,
            },
            max_points: 0,
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    fn point_count(&self) -> usize {
        let n = match &self.source {
            DataSource::Memory(ions) => ions.len(),
            DataSource::Lattice { count, .. } => *count,
        };
        if self.max_points > 0 {
            n.min(self.max_points)
        } else {
            n
        }
    }

    fn lattice_ion(i: usize, side: usize, spacing: f32, masses: &[f32]) -> Ion {
        let x = i % side;
        let y = (i / side) % side;
        let z = i / (side * side);
        let mass = if masses.is_empty() {
            1.0
        } else {
            masses[i % masses.len()]
        };
        Ion::new(
            [x as f32 * spacing, y as f32 * spacing, z as f32 * spacing],
            mass,
        )
    }
}

impl Default for DataLoadFilter {
    fn default() -> Self {
        Self::lattice(1000, 1.0, vec![1.0])
    }
}

/// Smallest cube side holding `n` points.
fn lattice_side(n: usize) -> usize {
    let mut side = ((n as f64).cbrt().round() as usize).max(1);
    while side * side * side < n {
        side += 1;
    }
    side
}

fn parse_masses(text: &str) -> Option<Vec<f32>> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse::<f32>().ok())
        .collect()
}

impl FilterBehavior for DataLoadFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::DataLoad
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::POINTS
    }

    fn block_mask(&self) -> StreamTypeMask {
        StreamTypeMask::empty()
    }

    fn use_mask(&self) -> StreamTypeMask {
        StreamTypeMask::empty()
    }

    fn refresh(
        &mut self,
        inputs: &[SharedStream],
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<SharedStream>, FilterError> {
        let n = self.point_count();
        let mut ions = Vec::new();
        ions.try_reserve_exact(n)
            .map_err(|_| FilterError::OutOfMemory)?;

        match &self.source {
            DataSource::Memory(source) => {
                for chunk in source[..n].chunks(ABORT_CHECK_INTERVAL) {
                    ctx.check_abort()?;
                    ions.extend_from_slice(chunk);
                    ctx.set_progress(((ions.len() * 100) / n.max(1)) as u8);
                }
            }
            DataSource::Lattice {
                spacing, masses, ..
            } => {
                let side = lattice_side(n);
                for start in (0..n).step_by(ABORT_CHECK_INTERVAL) {
                    ctx.check_abort()?;
                    let end = (start + ABORT_CHECK_INTERVAL).min(n);
                    ions.extend((start..end).map(|i| Self::lattice_ion(i, side, *spacing, masses)));
                    ctx.set_progress(((end * 100) / n.max(1)) as u8);
                }
            }
        }

        ctx.console(format!("Loaded {} points", ions.len()));
        tracing::debug!("DataLoad produced {} points", ions.len());

        let mut out = inputs.to_vec();
        out.push(ctx.emit(StreamPayload::Points(PointCloud::new(ions))));
        Ok(out)
    }

    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        Some(self.point_count() as u64 * BYTES_PER_ION)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match key {
            "max_points" => {
                let v = value
                    .as_int()
                    .filter(|v| *v >= 0)
                    .ok_or_else(|| bad_property(key, value))?;
                let changed = self.max_points != v as usize;
                self.max_points = v as usize;
                Ok(changed)
            }
            "count" | "spacing" | "masses" => {
                let DataSource::Lattice {
                    count,
                    spacing,
                    masses,
                } = &mut self.source
                else {
                    return Err(FilterError::specific(
                        1,
                        format!("property '{key}' only applies to generated data"),
                    ));
                };
                match key {
                    "count" => {
                        let v = value
                            .as_int()
                            .filter(|v| *v >= 0)
                            .ok_or_else(|| bad_property(key, value))?;
                        let changed = *count != v as usize;
                        *count = v as usize;
                        Ok(changed)
                    }
                    "spacing" => {
                        let v = value
                            .as_float()
                            .filter(|v| *v > 0.0)
                            .ok_or_else(|| bad_property(key, value))?
                            as f32;
                        let changed = *spacing != v;
                        *spacing = v;
                        Ok(changed)
                    }
                    _ => {
                        let v = value
                            .as_str()
                            .and_then(parse_masses)
                            .ok_or_else(|| bad_property(key, value))?;
                        let changed = *masses != v;
                        *masses = v;
                        Ok(changed)
                    }
                }
            }
            _ => Err(bad_property(key, value)),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        let mut props = vec![(
            "max_points".to_string(),
            PropertyValue::Int(self.max_points as i64),
        )];
        if let DataSource::Lattice {
            count,
            spacing,
            masses,
        } = &self.source
        {
            let masses = masses
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(",");
            props.push(("count".to_string(), PropertyValue::Int(*count as i64)));
            props.push(("spacing".to_string(), PropertyValue::Float(*spacing as f64)));
            props.push(("masses".to_string(), PropertyValue::Text(masses)));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;
    use crate::pipeline::progress::{AbortHandle, ProgressHandle};

    #[test]
    fn test_lattice_generation() {
        let mut filter = DataLoadFilter::lattice(27, 2.0, vec![10.0, 20.0]);
        let abort = AbortHandle::new();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);

        let out = filter.refresh(&[], &mut ctx).unwrap();
        assert_eq!(out.len(), 1);
        let cloud = out[0].as_points().unwrap();
        assert_eq!(cloud.len(), 27);
        assert_eq!(cloud.ions[1].position, [2.0, 0.0, 0.0]);
        assert_eq!(cloud.ions[1].mass, 20.0);
        assert_eq!(cloud.ions[26].position, [4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_max_points_limits_memory_source() {
        let ions = vec![Ion::default(); 10];
        let mut filter = DataLoadFilter::from_ions(ions);
        assert!(filter
            .set_property("max_points", &PropertyValue::Int(4))
            .unwrap());
        assert_eq!(filter.cache_size_estimate(0), Some(4 * BYTES_PER_ION));
        assert!(filter
            .set_property("count", &PropertyValue::Int(4))
            .is_err());
    }

    #[test]
    fn test_abort_stops_generation() {
        let mut filter = DataLoadFilter::lattice(10_000, 1.0, vec![]);
        let abort = AbortHandle::new();
        abort.request();
        let progress = ProgressHandle::new();
        let mut ctx = RefreshContext::new(FilterId(0), false, &abort, &progress);
        assert!(matches!(
            filter.refresh(&[], &mut ctx),
            Err(FilterError::Aborted)
        ));
        assert_eq!(ctx.allocated_uncached(), 0);
    }
}
