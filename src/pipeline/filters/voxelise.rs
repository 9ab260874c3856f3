//! VoxeliseFilter: bins points onto a regular grid spanning their bounds.

use crate::pipeline::error::FilterError;
use crate::pipeline::filter::{
    bad_property, forward_unblocked, FilterBehavior, FilterKind, PropertyValue, RefreshContext,
};
use crate::pipeline::filters::for_each_ion;
use crate::pipeline::stream::{SharedStream, StreamPayload, StreamTypeMask};
use crate::types::{Bounds, VoxelGrid};
use serde::{Deserialize, Serialize};

/// What each voxel holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelNormalisation {
    /// Raw point count.
    Count,
    /// Points per unit volume.
    Density,
}

#[derive(Debug, Clone)]
pub struct VoxeliseFilter {
    /// Voxels along each axis.
    resolution: [usize; 3],
    normalisation: VoxelNormalisation,
}

impl VoxeliseFilter {
    pub fn new(resolution: usize, normalisation: VoxelNormalisation) -> Self {
        Self {
            resolution: [resolution.max(1); 3],
            normalisation,
        }
    }

    pub fn normalisation(&self) -> VoxelNormalisation {
        self.normalisation
    }

    fn voxel_count(&self) -> usize {
        self.resolution.iter().product()
    }
}

impl Default for VoxeliseFilter {
    fn default() -> Self {
        Self::new(32, VoxelNormalisation::Count)
    }
}

impl FilterBehavior for VoxeliseFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Voxelise
    }

    fn emit_mask(&self) -> StreamTypeMask {
        StreamTypeMask::VOXELS
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

        let bounds = inputs
            .iter()
            .filter_map(|o| o.as_points().and_then(|c| c.bounds()))
            .reduce(|a, b| a.union(&b));
        let Some(bounds) = bounds else {
            ctx.console("No points to voxelise");
            return Ok(out);
        };

        let mut values = Vec::new();
        values
            .try_reserve_exact(self.voxel_count())
            .map_err(|_| FilterError::OutOfMemory)?;
        let mut grid = VoxelGrid {
            dims: self.resolution,
            bounds,
            values,
        };
        grid.values.resize(self.voxel_count(), 0.0);

        for_each_ion(inputs, ctx, |_, ion| {
            let idx = grid.index_of(ion.position);
            grid.values[idx] += 1.0;
        })?;

        if self.normalisation == VoxelNormalisation::Density {
            let volume = grid.voxel_volume();
            if volume > 0.0 {
                grid.values.iter_mut().for_each(|v| *v /= volume);
            } else {
                ctx.console("Degenerate bounds; densities left as counts");
            }
        }

        out.push(ctx.emit(StreamPayload::Voxels(grid)));
        Ok(out)
    }

    fn cache_size_estimate(&self, _input_points: usize) -> Option<u64> {
        Some((self.voxel_count() * std::mem::size_of::<f32>() + std::mem::size_of::<Bounds>()) as u64)
    }

    fn clone_uncached(&self) -> Box<dyn FilterBehavior> {
        Box::new(self.clone())
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<bool, FilterError> {
        match key {
            "resolution" => {
                let n = value
                    .as_int()
                    .filter(|n| (1..=1024).contains(n))
                    .ok_or_else(|| bad_property(key, value))? as usize;
                let changed = self.resolution != [n; 3];
                self.resolution = [n; 3];
                Ok(changed)
            }
            "normalisation" => {
                let mode = match value.as_str() {
                    Some("count") => VoxelNormalisation::Count,
                    Some("density") => VoxelNormalisation::Density,
                    _ => return Err(bad_property(key, value)),
                };
                let changed = mode != self.normalisation;
                self.normalisation = mode;
                Ok(changed)
            }
            _ => Err(bad_property(key, value)),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        let mode = match self.normalisation {
            VoxelNormalisation::Count => "count",
            VoxelNormalisation::Density => "density",
        };
        vec![
            (
                "resolution".to_string(),
                PropertyValue::Int(self.resolution[0] as i64),
            ),
            (
                "normalisation".to_string(),
                PropertyValue::Text(mode.to_string()),
            ),
        ]
    }

    fn density_sensitive(&self, _ranged: bool) -> bool {
        self.normalisation == VoxelNormalisation::Density
    }
}
