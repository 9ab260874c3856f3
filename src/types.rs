//! Core data types carried by stream objects.
//!
//! These are the payloads that flow between filters. The engine never looks
//! inside them beyond counting points for cache estimates; the rendering layer
//! consumes them once they reach the final result list.
//!
//! # Main Types
//!
//! - [`Ion`] / [`PointCloud`] - Reconstructed positions with mass-to-charge values
//! - [`RangeTable`] - Named mass intervals used to assign species
//! - [`Plot1D`] / [`Plot2D`] - Histogram and map style plot data
//! - [`Drawable`] - Scene annotations such as bounding boxes
//! - [`VoxelGrid`] - Regular 3D binning of points

use serde::{Deserialize, Serialize};

/// A single reconstructed point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Ion {
    /// Position in nanometres.
    pub position: [f32; 3],
    /// Mass-to-charge ratio in Da.
    pub mass: f32,
}

impl Ion {
    pub fn new(position: [f32; 3], mass: f32) -> Self {
        Self { position, mass }
    }
}

/// A batch of points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloud {
    pub ions: Vec<Ion>,
    /// Species name when every point in the batch belongs to one range.
    pub species: Option<String>,
}

impl PointCloud {
    pub fn new(ions: Vec<Ion>) -> Self {
        Self { ions, species: None }
    }

    pub fn with_species(ions: Vec<Ion>, species: impl Into<String>) -> Self {
        Self {
            ions,
            species: Some(species.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.ions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ions.is_empty()
    }

    /// Axis-aligned bounds of the batch, `None` when empty.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_ions(&self.ions)
    }
}

/// Axis-aligned bounding region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn from_ions(ions: &[Ion]) -> Option<Self> {
        let first = ions.first()?;
        let mut bounds = Bounds {
            min: first.position,
            max: first.position,
        };
        for ion in &ions[1..] {
            bounds.expand(ion.position);
        }
        Some(bounds)
    }

    pub fn expand(&mut self, p: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut out = *self;
        out.expand(other.min);
        out.expand(other.max);
        out
    }

    pub fn extent(&self, axis: usize) -> f32 {
        self.max[axis] - self.min[axis]
    }

    pub fn volume(&self) -> f32 {
        (0..3).map(|a| self.extent(a)).product()
    }
}

/// One named mass interval, `[low, high)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IonRange {
    pub name: String,
    pub low: f32,
    pub high: f32,
}

impl IonRange {
    pub fn new(name: impl Into<String>, low: f32, high: f32) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    #[inline]
    pub fn contains(&self, mass: f32) -> bool {
        mass >= self.low && mass < self.high
    }
}

/// Mass ranges that assign points to species.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeTable {
    pub ranges: Vec<IonRange>,
}

impl RangeTable {
    pub fn new(ranges: Vec<IonRange>) -> Self {
        Self { ranges }
    }

    /// Index of the first range containing `mass`.
    pub fn species_of(&self, mass: f32) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(mass))
    }

    /// Unique species names, in first-seen order.
    pub fn species_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for range in &self.ranges {
            if !names.contains(&range.name.as_str()) {
                names.push(&range.name);
            }
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Line or histogram style plot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plot1D {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Option<String>,
    pub points: Vec<[f32; 2]>,
}

/// Scalar field sampled on a regular 2D grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plot2D {
    pub title: String,
    pub width: usize,
    pub height: usize,
    pub x_bounds: [f32; 2],
    pub y_bounds: [f32; 2],
    pub values: Vec<f32>,
}

/// Scene annotation produced by a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Drawable {
    BoundingBox { min: [f32; 3], max: [f32; 3] },
    Label { position: [f32; 3], text: String },
}

/// Regular 3D grid of per-voxel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelGrid {
    pub dims: [usize; 3],
    pub bounds: Bounds,
    pub values: Vec<f32>,
}

impl VoxelGrid {
    pub fn new(dims: [usize; 3], bounds: Bounds) -> Self {
        Self {
            dims,
            bounds,
            values: vec![0.0; dims[0] * dims[1] * dims[2]],
        }
    }

    /// Flat index of the voxel containing `p`, clamped to the grid.
    pub fn index_of(&self, p: [f32; 3]) -> usize {
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let extent = self.bounds.extent(axis);
            let t = if extent > 0.0 {
                (p[axis] - self.bounds.min[axis]) / extent
            } else {
                0.0
            };
            let cell = (t * self.dims[axis] as f32) as isize;
            idx[axis] = cell.clamp(0, self.dims[axis] as isize - 1) as usize;
        }
        idx[0] + self.dims[0] * (idx[1] + self.dims[1] * idx[2])
    }

    pub fn voxel_volume(&self) -> f32 {
        let cells = (self.dims[0] * self.dims[1] * self.dims[2]).max(1) as f32;
        self.bounds.volume() / cells
    }

    pub fn total(&self) -> f32 {
        self.values.iter().sum()
    }
}
