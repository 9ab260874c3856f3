//! # PointVis-RS: Filter Pipeline Engine for Point Clouds
//!
//! A tree of filters turns a point cloud into plots, voxel grids and
//! drawables. Editing a filter refreshes only the part of the tree the edit
//! can reach; everything else is replayed from per-filter caches.
//!
//! ## Architecture
//!
//! - **Filter tree**: arena of filters with parent/child links and caches
//! - **Propagation masks**: which stream types can reach, and escape, each
//!   filter; used to choose where a refresh restarts
//! - **Refresh scheduler**: depth-first walk with a value stack, a cache
//!   budget and a collector that releases every uncached intermediate
//! - **Tree analyser**: advisory diagnostics about the topology
//! - **Worker bridge**: refreshes on a background thread, with progress and
//!   abort shared with the caller
//!
//! ## Configuration
//!
//! Engine settings live in `config.toml` under the platform config directory
//! in `dev.pointvis.pointvis-rs`. Trees are described by project files.
//!
//! ## Example
//!
//! ```no_run
//! use pointvis_rs::config::{EngineConfig, ProjectFile};
//! use pointvis_rs::pipeline::TreeAnalyser;
//!
//! # fn main() -> pointvis_rs::Result<()> {
//! let config = EngineConfig::load_or_default();
//! let (mut tree, _) = ProjectFile::load("project.toml")?.build_tree()?;
//!
//! for diag in TreeAnalyser::analyse(&tree) {
//!     println!("{diag}");
//! }
//! let output = config.scheduler().refresh(&mut tree)?;
//! println!("{} result objects", output.objects.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, ProjectFile};
pub use error::{EngineError, Result};
pub use pipeline::{
    FilterId, FilterKind, FilterTree, RefreshBridge, RefreshOutput, RefreshScheduler,
    TreeAnalyser,
};
pub use types::{Ion, PointCloud};
