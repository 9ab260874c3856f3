//! Filter pipeline engine.
//!
//! A forest of filters, each consuming the typed stream objects its parent
//! produces and producing new ones for its children. Refreshes recompute only
//! what an edit can affect, replaying caches everywhere else.
//!
//! # Architecture
//!
//! ```text
//! [DataLoad] ──► [RangeFile] ──► [CompositionProfile]
//!           │               └──► [SpectrumPlot]
//!           └──► [Downsample] ──► [Voxelise]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch**: `Filter` enum for built-ins, `FilterBehavior` trait
//!   for plugins.
//! - **Arena tree**: `FilterTree` slots indexed by `FilterId`.
//! - **Mask analysis**: `PropagationMasks` picks the minimal restart points.
//! - **Explicit ownership**: uncached objects are tracked by the
//!   `RefreshCollector` until released or handed to the caller.
//! - **Dedicated thread**: `RefreshBridge` runs refreshes on a worker and
//!   talks to the caller over crossbeam channels.

pub mod analysis;
pub mod bridge;
pub mod collector;
pub mod error;
pub mod factory;
pub mod filter;
pub mod filters;
pub mod history;
pub mod id;
pub mod masks;
pub mod memory;
pub mod progress;
pub mod scheduler;
pub mod stream;
pub mod tree;

pub use analysis::{DiagnosticKind, Severity, TreeAnalyser, TreeDiagnostic};
pub use bridge::{
    FilterSnapshot, RefreshBridge, RefreshWorker, TopologySnapshot, WorkerCommand, WorkerMessage,
};
pub use collector::{GcStats, RefreshCollector};
pub use error::{FilterError, RefreshError, RefreshResult, TreeError, TreeResult};
pub use factory::FilterFactory;
pub use filter::{
    forward_unblocked, ConsoleMessage, Filter, FilterBehavior, FilterKind, InitContext,
    PropertyValue, RefreshContext, SelectionDevice, SelectionShape, ABORT_CHECK_INTERVAL,
};
pub use filters::{
    BoundingBoxFilter, CompositionProfileFilter, DataLoadFilter, DownsampleFilter,
    ProfileNormalisation, RangeFileFilter, SpectrumPlotFilter, VoxelNormalisation, VoxeliseFilter,
};
pub use history::{TreeHistory, DEFAULT_UNDO_DEPTH};
pub use id::{FilterId, ObjectKey};
pub use masks::PropagationMasks;
pub use memory::{CachePolicy, CacheStrategy, FixedMemory, MemoryProbe, SystemMemory};
pub use progress::{AbortHandle, Progress, ProgressHandle};
pub use scheduler::{
    RefreshLock, RefreshLockGuard, RefreshOutput, RefreshScheduler, RefreshState, RefreshStats,
};
pub use stream::{SharedStream, StreamObject, StreamPayload, StreamType, StreamTypeMask};
pub use tree::{FilterCache, FilterTree};
