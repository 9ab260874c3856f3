//! Pipeline-specific error types.

use crate::pipeline::id::FilterId;
use thiserror::Error;

/// Error returned by a filter's refresh or property calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Cooperative cancellation, not a failure.
    #[error("refresh aborted")]
    Aborted,

    #[error("out of memory")]
    OutOfMemory,

    /// Filter-owned code paired with a human-readable message.
    #[error("filter error {code}: {message}")]
    Specific { code: u32, message: String },
}

impl FilterError {
    pub fn specific(code: u32, message: impl Into<String>) -> Self {
        FilterError::Specific {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by a refresh walk.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("refresh aborted")]
    Aborted,

    #[error("Filter {filter:?} ran out of memory")]
    OutOfMemory { filter: FilterId },

    #[error("Filter {filter:?} ({name}) failed with code {code}: {message}")]
    Filter {
        filter: FilterId,
        name: String,
        code: u32,
        message: String,
    },

    #[error("a refresh is already running")]
    AlreadyRunning,
}

impl RefreshError {
    pub(crate) fn from_filter(filter: FilterId, name: &str, err: FilterError) -> Self {
        match err {
            FilterError::Aborted => RefreshError::Aborted,
            FilterError::OutOfMemory => RefreshError::OutOfMemory { filter },
            FilterError::Specific { code, message } => RefreshError::Filter {
                filter,
                name: name.to_string(),
                code,
                message,
            },
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, RefreshError::Aborted)
    }

    /// Filter whose refresh failed, if any.
    pub fn filter(&self) -> Option<FilterId> {
        match self {
            RefreshError::OutOfMemory { filter } | RefreshError::Filter { filter, .. } => {
                Some(*filter)
            }
            _ => None,
        }
    }
}

/// Errors from structural edits of the filter tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Unknown filter {0:?}")]
    UnknownFilter(FilterId),

    #[error("Cannot move {moved:?} under its own descendant {target:?}")]
    WouldCreateCycle { moved: FilterId, target: FilterId },

    #[error("Property error on {filter:?}: {source}")]
    Property {
        filter: FilterId,
        #[source]
        source: FilterError,
    },
}

pub type RefreshResult<T> = std::result::Result<T, RefreshError>;
pub type TreeResult<T> = std::result::Result<T, TreeError>;
