use errno::{errno, Errno};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MappingError>;

/// Any error thrown while mapping memory.
#[derive(Debug, Clone, Error)]
pub enum MappingError {
    /// A system call refused the request. `operation` names the call.
    #[error("{operation} failed: {errno}")]
    Internal {
        operation: &'static str,
        errno: Errno,
    },
}

impl MappingError {
    /// Captures `errno` right after `operation` failed.
    pub(crate) fn last(operation: &'static str) -> Self {
        MappingError::Internal {
            operation,
            errno: errno(),
        }
    }

    /// The underlying system error.
    pub fn errno(&self) -> Errno {
        match self {
            MappingError::Internal { errno, .. } => *errno,
        }
    }
}
