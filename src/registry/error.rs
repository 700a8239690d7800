//! Registry error types
//!
//! Error types for capture registry operations.

use thiserror::Error;

use crate::source::ConsumerId;

/// Error type for registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Consumer is not attached to any capture thread
    #[error("consumer not capturing: {0}")]
    ConsumerNotFound(ConsumerId),

    /// Requested capture kind is not available on this platform
    #[error("not supported: {0}")]
    Unsupported(&'static str),

    /// The OS refused to create a capture thread
    #[error("failed to spawn capture thread: {0}")]
    ThreadSpawn(String),
}
