//! Registry error types
//!
//! Error types for stream registry operations.

use super::frame::StreamPath;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream not found
    StreamNotFound(StreamPath),
    /// Stream already has a publisher
    StreamAlreadyPublishing(StreamPath),
    /// Stream exists but nobody is publishing to it
    StreamNotActive(StreamPath),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamNotFound(path) => write!(f, "Stream not found: {}", path),
            RegistryError::StreamAlreadyPublishing(path) => {
                write!(f, "Stream already has a publisher: {}", path)
            }
            RegistryError::StreamNotActive(path) => write!(f, "Stream not active: {}", path),
        }
    }
}

impl std::error::Error for RegistryError {}
