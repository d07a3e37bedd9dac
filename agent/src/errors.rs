use thiserror::Error;

/// Errors surfaced by the agent.
///
/// The first five variants form the distributed-failure taxonomy; the rest
/// carry transport and local faults into the same type.
#[derive(Error, Debug)]
pub enum MeshError {
    /// A node id could not be resolved locally nor, if attempted, remotely
    #[error("not found: {0}")]
    NotFound(String),

    /// A peer address could not be discovered or a channel could not be established
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An RPC deadline expired (treated as a retryable Unavailable)
    #[error("timeout: {0}")]
    Timeout(String),

    /// An id registration collided with an id owned by another peer
    #[error("conflict: {0}")]
    Conflict(String),

    /// A protocol invariant was violated; always fatal, never retried
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// IO error (file operations, sockets)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire or config serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields)
    #[error("configuration error: {0}")]
    Config(String),
}

impl MeshError {
    /// Whether a bounded retry with backoff is worth attempting.
    ///
    /// Only idempotent callers consult this; Conflict and
    /// InternalInconsistency are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Unavailable(_) | MeshError::Timeout(_))
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, MeshError>;

impl From<toml::ser::Error> for MeshError {
    fn from(e: toml::ser::Error) -> Self {
        MeshError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for MeshError {
    fn from(e: toml::de::Error) -> Self {
        MeshError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for MeshError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MeshError::Timeout(e.to_string())
        } else {
            MeshError::Unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::NotFound("node abc".to_string());
        assert_eq!(err.to_string(), "not found: node abc");

        let err = MeshError::Conflict("id already owned by peer-2".to_string());
        assert_eq!(err.to_string(), "conflict: id already owned by peer-2");
    }

    #[test]
    fn test_retryability() {
        assert!(MeshError::Unavailable("x".into()).is_retryable());
        assert!(MeshError::Timeout("x".into()).is_retryable());
        assert!(!MeshError::NotFound("x".into()).is_retryable());
        assert!(!MeshError::Conflict("x".into()).is_retryable());
        assert!(!MeshError::InternalInconsistency("x".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mesh_err: MeshError = io_err.into();
        assert!(mesh_err.to_string().contains("io error"));
    }
}
