//! Error types.
//!
//! The reactive graph reports a single failure (a computed reading itself).
//! Everything else lives on the resumability side, where failures are either
//! dropped per entry with a log line or funneled into one [`ResumeError`].

use std::time::Duration;

/// Errors raised by the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A computed's derivation read the computed itself, directly or through
    /// other computeds.
    #[error("cyclic dependency: computed `{key}` was read while it was being evaluated")]
    CyclicDependency { key: String },
}

/// Errors raised while encoding a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("failed to encode snapshot as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode snapshot as MessagePack: {0}")]
    Binary(#[from] rmp_serde::encode::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors raised while loading a snapshot or restoring from it.
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// The document has no state script.
    #[error("no snapshot found in document")]
    NoSnapshot,

    /// The state script exists but declares a different type.
    #[error("state script has MIME type `{found}`")]
    WrongMimeType { found: String },

    /// The state script's text is not a valid snapshot.
    #[error("snapshot is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The snapshot was written by an incompatible schema version.
    #[error("snapshot version `{found}` is incompatible with schema `{expected}`")]
    IncompatibleVersion { found: String, expected: String },

    /// The restore pipeline ran past its configured deadline.
    #[error("resume timed out after {elapsed:?} during {phase}")]
    Timeout { elapsed: Duration, phase: &'static str },

    /// A binary snapshot could not be decoded.
    #[error("failed to decode MessagePack snapshot: {0}")]
    Encoding(#[from] rmp_serde::decode::Error),

    /// `resume` was called again on a bootstrap that already ran.
    #[error("document was already resumed")]
    AlreadyResumed,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SerializeResult<T> = Result<T, SerializeError>;
pub type LoadResult<T> = Result<T, ResumeError>;
