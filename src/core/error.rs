//! Error types shared across the cache stack.
//!
//! The coordinator and the layers communicate through a small set of
//! sentinel errors. Callers match on variants rather than on message text;
//! the messages themselves are part of the operator-facing surface and are
//! kept stable.

use thiserror::Error;

/// Common error conditions for the cache stack.
#[derive(Debug, Error)]
pub enum StrataError {
    /// No layer returned a value for the key.
    #[error("not found in any layer")]
    NotFound,

    /// An envelope was retrieved but its object portion is empty.
    #[error("nil object found in cache")]
    NilCache,

    /// The caller attempted to cache a null value.
    #[error("cannot cache a null value")]
    NilValue,

    /// A `flush` targeted a layer name that does not exist.
    #[error("cache layer not found: {0}")]
    LayerNotFound(String),

    /// Registry construction found unusable configuration.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Probabilistic fault injection fired. Not retryable by the core.
    #[error("had amnesia (chance {chance}%)")]
    Amnesia { chance: u8 },

    /// The backend reports the key as absent.
    ///
    /// Layers surface this for a miss; the coordinator's read walk uses it
    /// to continue to the next layer, and `delete` fan-out ignores it.
    #[error("key absent in backend")]
    KeyAbsent,

    /// Envelope encoding failed, including a caught serializer panic.
    #[error("failed to encode cached value: {0}")]
    Encode(String),

    /// Envelope decoding or decompression failed.
    #[error("failed to decode cached value: {0}")]
    Decode(String),

    /// A backend I/O call failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// One or more layers failed during a fan-out write or delete.
    ///
    /// `details` names every failing layer with its error, joined with `; `.
    #[error("cache {op} errors: {details}")]
    PartialFailure { op: &'static str, details: String },
}

impl StrataError {
    /// Build the joined fan-out error from per-layer failures.
    ///
    /// `failures` holds `(layer_name, error)` pairs in layer order.
    pub fn partial_failure(op: &'static str, failures: Vec<(String, StrataError)>) -> Self {
        let details = failures
            .iter()
            .map(|(layer, err)| format!("{}: {}", layer, err))
            .collect::<Vec<_>>()
            .join("; ");
        Self::PartialFailure { op, details }
    }

    /// Whether this error is the distinguished backend "key absent" signal.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::KeyAbsent)
    }
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result type using [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;
