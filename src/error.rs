//! Error types for the Hemmer stacks engine.
//!
//! Public operations report failures as [`Diagnostics`](crate::Diagnostics)
//! rather than `Err`. [`EngineError`] is the internal currency that gets
//! converted into an error diagnostic at those boundaries, and the direct
//! return type of the few programmer-error surfaces (stale handles, connection
//! setup).

use crate::value::AttributePath;
use thiserror::Error;

/// A byte stream or value whose shape disagrees with the schema it was
/// decoded or encoded against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {detail}", display_path(.path))]
pub struct SchemaMismatchError {
    /// Path to the offending value.
    pub path: AttributePath,
    /// What was wrong there.
    pub detail: String,
}

impl SchemaMismatchError {
    /// Create a mismatch at the given path.
    pub fn new(path: AttributePath, detail: impl Into<String>) -> Self {
        Self {
            path,
            detail: detail.into(),
        }
    }
}

fn display_path(path: &AttributePath) -> String {
    if path.is_root() {
        "(root)".to_string()
    } else {
        path.to_string()
    }
}

/// Errors raised inside the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Decoded data disagrees with the schema.
    #[error("Schema mismatch at {0}")]
    SchemaMismatch(#[from] SchemaMismatchError),

    /// A value could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// A byte stream could not be decoded at all.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The provider RPC failed at the transport level.
    #[error("Transport error ({code:?}): {message}")]
    Transport {
        /// gRPC status code reported by the transport.
        code: tonic::Code,
        /// Status message.
        message: String,
    },

    /// The provider does not implement an optional capability.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// A provider connection could not be established.
    #[error("Connection error: {0}")]
    Connection(#[from] tonic::transport::Error),

    /// The handshake line printed by a provider process was malformed.
    #[error("Invalid handshake: {0}")]
    Handshake(String),

    /// A handle that was never issued, or already closed.
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle {
        /// The kind of handle that was expected.
        kind: &'static str,
        /// The numeric handle value.
        id: u64,
    },

    /// An operation was called in the wrong provider session state.
    #[error("Invalid provider session state: {0}")]
    SessionState(String),

    /// A resource, data source, or action type name has no schema.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A configuration document is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Raw plan fragments are missing, out of order, or incompatible.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// A JSON serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A raw state or plan record could not be decoded.
    #[error("Raw record error: {0}")]
    Raw(#[from] prost::DecodeError),
}

impl EngineError {
    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::SchemaMismatch(err) => err.to_string(),
            Self::Encode(msg)
            | Self::Decode(msg)
            | Self::Unimplemented(msg)
            | Self::Handshake(msg)
            | Self::SessionState(msg)
            | Self::UnknownType(msg)
            | Self::Configuration(msg)
            | Self::InvalidPlan(msg) => msg.clone(),
            Self::Transport { message, .. } => message.clone(),
            Self::InvalidHandle { kind, id } => format!("{} handle {}", kind, id),
            Self::Connection(err) => err.to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Serialization(err) => err.to_string(),
            Self::Raw(err) => err.to_string(),
        }
    }

    /// Whether this is the "capability absent" signal rather than a failure.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented(_))
    }
}

impl From<tonic::Status> for EngineError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unimplemented => Self::Unimplemented(status.message().to_string()),
            tonic::Code::Cancelled => Self::Cancelled,
            code => Self::Transport {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownType("custom_resource".to_string());
        assert_eq!(format!("{}", err), "Unknown type: custom_resource");

        let err = EngineError::InvalidHandle { kind: "plan", id: 7 };
        assert_eq!(format!("{}", err), "Invalid plan handle 7");

        let err = EngineError::Configuration("missing provider".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing provider");
    }

    #[test]
    fn test_schema_mismatch_display() {
        let err = SchemaMismatchError::new(
            AttributePath::root().attr("attr_new"),
            "unsupported attribute",
        );
        assert_eq!(err.to_string(), "attr_new: unsupported attribute");

        let err = SchemaMismatchError::new(AttributePath::root(), "expected object");
        assert_eq!(err.to_string(), "(root): expected object");

        let err: EngineError = err.into();
        assert!(err.to_string().starts_with("Schema mismatch at"));
    }

    #[test]
    fn test_status_classification() {
        let err: EngineError = tonic::Status::unimplemented("no identities").into();
        assert!(err.is_unimplemented());
        assert_eq!(err.message(), "no identities");

        let err: EngineError = tonic::Status::unavailable("gone").into();
        assert!(!err.is_unimplemented());
        match err {
            EngineError::Transport { code, message } => {
                assert_eq!(code, tonic::Code::Unavailable);
                assert_eq!(message, "gone");
            },
            other => panic!("unexpected error: {:?}", other),
        }

        let err: EngineError = tonic::Status::cancelled("stop").into();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_message_method() {
        let err = EngineError::InvalidPlan("missing header".to_string());
        assert_eq!(err.message(), "missing header");

        let err = EngineError::InvalidHandle {
            kind: "state",
            id: 3,
        };
        assert_eq!(err.message(), "state handle 3");
    }
}
