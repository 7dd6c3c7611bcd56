//! Protocol error types.
//!
//! Raised when an inbound payload cannot be turned into a well-formed
//! message.  These are hard construction errors: a message with no `id` or
//! without its role-specific mandatory field is never silently repaired.

/// Errors produced while constructing protocol values from the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A required field was absent or null.
    #[error("message is missing required field `{field}`")]
    MissingField { field: &'static str },

    /// The `role` discriminator named a role this protocol does not know.
    #[error("unknown message role `{role}`")]
    UnknownRole { role: String },

    /// The message carried neither a `role` nor an action `name`, so its
    /// variant cannot be determined.
    #[error("message `{id}` has no role and is not an action execution")]
    Undiscriminated { id: String },

    /// JSON decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
