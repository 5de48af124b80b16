//! Error types for Chisel
//!
//! Every mutation entry point returns one of these. The transport adapter maps
//! them to a stable machine code via [`MutationError::code`].

use std::collections::BTreeMap;
use std::fmt;

/// Reason a permission check refused an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Name of the permission the actor is missing
    pub missing: String,
    /// Human-readable explanation
    pub detail: String,
    /// Conflicting values worth surfacing to the caller (e.g. `owner_id`)
    pub fields: BTreeMap<String, String>,
}

impl Denial {
    pub fn new(missing: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            missing: missing.into(),
            detail: detail.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a conflicting value
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (missing {})", self.detail, self.missing)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Main error type for mutation operations
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("Unauthorized: {0}")]
    Unauthorized(Denial),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MutationError {
    /// Store precondition failed or the document is gone
    pub fn conflict() -> Self {
        Self::NotFound("user not found or changed".into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::Cancelled(_) => "CANCELLED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Nats(_) => "BUS_UNAVAILABLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured fields attached to the error, if any
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Unauthorized(denial) if !denial.fields.is_empty() => Some(&denial.fields),
            _ => None,
        }
    }
}

impl From<Denial> for MutationError {
    fn from(denial: Denial) -> Self {
        Self::Unauthorized(denial)
    }
}

impl From<mongodb::error::Error> for MutationError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<bson::ser::Error> for MutationError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encode error: {}", err))
    }
}

impl From<bson::de::Error> for MutationError {
    fn from(err: bson::de::Error) -> Self {
        Self::Internal(format!("BSON decode error: {}", err))
    }
}

impl From<serde_json::Error> for MutationError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidState(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for MutationError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for mutation operations
pub type Result<T> = std::result::Result<T, MutationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_hides_precondition() {
        let err = MutationError::conflict();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "Not found: user not found or changed");
    }

    #[test]
    fn test_denial_fields_surface() {
        let err: MutationError = Denial::new("EDIT_ANY_EMOTE_SET", "not your set")
            .with_field("owner_id", "abc")
            .into();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(err.fields().unwrap().get("owner_id").unwrap(), "abc");
        assert!(err.to_string().contains("owner_id=abc"));
    }
}
