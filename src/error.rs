//! Command error taxonomy
//!
//! Every failure a command can produce maps onto one of these variants.
//! Errors are caught at the dispatch boundary and reported through the
//! acknowledgment channel as `{status: "Error", error: {name, message}}`;
//! they never tear down the connection.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Malformed payload; rejected before any state is touched
    #[error("{0}")]
    Validation(String),

    /// Command requires a prior group:join on this connection
    #[error("group not joined")]
    NoGroup,

    /// Resolved permission is below the command's required level
    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Lifecycle or voting precondition violated
    #[error("{0}")]
    InvalidState(String),

    /// Vote payload violates the poll's cardinality or option range
    #[error("{0}")]
    InvalidChoice(String),

    #[error("internal error: {0}")]
    Server(String),
}

impl CommandError {
    /// Wire name reported in the error acknowledgment
    pub fn name(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "ValidationError",
            CommandError::NoGroup => "NoGroupError",
            CommandError::Forbidden(_) => "ForbiddenError",
            CommandError::NotFound(_) => "NotFoundError",
            CommandError::InvalidState(_) => "InvalidState",
            CommandError::InvalidChoice(_) => "InvalidChoice",
            CommandError::Server(_) => "ServerError",
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        CommandError::NotFound(what.to_string())
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CommandError::NotFound(what),
            other => CommandError::Server(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_match_wire_taxonomy() {
        assert_eq!(CommandError::NoGroup.name(), "NoGroupError");
        assert_eq!(
            CommandError::Validation("bad".into()).name(),
            "ValidationError"
        );
        assert_eq!(
            CommandError::InvalidChoice("too many".into()).name(),
            "InvalidChoice"
        );
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: CommandError = StoreError::NotFound("poll abc".into()).into();
        assert_eq!(err.name(), "NotFoundError");
    }
}
