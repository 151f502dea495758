//! Error taxonomy for the tutoring core.
//!
//! Only [`TutorError::PermissionDenied`] and [`TutorError::Connection`] are
//! ever shown to the learner. Persistence failures are logged and degrade to
//! defaults, and a malformed tutor reply is not an error at all: the
//! response parser turns it into empty sections.

/// Errors surfaced by the session transport, controller, and stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TutorError {
    /// Microphone access was refused or no input device is available.
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// Remote handshake or mid-session transport failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Snapshot read/write failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An operation was invoked in a lifecycle state that does not allow it.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Missing or invalid configuration (API key, endpoint, ...).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TutorError {
    /// Whether this error should be shown to the learner as a blocking message.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::Connection(_))
    }
}

impl From<rusqlite::Error> for TutorError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Convenience alias for `Result<T, TutorError>`.
pub type Result<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permission_and_connection_are_user_visible() {
        assert!(TutorError::PermissionDenied("no mic".into()).is_user_visible());
        assert!(TutorError::Connection("refused".into()).is_user_visible());
        assert!(!TutorError::Persistence("disk full".into()).is_user_visible());
        assert!(!TutorError::InvalidState("active".into()).is_user_visible());
    }

    #[test]
    fn display_includes_detail() {
        let err = TutorError::Connection("setupComplete timeout (15s)".into());
        assert_eq!(
            err.to_string(),
            "Connection error: setupComplete timeout (15s)"
        );
    }
}
