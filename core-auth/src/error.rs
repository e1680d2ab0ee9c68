use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or malformed static configuration (client id, authority, endpoint).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error talking to {target}: {message}")]
    TransientNetwork { target: String, message: String },

    /// The provider rejected the authorization code or refresh token.
    #[error("{target} rejected the grant: {message}")]
    InvalidGrant { target: String, message: String },

    #[error("No pending authorization for {target}")]
    NoPendingSession { target: String },

    #[error("Feature {feature} is not active")]
    EntitlementExpired { feature: String },

    #[error("Authentication required for {target}: {reason}")]
    AuthenticationRequired { target: String, reason: String },

    #[error("Authorization callback for {target} carried an unexpected state")]
    StateMismatch { target: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    OperationTimeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("Settings storage error: {0}")]
    Storage(String),

    #[error("Stored settings are corrupt: {0}")]
    CorruptSettings(String),
}

impl AuthError {
    /// Whether repeating the same call later can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::TransientNetwork { .. }
                | AuthError::OperationTimeout { .. }
                | AuthError::Storage(_)
        )
    }

    /// Whether the user has to go through the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidGrant { .. }
                | AuthError::AuthenticationRequired { .. }
                | AuthError::NoPendingSession { .. }
                | AuthError::StateMismatch { .. }
        )
    }

    /// Short actionable text suitable for a notice.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Configuration(detail) => {
                format!("Sync is not configured correctly ({detail}). Check the settings and re-authorize.")
            }
            AuthError::TransientNetwork { target, .. } => {
                format!("Could not reach {target}. Please try again later.")
            }
            AuthError::OperationTimeout { operation, .. } => {
                format!("{operation} took too long. Please try again.")
            }
            AuthError::InvalidGrant { target, .. }
            | AuthError::AuthenticationRequired { target, .. } => {
                format!("Your {target} session has expired. Please re-authorize.")
            }
            AuthError::NoPendingSession { target } | AuthError::StateMismatch { target } => {
                format!("The {target} sign-in link is no longer valid. Please re-authorize.")
            }
            AuthError::EntitlementExpired { feature } => {
                format!("{feature} is not part of your active plan.")
            }
            AuthError::Storage(_) => "Settings could not be saved. Please try again.".to_string(),
            AuthError::CorruptSettings(_) => {
                "Stored sync settings are unreadable. Reset them and re-authorize.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Failures while dispatching a host-delivered callback.
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Unknown callback identifier: {0}")]
    UnknownCallback(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = AuthError::TransientNetwork {
            target: "box".into(),
            message: "503".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.requires_reauthorization());
        assert!(err.user_message().contains("try again"));
    }

    #[test]
    fn test_permanent_errors_ask_for_reauthorization() {
        let grant = AuthError::InvalidGrant {
            target: "koofr".into(),
            message: "invalid_grant".into(),
        };
        assert!(!grant.is_retryable());
        assert!(grant.requires_reauthorization());
        assert!(grant.user_message().contains("re-authorize"));

        let config = AuthError::Configuration("clientID is empty".into());
        assert!(!config.is_retryable());
        assert!(config.user_message().contains("re-authorize"));
    }
}
