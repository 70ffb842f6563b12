//! Authentication errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token in the header or query string.
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("invalid token")]
    InvalidToken,

    /// Referenced via `env:VAR` in the config but not set.
    #[error("environment variable '{0}' not found (referenced via env:{0} in config)")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty (referenced via env:{0} in config)")]
    EnvVarEmpty(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        assert_eq!(AuthError::MissingToken.to_string(), "missing bearer token");
        assert_eq!(
            AuthError::EnvVarNotFound("DECK_TOKEN".to_string()).to_string(),
            "environment variable 'DECK_TOKEN' not found (referenced via env:DECK_TOKEN in config)"
        );
    }
}
