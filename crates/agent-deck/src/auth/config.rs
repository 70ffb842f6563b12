//! Authentication configuration.

use serde::{Deserialize, Serialize};

use super::AuthError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared bearer token. `env:VAR_NAME` reads it from the environment.
    pub token: Option<String>,
}

impl AuthConfig {
    /// Resolve the token, expanding `env:VAR_NAME` syntax. Blank tokens count
    /// as not configured.
    pub fn resolve_token(&self) -> Result<Option<String>, AuthError> {
        let Some(value) = self.token.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }

        match value.strip_prefix("env:") {
            Some(var_name) => match std::env::var(var_name) {
                Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                Ok(_) => Err(AuthError::EnvVarEmpty(var_name.to_string())),
                Err(_) => Err(AuthError::EnvVarNotFound(var_name.to_string())),
            },
            None => Ok(Some(value.to_string())),
        }
    }
}
