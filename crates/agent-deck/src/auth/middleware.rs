//! Authentication and read-only middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use log::debug;

use super::{AuthConfig, AuthError};
use crate::api::{ApiError, AppState};

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shared token state.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    token: Option<Arc<str>>,
}

impl AuthState {
    /// Build from config, resolving `env:VAR_NAME` tokens.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self {
            token: config.resolve_token()?.map(Arc::from),
        })
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(Arc::from(token.into())),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };
        let presented = presented.ok_or(AuthError::MissingToken)?;
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    /// Check a request's header, falling back to the `token` query parameter.
    pub fn authorize(&self, req: &Request) -> Result<(), AuthError> {
        if !self.is_enabled() {
            return Ok(());
        }

        if let Some(header) = req.headers().get(AUTHORIZATION) {
            let header = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
            return self.verify(Some(bearer_token_from_header(header)?));
        }

        let query_token = req.uri().query().and_then(token_from_query);
        self.verify(query_token.as_deref())
    }
}

/// Reject requests without a valid bearer token.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(err) = state.auth.authorize(&req) {
        debug!("rejected {} {}: {}", req.method(), req.uri().path(), err);
        return Err(err.into());
    }
    Ok(next.run(req).await)
}

/// Reject mutating requests when the server runs read-only.
pub async fn require_writable(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.settings.read_only {
        return Err(ApiError::read_only(format!(
            "{} {} is not allowed in read-only mode",
            req.method(),
            req.uri().path()
        )));
    }
    Ok(next.run(req).await)
}
