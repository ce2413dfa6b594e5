//! Bearer-token authentication for the conversion API.
//!
//! Tokens are HMAC-signed JWTs. `exp` and `nbf` are enforced when present but
//! neither is required.

use std::collections::HashSet;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,

    #[error("Invalid Authorization header format. Expected 'Bearer <token>'")]
    BadScheme,

    #[error("That's not even a token")]
    Malformed,

    #[error("Token is expired")]
    Expired,

    #[error("Token not active yet")]
    NotYetValid,

    #[error("Invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed
            }
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::ImmatureSignature => AuthError::NotYetValid,
            _ => AuthError::Invalid(e),
        }
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.required_spec_claims = HashSet::new();
    validation.validate_nbf = true;
    validation
}

/// Validates the raw `Authorization` header value.
pub fn authorize(secret: &str, authorization: Option<&str>) -> Result<Claims, AuthError> {
    let authorization = authorization.ok_or(AuthError::MissingHeader)?;
    let token = match authorization.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token,
        _ => return Err(AuthError::BadScheme),
    };

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation(),
    )?;
    Ok(data.claims)
}

/// Mints an HS256 token for `user_id` valid for `ttl`.
#[cfg(test)]
pub fn issue_token(secret: &str, user_id: &str, ttl: std::time::Duration) -> Result<String, AuthError> {
    let claims = Claims {
        id: Some(user_id.to_string()),
        exp: Some(jsonwebtoken::get_current_timestamp() + ttl.as_secs()),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(AuthError::Invalid)
}

/// Middleware guarding `/api/*`.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());

    authorize(&state.config.jwt_secret, authorization)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    const SECRET: &str = "test-secret";

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[test]
    fn test_issued_token_is_accepted() {
        let token = issue_token(SECRET, "user-1", Duration::from_secs(60)).unwrap();
        let claims = authorize(SECRET, Some(&bearer(&token))).unwrap();
        assert_eq!(claims.id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let token = issue_token(SECRET, "user-1", Duration::from_secs(60)).unwrap();
        assert!(authorize(SECRET, Some(&format!("bEaReR {token}"))).is_ok());
    }

    #[test]
    fn test_missing_header_and_bad_scheme() {
        assert!(matches!(authorize(SECRET, None), Err(AuthError::MissingHeader)));
        assert!(matches!(
            authorize(SECRET, Some("Basic abc")),
            Err(AuthError::BadScheme)
        ));
        assert!(matches!(authorize(SECRET, Some("Bearer")), Err(AuthError::BadScheme)));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let err = authorize(SECRET, Some("Bearer not-a-jwt")).unwrap_err();
        assert_eq!(err.to_string(), "That's not even a token");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let claims = Claims {
            id: Some("user-1".to_string()),
            exp: Some(jsonwebtoken::get_current_timestamp() - 3600),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = authorize(SECRET, Some(&bearer(&token))).unwrap_err();
        assert_eq!(err.to_string(), "Token is expired");
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = issue_token("other-secret", "user-1", Duration::from_secs(60)).unwrap();
        let err = authorize(SECRET, Some(&bearer(&token))).unwrap_err();
        assert!(err.to_string().starts_with("Invalid token:"));
    }

    #[test]
    fn test_token_without_exp_is_accepted() {
        let claims = Claims {
            id: Some("service".to_string()),
            exp: None,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(authorize(SECRET, Some(&bearer(&token))).is_ok());
    }
}
