use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

use crate::{auth::jwt::TokenService, error::AuthError};

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "auth-token";

/// Identity resolved from a verified session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Reads the token header and verifies it. Every failure is `Unauthenticated`.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenService) -> Result<AuthUser, AuthError> {
    let token = headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthenticated(
            "Please authenticate with a valid token",
        ))?;

    match tokens.verify(token) {
        Ok(claim) => Ok(AuthUser(claim.user_id())),
        Err(_) => {
            warn!("invalid token presented");
            Err(AuthError::Unauthenticated("Invalid token"))
        }
    }
}

/// Route layer that rejects unauthenticated requests before the handler runs
/// and stores the resolved `AuthUser` in the request extensions.
pub async fn require_auth(
    State(tokens): State<Arc<TokenService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate(req.headers(), &tokens)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }
        let tokens = Arc::<TokenService>::from_ref(state);
        let user = authenticate(&parts.headers, &tokens)?;
        parts.extensions.insert(user);
        Ok(user)
    }
}
