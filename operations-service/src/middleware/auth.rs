use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::middleware::tenant::TenantContext;
use crate::models::Principal;
use crate::services::{bearer_token, AccessTokenClaims, ServiceError};
use crate::AppState;

/// Require a valid credential whose tenant matches the request tenant, and
/// attach the resolved [`Principal`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = match req.extensions().get::<AccessTokenClaims>().cloned() {
        Some(claims) => claims,
        None => {
            let token = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(bearer_token)
                .ok_or_else(|| {
                    ServiceError::Unauthenticated("Missing or invalid Authorization header".into())
                })?;
            state.jwt.verify(token)?
        }
    };

    let context = req
        .extensions()
        .get::<TenantContext>()
        .copied()
        .ok_or_else(|| ServiceError::TenantRequired("Tenant required".into()))?;
    if claims.tenant()? != context.tenant_id {
        return Err(ServiceError::TenantMismatch.into());
    }

    let principal = state.identity.resolve(&claims).await?;

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Extractor for the authenticated principal.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ServiceError::Unauthenticated("Not authenticated".into()).into())
    }
}

/// Extractor for the verified token claims of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthClaims(pub AccessTokenClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessTokenClaims>()
            .cloned()
            .map(AuthClaims)
            .ok_or_else(|| ServiceError::Unauthenticated("Not authenticated".into()).into())
    }
}
