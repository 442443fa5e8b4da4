//! Tenant context middleware.
//!
//! Every request is bound to exactly one tenant, taken from the first source
//! that yields one:
//! 1. claims already verified earlier in the stack,
//! 2. a bearer token verified here,
//! 3. the `x-tenant-id` header (only when enabled by configuration),
//! 4. the `tenantId` field of a JSON body, for POSTs to public paths.
//!
//! A claim always outranks the header, so an authenticated caller cannot
//! switch tenants by adding one.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::TenantId;
use crate::services::{bearer_token, AccessTokenClaims, JwtService, ServiceError};
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Paths served without a tenant.
pub const PUBLIC_PATHS: &[&str] = &["/health", "/auth/register", "/auth/login", "/auth/signup"];

/// Largest body buffered while looking for `tenantId`.
const MAX_TENANT_BODY_BYTES: usize = 64 * 1024;

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Where the tenant of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    Claims,
    Token,
    Header,
    Body,
}

/// The tenant a request is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub source: TenantSource,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, source: TenantSource) -> Self {
        Self { tenant_id, source }
    }
}

/// Resolves the tenant of incoming requests.
#[derive(Clone)]
pub struct TenantResolver {
    jwt: JwtService,
    allow_header: bool,
}

impl TenantResolver {
    pub fn new(jwt: JwtService, allow_header: bool) -> Self {
        Self { jwt, allow_header }
    }

    /// Resolve the tenant of `req`.
    ///
    /// Claims verified here are attached to the returned request. When the
    /// body is inspected it is buffered and put back, so the returned
    /// request must be used in place of the original.
    pub async fn resolve_tenant(
        &self,
        mut req: Request,
    ) -> Result<(Request, Option<TenantContext>), ServiceError> {
        if let Some(claims) = req.extensions().get::<AccessTokenClaims>() {
            let tenant_id = claims.tenant()?;
            return Ok((req, Some(TenantContext::new(tenant_id, TenantSource::Claims))));
        }

        // An unverifiable token is not an error here; authentication rejects
        // it on protected routes.
        if let Some(claims) = self.verified_bearer(req.headers()) {
            if let Ok(tenant_id) = claims.tenant() {
                req.extensions_mut().insert(claims);
                return Ok((req, Some(TenantContext::new(tenant_id, TenantSource::Token))));
            }
        }

        if self.allow_header {
            if let Some(value) = req.headers().get(TENANT_HEADER) {
                let tenant_id = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.parse::<TenantId>().ok())
                    .ok_or_else(|| ServiceError::TenantRequired("Invalid tenant id".into()))?;
                return Ok((req, Some(TenantContext::new(tenant_id, TenantSource::Header))));
            }
        }

        if req.method() == Method::POST && is_public_path(req.uri().path()) {
            let (parts, body) = req.into_parts();
            let bytes = axum::body::to_bytes(body, MAX_TENANT_BODY_BYTES)
                .await
                .map_err(|_| ServiceError::Validation("Request body too large".into()))?;
            let tenant_id = body_tenant_id(&bytes)?;
            let req = Request::from_parts(parts, Body::from(bytes));
            return Ok((
                req,
                tenant_id.map(|id| TenantContext::new(id, TenantSource::Body)),
            ));
        }

        Ok((req, None))
    }

    fn verified_bearer(&self, headers: &HeaderMap) -> Option<AccessTokenClaims> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)?;
        self.jwt.verify(token).ok()
    }
}

/// `tenantId` of a JSON body. Bodies that are not JSON objects carry none;
/// the handler reports the malformed body itself.
fn body_tenant_id(bytes: &[u8]) -> Result<Option<TenantId>, ServiceError> {
    let Ok(serde_json::Value::Object(body)) = serde_json::from_slice::<serde_json::Value>(bytes)
    else {
        return Ok(None);
    };
    match body.get("tenantId") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) => raw
            .parse()
            .map(Some)
            .map_err(|_| ServiceError::TenantRequired("Invalid tenant id".into())),
        Some(_) => Err(ServiceError::TenantRequired("Invalid tenant id".into())),
    }
}

/// Attach a [`TenantContext`] to the request, or reject protected requests
/// that have none before any storage is touched.
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let public = is_public_path(req.uri().path());
    let (mut req, context) = state.tenant_resolver.resolve_tenant(req).await?;

    match context {
        Some(context) => {
            tracing::debug!(tenant_id = %context.tenant_id, source = ?context.source, "Tenant resolved");
            req.extensions_mut().insert(context);
        }
        None if public => {}
        None => return Err(ServiceError::TenantRequired("Tenant required".into()).into()),
    }

    Ok(next.run(req).await)
}

/// Extractor for the resolved tenant. Use `Option<TenantContext>` on public
/// routes.
#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .copied()
            .ok_or_else(|| ServiceError::TenantRequired("Tenant required".into()).into())
    }
}
