//! Authentication handlers.
//!
//! Registration and login are public: their tenant comes from the token,
//! the development header or the `tenantId` body field. Logout and `me`
//! run behind the auth middleware.

use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::auth::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest};
use crate::middleware::{AuthClaims, AuthUser, TenantContext};
use crate::models::Principal;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Join an existing tenant or create a new one with its first admin.
pub async fn register(
    State(state): State<AppState>,
    tenant: Option<TenantContext>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let response = state
        .auth_service
        .register(tenant.map(|t| t.tenant_id), req)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    tenant: Option<TenantContext>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let response = state
        .auth_service
        .login(tenant.map(|t| t.tenant_id), req)
        .await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    AuthClaims(claims): AuthClaims,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth_service.logout(&principal, &claims).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

pub async fn me(AuthUser(principal): AuthUser) -> Json<Principal> {
    Json(principal)
}
