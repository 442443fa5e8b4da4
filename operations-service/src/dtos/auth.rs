use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::tenant::{SubscriptionTier, TenantResponse};
use crate::models::Principal;

/// Registration either joins an existing tenant (`tenantId`, or a tenant
/// resolved from the request) or creates a new one (`tenant`).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Read by the tenant resolver; kept here so the body deserializes.
    pub tenant_id: Option<Uuid>,

    #[validate(nested)]
    pub tenant: Option<NewTenantRequest>,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 100))]
    pub first_name: Option<String>,

    #[validate(length(max = 100))]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTenantRequest {
    #[validate(length(min = 2, max = 32, message = "Tenant code must be 2-32 characters"))]
    pub code: String,

    #[validate(length(min = 1, max = 200, message = "Tenant name is required"))]
    pub name: String,

    #[serde(default)]
    pub tier: SubscriptionTier,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub tenant_id: Option<Uuid>,

    /// Email or username.
    #[serde(alias = "email", alias = "username")]
    #[validate(length(min = 1, message = "Email or username is required"))]
    pub login: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: Principal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantResponse>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
