//! User model - principals scoped to exactly one tenant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// User entity (tenant-scoped). Carries the password hash, so it never leaves
/// the service layer; handlers see [`Principal`].
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<Uuid>,
    pub active_flag: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn new(
        tenant_id: Uuid,
        email: String,
        username: String,
        password_hash: String,
        first_name: Option<String>,
        last_name: Option<String>,
        role_id: Option<Uuid>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            username,
            password_hash,
            first_name,
            last_name,
            role_id,
            active_flag: true,
            last_login_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.user_id,
            tenant_id: self.tenant_id,
            email: self.email.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role_id: self.role_id,
        }
    }
}

/// The authenticated actor attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<Uuid>,
}

/// Role assigned to users of a tenant.
#[derive(Debug, Clone, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
}

impl Role {
    pub fn new(tenant_id: Uuid, role_name: &str) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            role_name: role_name.to_string(),
        }
    }
}
