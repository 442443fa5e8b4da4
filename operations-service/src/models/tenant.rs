//! Tenant model - the isolation boundary every row belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Validated tenant identifier.
///
/// Only constructed from a parsed UUID, so its textual form is always
/// UUID-shaped before it reaches a session-scoping statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(TenantId)
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Tenant state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    Active,
    Suspended,
}

impl TenantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantState::Active => "active",
            TenantState::Suspended => "suspended",
        }
    }
}

/// Subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Standard,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Standard => "standard",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_code: String,
    pub tenant_label: String,
    pub tenant_state_code: String,
    pub subscription_tier: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new(tenant_code: String, tenant_label: String, tier: SubscriptionTier) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_code,
            tenant_label,
            tenant_state_code: TenantState::Active.as_str().to_string(),
            subscription_tier: tier.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.tenant_state_code == TenantState::Active.as_str()
    }
}

/// Tenant response for API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantResponse {
    pub tenant_id: Uuid,
    pub tenant_code: String,
    pub tenant_label: String,
    pub tenant_state_code: String,
    pub subscription_tier: String,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            tenant_id: t.tenant_id,
            tenant_code: t.tenant_code,
            tenant_label: t.tenant_label,
            tenant_state_code: t.tenant_state_code,
            subscription_tier: t.subscription_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_parses_only_uuids() {
        let id: TenantId = "7b1d2f0e-8c4a-4e55-9a43-3f0c1f2b9d11".parse().unwrap();
        assert_eq!(id.to_string(), "7b1d2f0e-8c4a-4e55-9a43-3f0c1f2b9d11");

        assert!("acme".parse::<TenantId>().is_err());
        assert!("1'; DROP TABLE tenants; --".parse::<TenantId>().is_err());
        assert!("".parse::<TenantId>().is_err());
    }

    #[test]
    fn new_tenant_starts_active() {
        let tenant = Tenant::new("acme".into(), "Acme Ltd".into(), SubscriptionTier::Standard);
        assert!(tenant.is_active());
        assert_eq!(tenant.subscription_tier, "standard");
    }
}
