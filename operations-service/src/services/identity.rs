use tracing::instrument;
use uuid::Uuid;

use crate::models::{Principal, TenantId};
use crate::services::database::{Database, TenantTx};
use crate::services::error::ServiceError;
use crate::services::jwt::AccessTokenClaims;

/// Turns verified claims into the current principal.
#[derive(Clone)]
pub struct IdentityResolver {
    db: Database,
}

impl IdentityResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Check the token's session and tenant are live, then load the user.
    #[instrument(skip(self, claims), fields(tenant_id = %claims.tenant_id, user_id = %claims.sub))]
    pub async fn resolve(&self, claims: &AccessTokenClaims) -> Result<Principal, ServiceError> {
        let tenant_id = claims.tenant()?;
        let user_id = claims.user_id()?;
        let session_id = claims.session_id()?;

        self.db
            .run_in_tenant_transaction(tenant_id, "resolve_identity", move |tx| {
                Box::pin(async move {
                    let session = tx.get_session(session_id).await?;
                    match session {
                        Some(s) if s.is_valid() && s.user_id == user_id => {}
                        _ => {
                            return Err(ServiceError::Unauthenticated(
                                "Session expired or revoked".into(),
                            ))
                        }
                    }
                    ensure_tenant_active(tx).await?;
                    load_principal(tx, tenant_id, user_id).await
                })
            })
            .await
    }
}

/// Reject tenants that do not exist or are suspended.
pub(crate) async fn ensure_tenant_active(tx: &mut TenantTx) -> Result<(), ServiceError> {
    match tx.get_tenant().await? {
        Some(tenant) if tenant.is_active() => Ok(()),
        Some(_) => Err(ServiceError::Unauthenticated("Tenant is suspended".into())),
        None => Err(ServiceError::Unauthenticated("Unknown tenant".into())),
    }
}

async fn load_principal(
    tx: &mut TenantTx,
    tenant_id: TenantId,
    user_id: Uuid,
) -> Result<Principal, ServiceError> {
    let user = tx
        .get_user(user_id)
        .await?
        .filter(|u| u.active_flag && u.tenant_id == tenant_id.as_uuid())
        .ok_or_else(|| ServiceError::NotFound("User".into()))?;
    Ok(user.principal())
}
