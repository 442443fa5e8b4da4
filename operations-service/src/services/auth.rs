use tracing::{info, instrument};

use crate::dtos::auth::{AuthResponse, LoginRequest, RegisterRequest};
use crate::models::tenant::TenantResponse;
use crate::models::{Principal, Role, Session, Tenant, TenantId, User};
use crate::services::database::{Database, TenantTx};
use crate::services::error::ServiceError;
use crate::services::identity::ensure_tenant_active;
use crate::services::jwt::{AccessTokenClaims, JwtService};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

const ADMIN_ROLE: &str = "admin";
const MEMBER_ROLE: &str = "member";

/// Registration, login and logout.
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    jwt: JwtService,
}

/// Fields of a user about to be created, shared by both registration paths.
#[derive(Clone)]
struct PendingUser {
    email: String,
    username: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl AuthService {
    pub fn new(db: Database, jwt: JwtService) -> Self {
        Self { db, jwt }
    }

    /// Register into the resolved tenant, or create a new tenant when the
    /// request carries a `tenant` block.
    #[instrument(skip(self, req), fields(tenant_id = ?resolved_tenant))]
    pub async fn register(
        &self,
        resolved_tenant: Option<TenantId>,
        req: RegisterRequest,
    ) -> Result<AuthResponse, ServiceError> {
        let password_hash = hash_password(&Password::new(req.password.clone())).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
        })?;
        let pending = PendingUser {
            email: req.email.trim().to_string(),
            username: req.username.trim().to_string(),
            password_hash: password_hash.into_string(),
            first_name: req.first_name,
            last_name: req.last_name,
        };

        match (resolved_tenant, req.tenant) {
            (Some(_), Some(_)) => Err(ServiceError::Validation(
                "Provide either tenantId or tenant, not both".into(),
            )),
            (None, None) => Err(ServiceError::TenantRequired(
                "tenantId or a new tenant is required".into(),
            )),
            (None, Some(new_tenant)) => {
                let tenant = Tenant::new(
                    new_tenant.code.trim().to_lowercase(),
                    new_tenant.name.trim().to_string(),
                    new_tenant.tier,
                );
                self.create_tenant_with_admin(tenant, pending).await
            }
            (Some(tenant_id), None) => self.join_tenant(tenant_id, pending).await,
        }
    }

    async fn create_tenant_with_admin(
        &self,
        tenant: Tenant,
        pending: PendingUser,
    ) -> Result<AuthResponse, ServiceError> {
        let tenant_id = TenantId::new(tenant.tenant_id);
        let jwt = self.jwt.clone();

        let response = self
            .db
            .run_in_tenant_transaction(tenant_id, "register_tenant", move |tx| {
                let tenant = tenant.clone();
                let pending = pending.clone();
                let jwt = jwt.clone();
                Box::pin(async move {
                    let tenant = tx.insert_tenant(&tenant).await?;
                    let role = tx
                        .insert_role(&Role::new(tenant.tenant_id, ADMIN_ROLE))
                        .await?;
                    let user = insert_pending_user(tx, pending, Some(role.role_id)).await?;
                    let mut response = start_session(tx, &jwt, &user).await?;
                    response.tenant = Some(TenantResponse::from(tenant));
                    Ok(response)
                })
            })
            .await?;

        info!(tenant_id = %tenant_id, user_id = %response.user.id, "Tenant created");
        Ok(response)
    }

    async fn join_tenant(
        &self,
        tenant_id: TenantId,
        pending: PendingUser,
    ) -> Result<AuthResponse, ServiceError> {
        let jwt = self.jwt.clone();

        let response = self
            .db
            .run_in_tenant_transaction(tenant_id, "register_user", move |tx| {
                let pending = pending.clone();
                let jwt = jwt.clone();
                Box::pin(async move {
                    if tx.get_tenant().await?.is_none() {
                        return Err(ServiceError::NotFound("Tenant".into()));
                    }
                    ensure_tenant_active(tx).await?;

                    let role = match tx.find_role_by_name(MEMBER_ROLE).await? {
                        Some(role) => role,
                        None => {
                            tx.insert_role(&Role::new(tenant_id.as_uuid(), MEMBER_ROLE))
                                .await?
                        }
                    };
                    let user = insert_pending_user(tx, pending, Some(role.role_id)).await?;
                    start_session(tx, &jwt, &user).await
                })
            })
            .await?;

        info!(tenant_id = %tenant_id, user_id = %response.user.id, "User registered");
        Ok(response)
    }

    /// Verify credentials within the resolved tenant and issue a token.
    #[instrument(skip(self, req), fields(tenant_id = ?resolved_tenant))]
    pub async fn login(
        &self,
        resolved_tenant: Option<TenantId>,
        req: LoginRequest,
    ) -> Result<AuthResponse, ServiceError> {
        let tenant_id = resolved_tenant
            .ok_or_else(|| ServiceError::TenantRequired("Tenant required".into()))?;
        let jwt = self.jwt.clone();
        let login = req.login.trim().to_string();
        let password = Password::new(req.password);

        let response = self
            .db
            .run_in_tenant_transaction(tenant_id, "login", move |tx| {
                let login = login.clone();
                let password = password.clone();
                let jwt = jwt.clone();
                Box::pin(async move {
                    ensure_tenant_active(tx).await?;

                    let invalid = || ServiceError::Unauthenticated("Invalid credentials".into());
                    let user = tx
                        .find_user_by_login(&login)
                        .await?
                        .filter(|u| u.active_flag)
                        .ok_or_else(invalid)?;

                    let hash = PasswordHashString::new(user.password_hash.clone());
                    let matches = verify_password(&password, &hash).map_err(|e| {
                        ServiceError::Internal(anyhow::anyhow!("Password verification: {}", e))
                    })?;
                    if !matches {
                        return Err(invalid());
                    }

                    tx.touch_last_login(user.user_id).await?;
                    start_session(tx, &jwt, &user).await
                })
            })
            .await?;

        info!(tenant_id = %tenant_id, user_id = %response.user.id, "User logged in");
        Ok(response)
    }

    /// Revoke the session behind the presented token.
    #[instrument(skip(self, claims), fields(tenant_id = %principal.tenant_id, user_id = %principal.id))]
    pub async fn logout(
        &self,
        principal: &Principal,
        claims: &AccessTokenClaims,
    ) -> Result<(), ServiceError> {
        let tenant_id = claims.tenant()?;
        let session_id = claims.session_id()?;

        let revoked = self
            .db
            .run_in_tenant_transaction(tenant_id, "logout", move |tx| {
                Box::pin(async move { tx.revoke_session(session_id).await })
            })
            .await?;

        if revoked {
            info!("Session revoked");
        }
        Ok(())
    }
}

async fn insert_pending_user(
    tx: &mut TenantTx,
    pending: PendingUser,
    role_id: Option<uuid::Uuid>,
) -> Result<User, ServiceError> {
    let user = User::new(
        tx.tenant_id().as_uuid(),
        pending.email,
        pending.username,
        pending.password_hash,
        pending.first_name,
        pending.last_name,
        role_id,
    );
    tx.insert_user(&user).await
}

/// Issue a token for `user` and record its session in the same transaction.
async fn start_session(
    tx: &mut TenantTx,
    jwt: &JwtService,
    user: &User,
) -> Result<AuthResponse, ServiceError> {
    let issued = jwt.issue_access_token(user.user_id, tx.tenant_id(), &user.email)?;
    let session_id = issued.claims.session_id()?;

    let session = Session::new(
        session_id,
        user.tenant_id,
        user.user_id,
        jwt.access_token_expiry_seconds(),
    );
    tx.insert_session(&session).await?;

    Ok(AuthResponse {
        access_token: issued.token,
        token_type: "Bearer".to_string(),
        expires_in: jwt.access_token_expiry_seconds(),
        user: user.principal(),
        tenant: None,
    })
}
