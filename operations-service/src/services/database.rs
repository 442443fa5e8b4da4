//! Tenant-bound storage access.
//!
//! All business queries run on a [`TenantTx`]: a transaction that has the
//! tenant bound as `app.current_tenant` and has assumed the row-level-security
//! role. The only way to obtain one is [`Database::begin_tenant`], so nothing
//! can query tenant data before binding.

use crate::config::{DatabaseConfig, TransactionConfig};
use crate::db;
use crate::models::{
    Address, Customer, Document, DocumentLine, DocumentStatus, DocumentTotals, DocumentType,
    Item, ListDocumentsFilter, NewDocument, NewLine, ReferenceKind, Role, Session, Supplier,
    Tenant, TenantId, User,
};
use crate::services::error::ServiceError;
use crate::services::metrics::{DB_QUERY_DURATION, ERRORS_TOTAL, SEQUENCE_RETRIES_TOTAL};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INITIAL_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF_MS: u64 = 1_000;

/// A database role name checked to be a plain lowercase identifier, so it
/// can be placed in a `SET LOCAL ROLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedRole(String);

impl ScopedRole {
    pub fn parse(name: &str) -> Result<Self, ServiceError> {
        let mut chars = name.chars();
        let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if valid_start && valid_rest && name.len() <= 63 {
            Ok(Self(name.to_string()))
        } else {
            Err(ServiceError::Validation(format!(
                "Invalid database role name: {:?}",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn set_statement(&self) -> String {
        format!("SET LOCAL ROLE {}", self.0)
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    scoped_role: Option<ScopedRole>,
    max_retries: u32,
    operation_timeout: Duration,
}

/// A transaction bound to one tenant.
pub struct TenantTx {
    tenant_id: TenantId,
    tx: Transaction<'static, Postgres>,
}

impl TenantTx {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// The underlying connection, already scoped to the tenant.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) {
        if let Err(e) = self.tx.rollback().await {
            warn!(error = %e, "Rollback failed; connection will be discarded");
        }
    }
}

fn unavailable(step: &'static str) -> impl Fn(sqlx::Error) -> ServiceError {
    move |e| ServiceError::Unavailable(format!("{}: {}", step, e))
}

impl Database {
    /// Connect and build the wrapper.
    #[instrument(skip(database, transactions), fields(service = "operations-service"))]
    pub async fn connect(
        database: &DatabaseConfig,
        transactions: &TransactionConfig,
    ) -> Result<Self, ServiceError> {
        let pool = db::create_pool(database)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("Failed to connect: {}", e)))?;
        Self::from_pool(pool, database, transactions)
    }

    pub fn from_pool(
        pool: PgPool,
        database: &DatabaseConfig,
        transactions: &TransactionConfig,
    ) -> Result<Self, ServiceError> {
        let scoped_role = database
            .scoped_role
            .as_deref()
            .map(ScopedRole::parse)
            .transpose()?;

        Ok(Self {
            pool,
            scoped_role,
            max_retries: transactions.max_retries,
            operation_timeout: Duration::from_secs(transactions.operation_timeout_seconds),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        db::health_check(&self.pool)
            .await
            .map_err(unavailable("health check"))
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        db::run_migrations(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Migration failed: {}", e)))
    }

    /// Open a transaction and bind it to `tenant_id`.
    ///
    /// The tenant is passed as a bind parameter to `set_config`; the role is
    /// a validated identifier.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn begin_tenant(&self, tenant_id: TenantId) -> Result<TenantTx, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(unavailable("begin"))?;

        let statement_timeout_ms = self.operation_timeout.as_millis().to_string();
        sqlx::query(
            "SELECT set_config('app.current_tenant', $1, true), \
                    set_config('statement_timeout', $2, true)",
        )
        .bind(tenant_id.to_string())
        .bind(statement_timeout_ms)
        .execute(&mut *tx)
        .await
        .map_err(unavailable("bind tenant"))?;

        if let Some(role) = &self.scoped_role {
            (&mut *tx)
                .execute(sqlx::raw_sql(&role.set_statement()))
                .await
                .map_err(unavailable("assume scoped role"))?;
        }

        Ok(TenantTx { tenant_id, tx })
    }

    /// Run `op` in a tenant-bound transaction and commit.
    ///
    /// The closure is re-run from the top on numbering conflicts,
    /// serialization failures and transient storage errors, at most
    /// `max_retries` more times. Each attempt is bounded by the operation
    /// timeout; an attempt that exceeds it is rolled back. Exhausted conflict
    /// retries surface as [`ServiceError::SequenceConflict`].
    ///
    /// The commit runs once, outside the timeout, and its failure is returned
    /// as-is.
    ///
    /// Closures must own what they capture (clone per attempt) because each
    /// attempt gets a fresh transaction.
    pub async fn run_in_tenant_transaction<T, F>(
        &self,
        tenant_id: TenantId,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, ServiceError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut TenantTx) -> BoxFuture<'t, Result<T, ServiceError>> + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            let timer = DB_QUERY_DURATION
                .with_label_values(&[operation])
                .start_timer();
            let outcome =
                tokio::time::timeout(self.operation_timeout, self.attempt(tenant_id, &mut op))
                    .await;

            let err = match outcome {
                Ok(Ok((tx, value))) => {
                    let committed = tx.commit().await;
                    timer.observe_duration();
                    return match committed {
                        Ok(()) => Ok(value),
                        Err(e) => {
                            warn!(operation, tenant_id = %tenant_id, error = %e, "Commit failed");
                            ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                            Err(e)
                        }
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => ServiceError::Unavailable(format!(
                    "{} exceeded {:?}",
                    operation, self.operation_timeout
                )),
            };
            timer.observe_duration();

            if !err.is_retryable() || attempt >= self.max_retries {
                let err = if err.is_conflict() {
                    ServiceError::SequenceConflict
                } else {
                    err
                };
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                return Err(err);
            }

            attempt += 1;
            SEQUENCE_RETRIES_TOTAL.with_label_values(&[operation]).inc();
            let delay = backoff(attempt);
            warn!(
                operation,
                tenant_id = %tenant_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying tenant transaction"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Run one attempt up to, but not including, the commit. A failed or
    /// timed-out attempt drops its transaction, which rolls it back.
    async fn attempt<T, F>(
        &self,
        tenant_id: TenantId,
        op: &mut F,
    ) -> Result<(TenantTx, T), ServiceError>
    where
        F: for<'t> FnMut(&'t mut TenantTx) -> BoxFuture<'t, Result<T, ServiceError>> + Send,
    {
        let mut tx = self.begin_tenant(tenant_id).await?;
        match op(&mut tx).await {
            Ok(value) => Ok((tx, value)),
            Err(e) => {
                tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Reserve the next number of a series in its own committed
    /// transaction.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_type = %document_type))]
    pub async fn allocate_document_number(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        period: NaiveDate,
    ) -> Result<String, ServiceError> {
        self.run_in_tenant_transaction(tenant_id, "allocate_document_number", move |tx| {
            Box::pin(async move { tx.next_document_number(document_type, period).await })
        })
        .await
    }

    /// Delete sessions that expired before now. Runs as the pool owner, outside
    /// any tenant binding.
    #[instrument(skip(self))]
    pub async fn purge_expired_sessions(&self) -> Result<u64, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["purge_expired_sessions"])
            .start_timer();

        let result = sqlx::query("DELETE FROM sessions WHERE expiry_utc < NOW()")
            .execute(&self.pool)
            .await?;

        timer.observe_duration();

        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}

/// Exponential backoff with up to 25% jitter.
fn backoff(attempt: u32) -> Duration {
    let exp = INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16));
    let base = exp.min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 4);
    Duration::from_millis(base + jitter)
}

// -------------------------------------------------------------------------
// Tenant, Role and User Operations
// -------------------------------------------------------------------------

impl TenantTx {
    /// Insert the tenant this transaction is bound to.
    #[instrument(skip(self, tenant), fields(tenant_id = %self.tenant_id))]
    pub async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<Tenant, ServiceError> {
        if tenant.tenant_id != self.tenant_id.as_uuid() {
            return Err(ServiceError::TenantMismatch);
        }

        sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (tenant_id, tenant_code, tenant_label, tenant_state_code, subscription_tier, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING tenant_id, tenant_code, tenant_label, tenant_state_code, subscription_tier, created_utc
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_code)
        .bind(&tenant.tenant_label)
        .bind(&tenant.tenant_state_code)
        .bind(&tenant.subscription_tier)
        .bind(tenant.created_utc)
        .fetch_one(self.conn())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict(format!("Tenant code '{}' is taken", tenant.tenant_code))
            }
            _ => ServiceError::Database(e),
        })
    }

    pub async fn get_tenant(&mut self) -> Result<Option<Tenant>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT tenant_id, tenant_code, tenant_label, tenant_state_code, subscription_tier, created_utc
            FROM tenants
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(self.conn())
        .await?;
        Ok(tenant)
    }

    pub async fn insert_role(&mut self, role: &Role) -> Result<Role, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (role_id, tenant_id, role_name)
            VALUES ($1, $2, $3)
            RETURNING role_id, tenant_id, role_name
            "#,
        )
        .bind(role.role_id)
        .bind(tenant_id)
        .bind(&role.role_name)
        .fetch_one(self.conn())
        .await?;
        Ok(role)
    }

    pub async fn find_role_by_name(&mut self, role_name: &str) -> Result<Option<Role>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let role = sqlx::query_as::<_, Role>(
            "SELECT role_id, tenant_id, role_name FROM roles WHERE tenant_id = $1 AND role_name = $2",
        )
        .bind(tenant_id)
        .bind(role_name)
        .fetch_optional(self.conn())
        .await?;
        Ok(role)
    }

    #[instrument(skip(self, user), fields(tenant_id = %self.tenant_id, user_id = %user.user_id))]
    pub async fn insert_user(&mut self, user: &User) -> Result<User, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, tenant_id, email, username, password_hash, first_name, last_name,
                               role_id, active_flag, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING user_id, tenant_id, email, username, password_hash, first_name, last_name,
                      role_id, active_flag, last_login_utc, created_utc
            "#,
        )
        .bind(user.user_id)
        .bind(tenant_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role_id)
        .bind(user.active_flag)
        .bind(user.created_utc)
        .fetch_one(self.conn())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                match db_err.constraint() {
                    Some("users_tenant_username_key") => {
                        ServiceError::Conflict("Username already taken".into())
                    }
                    _ => ServiceError::Conflict("Email already registered".into()),
                }
            }
            _ => ServiceError::Database(e),
        })
    }

    /// Look a user up by email or username, case-insensitively.
    pub async fn find_user_by_login(&mut self, login: &str) -> Result<Option<User>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, tenant_id, email, username, password_hash, first_name, last_name,
                   role_id, active_flag, last_login_utc, created_utc
            FROM users
            WHERE tenant_id = $1 AND (LOWER(email) = LOWER($2) OR LOWER(username) = LOWER($2))
            "#,
        )
        .bind(tenant_id)
        .bind(login)
        .fetch_optional(self.conn())
        .await?;
        Ok(user)
    }

    pub async fn get_user(&mut self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, tenant_id, email, username, password_hash, first_name, last_name,
                   role_id, active_flag, last_login_utc, created_utc
            FROM users
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(self.conn())
        .await?;
        Ok(user)
    }

    pub async fn touch_last_login(&mut self, user_id: Uuid) -> Result<(), ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        sqlx::query("UPDATE users SET last_login_utc = NOW() WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Session Operations
// -------------------------------------------------------------------------

impl TenantTx {
    pub async fn insert_session(&mut self, session: &Session) -> Result<(), ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, tenant_id, user_id, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.session_id)
        .bind(tenant_id)
        .bind(session.user_id)
        .bind(session.expiry_utc)
        .bind(session.created_utc)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    pub async fn get_session(&mut self, session_id: Uuid) -> Result<Option<Session>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT session_id, tenant_id, user_id, expiry_utc, revoked_utc, created_utc
            FROM sessions
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(self.conn())
        .await?;
        Ok(session)
    }

    /// Returns false when there was no live session to revoke.
    pub async fn revoke_session(&mut self, session_id: Uuid) -> Result<bool, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -------------------------------------------------------------------------
// Master Data Operations
// -------------------------------------------------------------------------

impl TenantTx {
    pub async fn insert_customer(
        &mut self,
        name: &str,
        email: Option<&str>,
    ) -> Result<Customer, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (customer_id, tenant_id, customer_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING customer_id, tenant_id, customer_name, email, active_flag, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(email)
        .fetch_one(self.conn())
        .await?;
        Ok(customer)
    }

    pub async fn list_customers(&mut self, limit: i64) -> Result<Vec<Customer>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, tenant_id, customer_name, email, active_flag, created_utc
            FROM customers
            WHERE tenant_id = $1
            ORDER BY customer_name
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(self.conn())
        .await?;
        Ok(customers)
    }

    pub async fn insert_supplier(
        &mut self,
        name: &str,
        email: Option<&str>,
    ) -> Result<Supplier, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let supplier = sqlx::query_as::<_, Supplier>(
            r#"
            INSERT INTO suppliers (supplier_id, tenant_id, supplier_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING supplier_id, tenant_id, supplier_name, email, active_flag, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(email)
        .fetch_one(self.conn())
        .await?;
        Ok(supplier)
    }

    pub async fn list_suppliers(&mut self, limit: i64) -> Result<Vec<Supplier>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let suppliers = sqlx::query_as::<_, Supplier>(
            r#"
            SELECT supplier_id, tenant_id, supplier_name, email, active_flag, created_utc
            FROM suppliers
            WHERE tenant_id = $1
            ORDER BY supplier_name
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(self.conn())
        .await?;
        Ok(suppliers)
    }

    pub async fn insert_item(
        &mut self,
        sku: &str,
        name: &str,
        unit_price: Decimal,
    ) -> Result<Item, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (item_id, tenant_id, sku, item_name, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING item_id, tenant_id, sku, item_name, unit_price, active_flag, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(sku)
        .bind(name)
        .bind(unit_price)
        .fetch_one(self.conn())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict(format!("Item with SKU '{}' already exists", sku))
            }
            _ => ServiceError::Database(e),
        })
    }

    pub async fn list_items(&mut self, limit: i64) -> Result<Vec<Item>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT item_id, tenant_id, sku, item_name, unit_price, active_flag, created_utc
            FROM items
            WHERE tenant_id = $1
            ORDER BY sku
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(self.conn())
        .await?;
        Ok(items)
    }

    pub async fn insert_address(
        &mut self,
        line1: &str,
        line2: Option<&str>,
        city: &str,
        postal_code: Option<&str>,
        country: &str,
    ) -> Result<Address, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let address = sqlx::query_as::<_, Address>(
            r#"
            INSERT INTO addresses (address_id, tenant_id, line1, line2, city, postal_code, country)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING address_id, tenant_id, line1, line2, city, postal_code, country, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(line1)
        .bind(line2)
        .bind(city)
        .bind(postal_code)
        .bind(country)
        .fetch_one(self.conn())
        .await?;
        Ok(address)
    }

    /// Owning tenant of each id that exists, regardless of tenant. Ids absent
    /// from the result do not exist (or are inactive).
    pub async fn reference_owners(
        &mut self,
        kind: ReferenceKind,
        ids: &[Uuid],
    ) -> Result<Vec<(Uuid, Uuid)>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let owners = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT ref_id, owner_tenant_id FROM reference_tenants($1, $2)",
        )
        .bind(kind.as_str())
        .bind(ids)
        .fetch_all(self.conn())
        .await?;
        Ok(owners)
    }
}

// -------------------------------------------------------------------------
// Document Operations
// -------------------------------------------------------------------------

const DOCUMENT_COLUMNS: &str = "document_id, tenant_id, document_type, document_number, status_code, \
     document_date, customer_id, supplier_id, source_document_id, address_id, currency, subtotal, \
     discount_total, tax_total, grand_total, notes, created_by, created_utc, updated_utc";

const LINE_COLUMNS: &str = "line_id, document_id, tenant_id, line_no, item_id, applied_document_id, \
     description, quantity, unit_price, discount_percent, tax_percent, base_amount, \
     discount_amount, tax_amount, line_total";

impl TenantTx {
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, input, totals), fields(tenant_id = %self.tenant_id, document_number = %document_number))]
    pub async fn insert_document(
        &mut self,
        document_id: Uuid,
        document_type: DocumentType,
        document_number: &str,
        status: DocumentStatus,
        input: &NewDocument,
        totals: &DocumentTotals,
        created_by: Uuid,
    ) -> Result<Document, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            r#"
            INSERT INTO documents (document_id, tenant_id, document_type, document_number, status_code,
                document_date, customer_id, supplier_id, source_document_id, address_id, currency,
                subtotal, discount_total, tax_total, grand_total, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(document_id)
            .bind(tenant_id)
            .bind(document_type.as_str())
            .bind(document_number)
            .bind(status.as_str())
            .bind(input.document_date)
            .bind(input.customer_id)
            .bind(input.supplier_id)
            .bind(input.source_document_id)
            .bind(input.address_id)
            .bind(&input.currency)
            .bind(totals.subtotal)
            .bind(totals.discount_total)
            .bind(totals.tax_total)
            .bind(totals.grand_total)
            .bind(&input.notes)
            .bind(created_by)
            .fetch_one(self.conn())
            .await?;
        Ok(document)
    }

    /// Insert lines numbered from 1 in input order.
    pub async fn insert_lines(
        &mut self,
        document_id: Uuid,
        lines: &[NewLine],
    ) -> Result<Vec<DocumentLine>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            r#"
            INSERT INTO document_lines (line_id, document_id, tenant_id, line_no, item_id, applied_document_id,
                description, quantity, unit_price, discount_percent, tax_percent,
                base_amount, discount_amount, tax_amount, line_total)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            LINE_COLUMNS
        );

        let mut stored = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let amounts = line.amounts()?;
            let row = sqlx::query_as::<_, DocumentLine>(&sql)
                .bind(Uuid::new_v4())
                .bind(document_id)
                .bind(tenant_id)
                .bind(index as i32 + 1)
                .bind(line.item_id)
                .bind(line.applied_document_id)
                .bind(&line.description)
                .bind(line.quantity)
                .bind(line.unit_price)
                .bind(line.discount_percent)
                .bind(line.tax_percent)
                .bind(amounts.base)
                .bind(amounts.discount)
                .bind(amounts.tax)
                .bind(amounts.total)
                .fetch_one(self.conn())
                .await?;
            stored.push(row);
        }
        Ok(stored)
    }

    pub async fn delete_lines(&mut self, document_id: Uuid) -> Result<u64, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let result =
            sqlx::query("DELETE FROM document_lines WHERE tenant_id = $1 AND document_id = $2")
                .bind(tenant_id)
                .bind(document_id)
                .execute(self.conn())
                .await?;
        Ok(result.rows_affected())
    }

    /// Fetch a document, optionally taking a row lock for a following update.
    pub async fn get_document(
        &mut self,
        document_type: DocumentType,
        document_id: Uuid,
        for_update: bool,
    ) -> Result<Option<Document>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            "SELECT {} FROM documents WHERE tenant_id = $1 AND document_type = $2 AND document_id = $3{}",
            DOCUMENT_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(tenant_id)
            .bind(document_type.as_str())
            .bind(document_id)
            .fetch_optional(self.conn())
            .await?;
        Ok(document)
    }

    /// Document types of the given ids, restricted to this tenant.
    pub async fn document_types(
        &mut self,
        ids: &[Uuid],
    ) -> Result<Vec<(Uuid, String)>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant_id = self.tenant_id.as_uuid();
        let types = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT document_id, document_type FROM documents WHERE tenant_id = $1 AND document_id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(self.conn())
        .await?;
        Ok(types)
    }

    pub async fn get_lines(&mut self, document_id: Uuid) -> Result<Vec<DocumentLine>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            "SELECT {} FROM document_lines WHERE tenant_id = $1 AND document_id = $2 ORDER BY line_no",
            LINE_COLUMNS
        );
        let lines = sqlx::query_as::<_, DocumentLine>(&sql)
            .bind(tenant_id)
            .bind(document_id)
            .fetch_all(self.conn())
            .await?;
        Ok(lines)
    }

    /// List documents of one type, newest first, with cursor pagination.
    pub async fn list_documents(
        &mut self,
        document_type: DocumentType,
        filter: &ListDocumentsFilter,
    ) -> Result<Vec<Document>, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let page_size = filter.page_size.clamp(1, 100);
        let sql = format!(
            r#"
            SELECT {cols} FROM documents
            WHERE tenant_id = $1
              AND document_type = $2
              AND ($3::text IS NULL OR status_code = $3)
              AND ($4::uuid IS NULL OR (created_utc, document_id) <
                   (SELECT created_utc, document_id FROM documents WHERE tenant_id = $1 AND document_id = $4))
            ORDER BY created_utc DESC, document_id DESC
            LIMIT $5
            "#,
            cols = DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, Document>(&sql)
            .bind(tenant_id)
            .bind(document_type.as_str())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.page_token)
            .bind(page_size)
            .fetch_all(self.conn())
            .await?;
        Ok(documents)
    }

    pub async fn update_document_header(
        &mut self,
        document_id: Uuid,
        input: &NewDocument,
        totals: &DocumentTotals,
    ) -> Result<Document, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            r#"
            UPDATE documents SET
                document_date = $3, customer_id = $4, supplier_id = $5, source_document_id = $6,
                address_id = $7, currency = $8, subtotal = $9, discount_total = $10,
                tax_total = $11, grand_total = $12, notes = $13, updated_utc = NOW()
            WHERE tenant_id = $1 AND document_id = $2
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(tenant_id)
            .bind(document_id)
            .bind(input.document_date)
            .bind(input.customer_id)
            .bind(input.supplier_id)
            .bind(input.source_document_id)
            .bind(input.address_id)
            .bind(&input.currency)
            .bind(totals.subtotal)
            .bind(totals.discount_total)
            .bind(totals.tax_total)
            .bind(totals.grand_total)
            .bind(&input.notes)
            .fetch_one(self.conn())
            .await?;
        Ok(document)
    }

    pub async fn set_document_status(
        &mut self,
        document_id: Uuid,
        status: DocumentStatus,
    ) -> Result<Document, ServiceError> {
        let tenant_id = self.tenant_id.as_uuid();
        let sql = format!(
            r#"
            UPDATE documents SET status_code = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND document_id = $2
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(tenant_id)
            .bind(document_id)
            .bind(status.as_str())
            .fetch_one(self.conn())
            .await?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_role_accepts_plain_identifiers_only() {
        assert!(ScopedRole::parse("operations_app").is_ok());
        assert!(ScopedRole::parse("_r2").is_ok());

        assert!(ScopedRole::parse("").is_err());
        assert!(ScopedRole::parse("2fast").is_err());
        assert!(ScopedRole::parse("Admin").is_err());
        assert!(ScopedRole::parse("app; RESET ROLE").is_err());
        assert!(ScopedRole::parse("app\"x").is_err());
    }

    #[test]
    fn scoped_role_statement() {
        let role = ScopedRole::parse("operations_app").unwrap();
        assert_eq!(role.set_statement(), "SET LOCAL ROLE operations_app");
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let first = backoff(1);
        assert!(first >= Duration::from_millis(50));
        assert!(first <= Duration::from_millis(63));

        let capped = backoff(30);
        assert!(capped >= Duration::from_millis(MAX_BACKOFF_MS));
        assert!(capped <= Duration::from_millis(MAX_BACKOFF_MS + MAX_BACKOFF_MS / 4));
    }
}
