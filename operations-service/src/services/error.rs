use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AmountOutOfRange, DocumentStatus};

/// Constraint guarding document numbers; a violation means another
/// transaction won the same number and the operation can be retried.
pub const DOCUMENT_NUMBER_CONSTRAINT: &str = "documents_tenant_type_number_key";

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const QUERY_CANCELED: &str = "57014";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    TenantRequired(String),

    #[error("Credential tenant does not match request tenant")]
    TenantMismatch,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Referenced {kind} {id} belongs to another tenant")]
    CrossTenantReference { kind: &'static str, id: Uuid },

    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Document in status {status} can no longer be modified")]
    NotEditable { status: DocumentStatus },

    #[error("Could not allocate a document number, please retry")]
    SequenceConflict,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether the whole tenant transaction may be re-run from the top.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::SequenceConflict | ServiceError::Unavailable(_) => true,
            ServiceError::Database(e) => is_conflict(e) || is_transient(e),
            _ => false,
        }
    }

    /// Whether this error is a concurrent-write conflict rather than an
    /// availability problem.
    pub fn is_conflict(&self) -> bool {
        match self {
            ServiceError::SequenceConflict => true,
            ServiceError::Database(e) => is_conflict(e),
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated(_) => "unauthenticated",
            ServiceError::TenantRequired(_) => "tenant_required",
            ServiceError::TenantMismatch => "tenant_mismatch",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::CrossTenantReference { .. } => "cross_tenant_reference",
            ServiceError::InvalidTransition { .. } => "invalid_transition",
            ServiceError::NotEditable { .. } => "not_editable",
            ServiceError::SequenceConflict => "sequence_conflict",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Validation(_) => "validation",
            ServiceError::Database(_) => "database",
            ServiceError::Internal(_) => "internal",
        }
    }
}

fn db_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn is_conflict(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = e {
        if db.is_unique_violation() {
            return db.constraint() == Some(DOCUMENT_NUMBER_CONSTRAINT);
        }
    }
    matches!(
        db_code(e).as_deref(),
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
    )
}

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
    ) || db_code(e).as_deref() == Some(QUERY_CANCELED)
}

impl From<AmountOutOfRange> for ServiceError {
    fn from(err: AmountOutOfRange) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated(msg) => {
                AppError::rejected(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg)
            }
            ServiceError::TenantRequired(msg) => {
                AppError::rejected(StatusCode::BAD_REQUEST, "TENANT_REQUIRED", msg)
            }
            e @ ServiceError::TenantMismatch => {
                AppError::rejected(StatusCode::FORBIDDEN, "TENANT_MISMATCH", e.to_string())
            }
            e @ ServiceError::NotFound(_) => {
                AppError::rejected(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
            }
            e @ ServiceError::CrossTenantReference { .. } => AppError::rejected(
                StatusCode::UNPROCESSABLE_ENTITY,
                "CROSS_TENANT_REFERENCE",
                e.to_string(),
            ),
            e @ (ServiceError::InvalidTransition { .. } | ServiceError::NotEditable { .. }) => {
                AppError::rejected(StatusCode::CONFLICT, "INVALID_TRANSITION", e.to_string())
            }
            e @ ServiceError::SequenceConflict => {
                AppError::rejected(StatusCode::CONFLICT, "SEQUENCE_CONFLICT", e.to_string())
            }
            ServiceError::Unavailable(msg) => {
                tracing::warn!(reason = %msg, "Storage unavailable");
                AppError::rejected(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "Storage temporarily unavailable",
                )
            }
            ServiceError::Conflict(msg) => {
                AppError::rejected(StatusCode::CONFLICT, "CONFLICT", msg)
            }
            ServiceError::Validation(msg) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg)
            }
            ServiceError::Database(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "Transient database failure");
                AppError::rejected(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "Storage temporarily unavailable",
                )
            }
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_and_code(err: ServiceError) -> (StatusCode, &'static str) {
        let app: AppError = err.into();
        (app.status(), app.code())
    }

    #[test]
    fn client_errors_map_to_stable_codes() {
        assert_eq!(
            status_and_code(ServiceError::TenantRequired("Tenant required".into())),
            (StatusCode::BAD_REQUEST, "TENANT_REQUIRED")
        );
        assert_eq!(
            status_and_code(ServiceError::TenantMismatch),
            (StatusCode::FORBIDDEN, "TENANT_MISMATCH")
        );
        assert_eq!(
            status_and_code(ServiceError::CrossTenantReference {
                kind: "item",
                id: Uuid::nil()
            }),
            (StatusCode::UNPROCESSABLE_ENTITY, "CROSS_TENANT_REFERENCE")
        );
        assert_eq!(
            status_and_code(ServiceError::InvalidTransition {
                from: DocumentStatus::Cancelled,
                to: DocumentStatus::Cancelled
            }),
            (StatusCode::CONFLICT, "INVALID_TRANSITION")
        );
        assert_eq!(
            status_and_code(ServiceError::NotEditable {
                status: DocumentStatus::Confirmed
            }),
            (StatusCode::CONFLICT, "INVALID_TRANSITION")
        );
        assert_eq!(
            status_and_code(ServiceError::Unauthenticated("Invalid token".into())),
            (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED")
        );
    }

    #[test]
    fn storage_failures_are_retryable_but_client_errors_are_not() {
        assert!(ServiceError::SequenceConflict.is_retryable());
        assert!(ServiceError::Unavailable("timeout".into()).is_retryable());
        assert!(ServiceError::Database(sqlx::Error::PoolTimedOut).is_retryable());

        assert!(!ServiceError::TenantMismatch.is_retryable());
        assert!(!ServiceError::Validation("bad".into()).is_retryable());
        assert!(!ServiceError::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn out_of_range_amounts_are_validation_errors() {
        let err = ServiceError::from(AmountOutOfRange);
        assert!(!err.is_retryable());
        assert_eq!(
            status_and_code(err),
            (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
        );
    }

    #[test]
    fn pool_timeout_surfaces_as_unavailable() {
        assert_eq!(
            status_and_code(ServiceError::Database(sqlx::Error::PoolTimedOut)),
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        );
    }
}
