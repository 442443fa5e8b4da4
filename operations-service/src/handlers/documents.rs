//! Document handlers. The `:doc_type` segment selects the document kind,
//! e.g. `/documents/sales-invoices`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::documents::{
    DocumentRequest, DocumentResponse, ListDocumentsQuery, ListDocumentsResponse,
    TransitionRequest,
};
use crate::middleware::{AuthUser, TenantContext};
use crate::models::{Document, DocumentType, ListDocumentsFilter};
use crate::services::ServiceError;
use crate::utils::ValidatedJson;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

fn document_type(segment: &str) -> Result<DocumentType, AppError> {
    DocumentType::from_path_segment(segment)
        .ok_or_else(|| ServiceError::NotFound(format!("Document type '{}'", segment)).into())
}

pub async fn create_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    AuthUser(principal): AuthUser,
    Path(segment): Path<String>,
    ValidatedJson(req): ValidatedJson<DocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    let doc_type = document_type(&segment)?;
    let input = req.into_new_document(Utc::now().date_naive());

    let created = state
        .document_service
        .create(tenant.tenant_id, doc_type, input, principal.id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_documents(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(segment): Path<String>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<ListDocumentsResponse>, AppError> {
    let doc_type = document_type(&segment)?;
    let filter = ListDocumentsFilter {
        status: query.status,
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        page_token: query.page_token,
    };

    let page = state
        .document_service
        .list(tenant.tenant_id, doc_type, filter)
        .await?;
    Ok(Json(ListDocumentsResponse {
        documents: page.documents,
        next_page_token: page.next_page_token,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((segment, document_id)): Path<(String, Uuid)>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc_type = document_type(&segment)?;
    let document = state
        .document_service
        .get(tenant.tenant_id, doc_type, document_id)
        .await?;
    Ok(Json(document))
}

pub async fn update_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((segment, document_id)): Path<(String, Uuid)>,
    ValidatedJson(req): ValidatedJson<DocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc_type = document_type(&segment)?;
    let input = req.into_new_document(Utc::now().date_naive());

    let updated = state
        .document_service
        .update(tenant.tenant_id, doc_type, document_id, input)
        .await?;
    Ok(Json(updated))
}

pub async fn transition_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((segment, document_id)): Path<(String, Uuid)>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Document>, AppError> {
    let doc_type = document_type(&segment)?;
    let document = state
        .document_service
        .transition(tenant.tenant_id, doc_type, document_id, req.status)
        .await?;
    Ok(Json(document))
}

pub async fn cancel_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((segment, document_id)): Path<(String, Uuid)>,
) -> Result<Json<Document>, AppError> {
    let doc_type = document_type(&segment)?;
    let document = state
        .document_service
        .cancel(tenant.tenant_id, doc_type, document_id)
        .await?;
    Ok(Json(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_segments_are_not_found() {
        assert_eq!(
            document_type("sales-invoices").unwrap(),
            DocumentType::SalesInvoice
        );
        let err = document_type("quotes").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
