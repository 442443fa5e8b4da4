use std::collections::HashSet;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::document::Counterparty;
use crate::models::{
    compute_totals, Document, DocumentStatus, DocumentType, DocumentWithLines,
    ListDocumentsFilter, NewDocument, ReferenceKind, TenantId,
};
use crate::services::database::{Database, TenantTx};
use crate::services::error::ServiceError;
use crate::services::metrics::DOCUMENTS_TOTAL;

/// A page of documents and the cursor for the next one.
#[derive(Debug)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub next_page_token: Option<Uuid>,
}

/// Creates and maintains numbered documents. Every operation runs in one
/// tenant transaction: references are checked, then the header, its lines
/// and its number are written together or not at all.
#[derive(Clone)]
pub struct DocumentService {
    db: Database,
}

impl DocumentService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, document_type = %document_type))]
    pub async fn create(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        input: NewDocument,
        created_by: Uuid,
    ) -> Result<DocumentWithLines, ServiceError> {
        check_shape(document_type, &input)?;
        let totals = compute_totals(&input.lines)?;

        let created = self
            .db
            .run_in_tenant_transaction(tenant_id, "create_document", move |tx| {
                let input = input.clone();
                Box::pin(async move {
                    validate_references(tx, document_type, &input).await?;

                    let number = tx
                        .next_document_number(document_type, input.document_date)
                        .await?;
                    let document_id = Uuid::new_v4();
                    let document = tx
                        .insert_document(
                            document_id,
                            document_type,
                            &number,
                            DocumentStatus::Draft,
                            &input,
                            &totals,
                            created_by,
                        )
                        .await?;
                    let lines = tx.insert_lines(document_id, &input.lines).await?;
                    Ok(DocumentWithLines { document, lines })
                })
            })
            .await?;

        DOCUMENTS_TOTAL
            .with_label_values(&[document_type.as_str(), "created"])
            .inc();
        info!(
            document_id = %created.document.document_id,
            document_number = %created.document.document_number,
            "Document created"
        );
        Ok(created)
    }

    /// Replace header fields and lines of a draft document. The number and
    /// status are kept.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub async fn update(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        document_id: Uuid,
        input: NewDocument,
    ) -> Result<DocumentWithLines, ServiceError> {
        check_shape(document_type, &input)?;
        let totals = compute_totals(&input.lines)?;

        let updated = self
            .db
            .run_in_tenant_transaction(tenant_id, "update_document", move |tx| {
                let input = input.clone();
                Box::pin(async move {
                    let current = locked_document(tx, document_type, document_id).await?;
                    let status = stored_status(&current)?;
                    if !status.is_editable() {
                        return Err(ServiceError::NotEditable { status });
                    }
                    if input.source_document_id == Some(document_id) {
                        return Err(ServiceError::Validation(
                            "A document cannot be its own source".into(),
                        ));
                    }

                    validate_references(tx, document_type, &input).await?;

                    let document = tx
                        .update_document_header(document_id, &input, &totals)
                        .await?;
                    tx.delete_lines(document_id).await?;
                    let lines = tx.insert_lines(document_id, &input.lines).await?;
                    Ok(DocumentWithLines { document, lines })
                })
            })
            .await?;

        DOCUMENTS_TOTAL
            .with_label_values(&[document_type.as_str(), "updated"])
            .inc();
        info!(document_number = %updated.document.document_number, "Document updated");
        Ok(updated)
    }

    /// Move a document to `target` if its type allows the change from the
    /// current status.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub async fn transition(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        document_id: Uuid,
        target: DocumentStatus,
    ) -> Result<Document, ServiceError> {
        let document = self
            .db
            .run_in_tenant_transaction(tenant_id, "transition_document", move |tx| {
                Box::pin(async move {
                    let current = locked_document(tx, document_type, document_id).await?;
                    let from = stored_status(&current)?;
                    if !document_type.can_transition(from, target) {
                        return Err(ServiceError::InvalidTransition { from, to: target });
                    }
                    tx.set_document_status(document_id, target).await
                })
            })
            .await?;

        DOCUMENTS_TOTAL
            .with_label_values(&[document_type.as_str(), target.as_str()])
            .inc();
        info!(
            document_number = %document.document_number,
            status = %target,
            "Document status changed"
        );
        Ok(document)
    }

    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        document_id: Uuid,
    ) -> Result<Document, ServiceError> {
        self.transition(
            tenant_id,
            document_type,
            document_id,
            DocumentStatus::Cancelled,
        )
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_id = %document_id))]
    pub async fn get(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        document_id: Uuid,
    ) -> Result<DocumentWithLines, ServiceError> {
        self.db
            .run_in_tenant_transaction(tenant_id, "get_document", move |tx| {
                Box::pin(async move {
                    let document = tx
                        .get_document(document_type, document_id, false)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound("Document".into()))?;
                    let lines = tx.get_lines(document_id).await?;
                    Ok(DocumentWithLines { document, lines })
                })
            })
            .await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id, document_type = %document_type))]
    pub async fn list(
        &self,
        tenant_id: TenantId,
        document_type: DocumentType,
        filter: ListDocumentsFilter,
    ) -> Result<DocumentPage, ServiceError> {
        let page_size = filter.page_size.clamp(1, 100);
        let documents = self
            .db
            .run_in_tenant_transaction(tenant_id, "list_documents", move |tx| {
                let filter = filter.clone();
                Box::pin(async move { tx.list_documents(document_type, &filter).await })
            })
            .await?;

        let next_page_token = if documents.len() as i64 == page_size {
            documents.last().map(|d| d.document_id)
        } else {
            None
        };
        Ok(DocumentPage {
            documents,
            next_page_token,
        })
    }
}

async fn locked_document(
    tx: &mut TenantTx,
    document_type: DocumentType,
    document_id: Uuid,
) -> Result<Document, ServiceError> {
    tx.get_document(document_type, document_id, true)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Document".into()))
}

fn stored_status(document: &Document) -> Result<DocumentStatus, ServiceError> {
    document.status().ok_or_else(|| {
        ServiceError::Internal(anyhow::anyhow!(
            "Unknown status {} on document {}",
            document.status_code,
            document.document_id
        ))
    })
}

/// Checks that need no storage: which references a document type may carry.
pub fn check_shape(document_type: DocumentType, input: &NewDocument) -> Result<(), ServiceError> {
    let invalid = |msg: &str| Err(ServiceError::Validation(msg.to_string()));

    match (
        document_type.counterparty(),
        input.customer_id,
        input.supplier_id,
    ) {
        (Counterparty::Customer, Some(_), None) => {}
        (Counterparty::Customer, _, _) => {
            return invalid("customerId is required and supplierId is not allowed")
        }
        (Counterparty::Supplier, None, Some(_)) => {}
        (Counterparty::Supplier, _, _) => {
            return invalid("supplierId is required and customerId is not allowed")
        }
        (Counterparty::CustomerOrSupplier, Some(_), None)
        | (Counterparty::CustomerOrSupplier, None, Some(_)) => {}
        (Counterparty::CustomerOrSupplier, _, _) => {
            return invalid("Exactly one of customerId or supplierId is required")
        }
    }

    if input.source_document_id.is_some() && document_type.source_type().is_none() {
        return invalid("This document type has no source document");
    }

    for line in &input.lines {
        if document_type.lines_apply_to_documents() {
            if line.item_id.is_some() {
                return invalid("Payment lines reference invoices, not items");
            }
            if line.applied_document_id.is_none() {
                return invalid("Payment lines require appliedDocumentId");
            }
        } else if line.applied_document_id.is_some() {
            return invalid("appliedDocumentId is only allowed on payment lines");
        }
    }

    Ok(())
}

/// Invoice type a payment's lines may be applied to.
fn applied_invoice_type(input: &NewDocument) -> DocumentType {
    if input.customer_id.is_some() {
        DocumentType::SalesInvoice
    } else {
        DocumentType::PurchaseInvoice
    }
}

/// Every referenced row must exist and belong to the bound tenant. Runs
/// before any write of the calling operation.
async fn validate_references(
    tx: &mut TenantTx,
    document_type: DocumentType,
    input: &NewDocument,
) -> Result<(), ServiceError> {
    let tenant = tx.tenant_id().as_uuid();

    let mut checks: Vec<(ReferenceKind, &'static str, Vec<Uuid>)> = Vec::new();
    if let Some(id) = input.customer_id {
        checks.push((ReferenceKind::Customer, "Customer", vec![id]));
    }
    if let Some(id) = input.supplier_id {
        checks.push((ReferenceKind::Supplier, "Supplier", vec![id]));
    }
    if let Some(id) = input.address_id {
        checks.push((ReferenceKind::Address, "Address", vec![id]));
    }

    let items = unique(input.lines.iter().filter_map(|l| l.item_id));
    if !items.is_empty() {
        checks.push((ReferenceKind::Item, "Item", items));
    }

    let mut documents: Vec<Uuid> = input.source_document_id.into_iter().collect();
    documents.extend(input.lines.iter().filter_map(|l| l.applied_document_id));
    let documents = unique(documents.into_iter());
    if !documents.is_empty() {
        checks.push((ReferenceKind::Document, "Document", documents.clone()));
    }

    for (kind, label, ids) in &checks {
        let owners = tx.reference_owners(*kind, ids).await?;
        for id in ids {
            match owners.iter().find(|(ref_id, _)| ref_id == id) {
                None => return Err(ServiceError::NotFound(format!("{} {}", label, id))),
                Some((_, owner)) if *owner != tenant => {
                    return Err(ServiceError::CrossTenantReference {
                        kind: kind.as_str(),
                        id: *id,
                    })
                }
                Some(_) => {}
            }
        }
    }

    if documents.is_empty() {
        return Ok(());
    }
    let types = tx.document_types(&documents).await?;
    let type_of = |id: Uuid| {
        types
            .iter()
            .find(|(doc_id, _)| *doc_id == id)
            .and_then(|(_, t)| DocumentType::from_str_opt(t))
    };

    if let (Some(source_id), Some(expected)) =
        (input.source_document_id, document_type.source_type())
    {
        if type_of(source_id) != Some(expected) {
            return Err(ServiceError::Validation(format!(
                "Source document must be a {}",
                expected
            )));
        }
    }

    if document_type.lines_apply_to_documents() {
        let expected = applied_invoice_type(input);
        for id in input.lines.iter().filter_map(|l| l.applied_document_id) {
            if type_of(id) != Some(expected) {
                return Err(ServiceError::Validation(format!(
                    "Payment lines must apply to a {}",
                    expected
                )));
            }
        }
    }

    Ok(())
}

fn unique(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewLine;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn line() -> NewLine {
        NewLine {
            item_id: Some(Uuid::new_v4()),
            applied_document_id: None,
            description: "Widget".into(),
            quantity: Decimal::ONE,
            unit_price: Decimal::TEN,
            discount_percent: Decimal::ZERO,
            tax_percent: Decimal::ZERO,
        }
    }

    fn document(customer: bool, supplier: bool) -> NewDocument {
        NewDocument {
            document_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            customer_id: customer.then(Uuid::new_v4),
            supplier_id: supplier.then(Uuid::new_v4),
            source_document_id: None,
            address_id: None,
            currency: "USD".into(),
            notes: None,
            lines: vec![line()],
        }
    }

    #[test]
    fn sales_documents_need_a_customer_only() {
        assert!(check_shape(DocumentType::SalesOrder, &document(true, false)).is_ok());
        assert!(check_shape(DocumentType::SalesInvoice, &document(false, true)).is_err());
        assert!(check_shape(DocumentType::SalesOrder, &document(true, true)).is_err());
    }

    #[test]
    fn purchase_documents_need_a_supplier_only() {
        assert!(check_shape(DocumentType::PurchaseOrder, &document(false, true)).is_ok());
        assert!(check_shape(DocumentType::PurchaseInvoice, &document(true, false)).is_err());
    }

    #[test]
    fn orders_have_no_source_document() {
        let mut order = document(true, false);
        order.source_document_id = Some(Uuid::new_v4());
        assert!(check_shape(DocumentType::SalesOrder, &order).is_err());

        let mut invoice = document(true, false);
        invoice.source_document_id = Some(Uuid::new_v4());
        assert!(check_shape(DocumentType::SalesInvoice, &invoice).is_ok());
    }

    #[test]
    fn payment_lines_apply_to_invoices() {
        let mut payment = document(true, false);
        assert!(matches!(
            check_shape(DocumentType::Payment, &payment),
            Err(ServiceError::Validation(_))
        ));

        payment.lines[0].item_id = None;
        payment.lines[0].applied_document_id = Some(Uuid::new_v4());
        assert!(check_shape(DocumentType::Payment, &payment).is_ok());
        assert_eq!(applied_invoice_type(&payment), DocumentType::SalesInvoice);

        let mut outgoing = payment.clone();
        outgoing.customer_id = None;
        outgoing.supplier_id = Some(Uuid::new_v4());
        assert_eq!(applied_invoice_type(&outgoing), DocumentType::PurchaseInvoice);

        payment.supplier_id = Some(Uuid::new_v4());
        assert!(check_shape(DocumentType::Payment, &payment).is_err());
    }

    #[test]
    fn goods_lines_cannot_apply_to_documents() {
        let mut order = document(true, false);
        order.lines[0].applied_document_id = Some(Uuid::new_v4());
        assert!(check_shape(DocumentType::SalesOrder, &order).is_err());
    }

    #[test]
    fn unique_keeps_first_occurrence_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(unique(vec![a, b, a].into_iter()), vec![a, b]);
    }
}
