//! Numbered documents: orders, invoices and payments, with their lines.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Kind of numbered document. Each kind has its own number series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    SalesOrder,
    PurchaseOrder,
    SalesInvoice,
    PurchaseInvoice,
    Payment,
}

/// Which master-data table a document's counterparty comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counterparty {
    Customer,
    Supplier,
    /// Payments are either received from a customer or made to a supplier.
    CustomerOrSupplier,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::SalesOrder,
        DocumentType::PurchaseOrder,
        DocumentType::SalesInvoice,
        DocumentType::PurchaseInvoice,
        DocumentType::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::SalesOrder => "sales_order",
            DocumentType::PurchaseOrder => "purchase_order",
            DocumentType::SalesInvoice => "sales_invoice",
            DocumentType::PurchaseInvoice => "purchase_invoice",
            DocumentType::Payment => "payment",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// URL segment used by the document routes, e.g. `sales-invoices`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            DocumentType::SalesOrder => "sales-orders",
            DocumentType::PurchaseOrder => "purchase-orders",
            DocumentType::SalesInvoice => "sales-invoices",
            DocumentType::PurchaseInvoice => "purchase-invoices",
            DocumentType::Payment => "payments",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.path_segment() == segment)
    }

    /// Number prefix of the series.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::SalesOrder => "SO",
            DocumentType::PurchaseOrder => "PO",
            DocumentType::SalesInvoice => "SI",
            DocumentType::PurchaseInvoice => "PI",
            DocumentType::Payment => "PAY",
        }
    }

    pub fn counterparty(&self) -> Counterparty {
        match self {
            DocumentType::SalesOrder | DocumentType::SalesInvoice => Counterparty::Customer,
            DocumentType::PurchaseOrder | DocumentType::PurchaseInvoice => Counterparty::Supplier,
            DocumentType::Payment => Counterparty::CustomerOrSupplier,
        }
    }

    /// Document type a `source_document_id` may point at, if any.
    pub fn source_type(&self) -> Option<DocumentType> {
        match self {
            DocumentType::SalesInvoice => Some(DocumentType::SalesOrder),
            DocumentType::PurchaseInvoice => Some(DocumentType::PurchaseOrder),
            _ => None,
        }
    }

    /// Whether lines carry an item reference (goods) or an applied invoice
    /// (payment allocations).
    pub fn lines_apply_to_documents(&self) -> bool {
        matches!(self, DocumentType::Payment)
    }

    /// Allowed status changes for this document type.
    pub fn allowed_transitions(&self) -> &'static [(DocumentStatus, DocumentStatus)] {
        use DocumentStatus::*;
        match self {
            DocumentType::SalesOrder => &[
                (Draft, Confirmed),
                (Draft, Cancelled),
                (Confirmed, Cancelled),
            ],
            DocumentType::PurchaseOrder => &[
                (Draft, Confirmed),
                (Draft, Cancelled),
                (Confirmed, Cancelled),
                (Confirmed, Received),
            ],
            DocumentType::SalesInvoice | DocumentType::PurchaseInvoice => &[
                (Draft, Cancelled),
                (Draft, PartiallyPaid),
                (Draft, Paid),
                (PartiallyPaid, Paid),
            ],
            DocumentType::Payment => &[(Draft, Confirmed), (Draft, Cancelled)],
        }
    }

    pub fn can_transition(&self, from: DocumentStatus, to: DocumentStatus) -> bool {
        self.allowed_transitions().contains(&(from, to))
    }

    /// A status with no outgoing transitions.
    pub fn is_terminal(&self, status: DocumentStatus) -> bool {
        !self
            .allowed_transitions()
            .iter()
            .any(|(from, _)| *from == status)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Confirmed,
    Received,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Confirmed => "confirmed",
            DocumentStatus::Received => "received",
            DocumentStatus::PartiallyPaid => "partially_paid",
            DocumentStatus::Paid => "paid",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocumentStatus::Draft),
            "confirmed" => Some(DocumentStatus::Confirmed),
            "received" => Some(DocumentStatus::Received),
            "partially_paid" => Some(DocumentStatus::PartiallyPaid),
            "paid" => Some(DocumentStatus::Paid),
            "cancelled" => Some(DocumentStatus::Cancelled),
            _ => None,
        }
    }

    /// Only drafts may have their header or lines replaced.
    pub fn is_editable(&self) -> bool {
        matches!(self, DocumentStatus::Draft)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document header.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub document_type: String,
    pub document_number: String,
    pub status_code: String,
    pub document_date: NaiveDate,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub source_document_id: Option<Uuid>,
    pub address_id: Option<Uuid>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Document {
    pub fn status(&self) -> Option<DocumentStatus> {
        DocumentStatus::from_str_opt(&self.status_code)
    }

    pub fn kind(&self) -> Option<DocumentType> {
        DocumentType::from_str_opt(&self.document_type)
    }
}

/// Document line with its computed amounts.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub line_id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub line_no: i32,
    pub item_id: Option<Uuid>,
    pub applied_document_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_percent: Decimal,
    pub base_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub line_total: Decimal,
}

/// Header plus lines, as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWithLines {
    #[serde(flatten)]
    pub document: Document,
    pub lines: Vec<DocumentLine>,
}

/// Input for creating or replacing a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_date: NaiveDate,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub source_document_id: Option<Uuid>,
    pub address_id: Option<Uuid>,
    pub currency: String,
    pub notes: Option<String>,
    pub lines: Vec<NewLine>,
}

#[derive(Debug, Clone)]
pub struct NewLine {
    pub item_id: Option<Uuid>,
    pub applied_document_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_percent: Decimal,
}

/// Filter parameters for listing documents.
#[derive(Debug, Clone, Default)]
pub struct ListDocumentsFilter {
    pub status: Option<DocumentStatus>,
    pub page_size: i64,
    pub page_token: Option<Uuid>,
}

/// Monetary amounts of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    pub base: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Aggregated document totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
}

/// Exclusive bound of stored quantities and unit prices (`NUMERIC(18, 4)`).
pub const MAX_LINE_INPUT: Decimal = Decimal::from_parts(276_447_232, 23_283, 0, false, 0);

/// Exclusive bound of stored amounts and totals (`NUMERIC(18, 2)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_874_919_424, 2_328_306, 0, false, 0);

/// A line amount or document total does not fit the stored precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Amounts must stay below 10^16")]
pub struct AmountOutOfRange;

fn money(value: Decimal) -> Result<Decimal, AmountOutOfRange> {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded.abs() < MAX_AMOUNT {
        Ok(rounded)
    } else {
        Err(AmountOutOfRange)
    }
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, AmountOutOfRange> {
    a.checked_add(b).ok_or(AmountOutOfRange).and_then(money)
}

fn percent_of(amount: Decimal, percent: Decimal) -> Result<Decimal, AmountOutOfRange> {
    amount
        .checked_mul(percent)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(AmountOutOfRange)
        .and_then(money)
}

impl NewLine {
    /// Discount applies to the base amount, tax to the discounted amount.
    pub fn amounts(&self) -> Result<LineAmounts, AmountOutOfRange> {
        let base = self
            .quantity
            .checked_mul(self.unit_price)
            .ok_or(AmountOutOfRange)
            .and_then(money)?;
        let discount = percent_of(base, self.discount_percent)?;
        let taxable = add(base, -discount)?;
        let tax = percent_of(taxable, self.tax_percent)?;
        Ok(LineAmounts {
            base,
            discount,
            tax,
            total: add(taxable, tax)?,
        })
    }
}

/// Sum line amounts into document totals.
pub fn compute_totals(lines: &[NewLine]) -> Result<DocumentTotals, AmountOutOfRange> {
    let mut totals = DocumentTotals::default();
    for amounts in lines.iter().map(NewLine::amounts) {
        let amounts = amounts?;
        totals.subtotal = add(totals.subtotal, amounts.base)?;
        totals.discount_total = add(totals.discount_total, amounts.discount)?;
        totals.tax_total = add(totals.tax_total, amounts.tax)?;
    }
    totals.grand_total = add(
        add(totals.subtotal, -totals.discount_total)?,
        totals.tax_total,
    )?;
    Ok(totals)
}
