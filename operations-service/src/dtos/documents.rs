use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::document::MAX_LINE_INPUT;
use crate::models::{DocumentStatus, DocumentWithLines, NewDocument, NewLine};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    /// Defaults to today; also selects the numbering period.
    pub document_date: Option<NaiveDate>,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub source_document_id: Option<Uuid>,
    pub address_id: Option<Uuid>,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,

    #[validate(length(min = 1, max = 500, message = "A document needs 1-500 lines"), nested)]
    pub lines: Vec<LineRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub item_id: Option<Uuid>,
    pub applied_document_id: Option<Uuid>,

    #[validate(length(min = 1, max = 500, message = "Line description is required"))]
    pub description: String,

    #[validate(custom(function = "positive"))]
    pub quantity: Decimal,

    #[validate(custom(function = "non_negative"))]
    pub unit_price: Decimal,

    #[serde(default)]
    #[validate(custom(function = "percentage"))]
    pub discount_percent: Decimal,

    #[serde(default)]
    #[validate(custom(function = "percentage"))]
    pub tax_percent: Decimal,
}

fn below_line_limit(value: &Decimal) -> Result<(), ValidationError> {
    if *value < MAX_LINE_INPUT {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_below_10_pow_14"))
    }
}

fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if !value.is_sign_positive() || value.is_zero() {
        return Err(ValidationError::new("must_be_positive"));
    }
    below_line_limit(value)
}

/// Non-negative and small enough to be stored as a quantity or price.
pub(crate) fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    below_line_limit(value)
}

fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    non_negative(value)?;
    if *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("must_be_at_most_100"));
    }
    Ok(())
}

impl DocumentRequest {
    pub fn into_new_document(self, today: NaiveDate) -> NewDocument {
        NewDocument {
            document_date: self.document_date.unwrap_or(today),
            customer_id: self.customer_id,
            supplier_id: self.supplier_id,
            source_document_id: self.source_document_id,
            address_id: self.address_id,
            currency: self.currency.to_ascii_uppercase(),
            notes: self.notes,
            lines: self
                .lines
                .into_iter()
                .map(|l| NewLine {
                    item_id: l.item_id,
                    applied_document_id: l.applied_document_id,
                    description: l.description,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    discount_percent: l.discount_percent,
                    tax_percent: l.tax_percent,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: DocumentStatus,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsQuery {
    pub status: Option<DocumentStatus>,
    pub page_size: Option<i64>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    pub documents: Vec<crate::models::Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}

pub type DocumentResponse = DocumentWithLines;
