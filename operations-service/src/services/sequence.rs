//! Sequential document numbers: `<PREFIX>-<YYYYMM>-<NNNNN>`.
//!
//! One counter row per (tenant, document type, period) is incremented
//! inside the caller's tenant transaction. The row lock taken by the upsert
//! makes a second allocation for the same series wait until the first
//! transaction commits or rolls back, and a rolled-back allocation gives
//! its number back. Different series never contend.

use chrono::{Datelike, NaiveDate};
use tracing::{debug, instrument};

use crate::models::DocumentType;
use crate::services::database::TenantTx;
use crate::services::error::ServiceError;

/// Minimum width of the zero-padded sequence part.
pub const SEQUENCE_WIDTH: usize = 5;

/// Numbering period of a document date, e.g. `202501`.
pub fn period_for(date: NaiveDate) -> String {
    format!("{:04}{:02}", date.year(), date.month())
}

pub fn format_number(document_type: DocumentType, period: &str, sequence: i64) -> String {
    format!(
        "{}-{}-{:0width$}",
        document_type.prefix(),
        period,
        sequence,
        width = SEQUENCE_WIDTH
    )
}

/// Trailing sequence of a number in the given series, if it belongs to it.
pub fn parse_sequence(document_type: DocumentType, period: &str, number: &str) -> Option<i64> {
    let suffix = number
        .strip_prefix(document_type.prefix())?
        .strip_prefix('-')?
        .strip_prefix(period)?
        .strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

impl TenantTx {
    /// Allocate the next number of a series within this transaction.
    ///
    /// The first allocation of a series starts from the highest number
    /// already stored for it, so documents imported before the counter
    /// existed are never duplicated.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id(), document_type = %document_type))]
    pub async fn next_document_number(
        &mut self,
        document_type: DocumentType,
        date: NaiveDate,
    ) -> Result<String, ServiceError> {
        let tenant_id = self.tenant_id().as_uuid();
        let period = period_for(date);
        let series = format!("{}-{}-", document_type.prefix(), period);
        let like_pattern = format!("{}%", series);
        let suffix_offset = series.len() as i32 + 1;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_sequences (tenant_id, document_type, period_code, last_value)
            VALUES (
                $1, $2, $3,
                COALESCE((
                    SELECT MAX(SUBSTRING(document_number FROM $5)::bigint)
                    FROM documents
                    WHERE tenant_id = $1
                      AND document_type = $2
                      AND document_number LIKE $4
                      AND SUBSTRING(document_number FROM $5) ~ '^[0-9]+$'
                ), 0) + 1
            )
            ON CONFLICT (tenant_id, document_type, period_code)
            DO UPDATE SET last_value = document_sequences.last_value + 1, updated_utc = NOW()
            RETURNING last_value
            "#,
        )
        .bind(tenant_id)
        .bind(document_type.as_str())
        .bind(&period)
        .bind(&like_pattern)
        .bind(suffix_offset)
        .fetch_one(self.conn())
        .await?;

        let number = format_number(document_type, &period, sequence);
        debug!(document_number = %number, "Allocated document number");
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_year_and_month() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(period_for(date), "202501");
        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        assert_eq!(period_for(date), "202412");
    }

    #[test]
    fn numbers_are_zero_padded() {
        assert_eq!(
            format_number(DocumentType::SalesInvoice, "202501", 1),
            "SI-202501-00001"
        );
        assert_eq!(
            format_number(DocumentType::Payment, "202501", 42),
            "PAY-202501-00042"
        );
    }

    #[test]
    fn numbers_grow_past_the_padding_width() {
        assert_eq!(
            format_number(DocumentType::PurchaseOrder, "202503", 123_456),
            "PO-202503-123456"
        );
    }

    #[test]
    fn parse_sequence_matches_only_its_series() {
        let t = DocumentType::SalesInvoice;
        assert_eq!(parse_sequence(t, "202501", "SI-202501-00007"), Some(7));
        assert_eq!(parse_sequence(t, "202501", "SI-202501-100000"), Some(100_000));
        assert_eq!(parse_sequence(t, "202501", "SI-202502-00007"), None);
        assert_eq!(parse_sequence(t, "202501", "PI-202501-00007"), None);
        assert_eq!(parse_sequence(t, "202501", "SI-202501-00A07"), None);
        assert_eq!(parse_sequence(t, "202501", "SI-202501-"), None);
    }

    #[test]
    fn numeric_order_differs_from_text_order_past_the_width() {
        let t = DocumentType::SalesOrder;
        let small = format_number(t, "202501", 99_999);
        let large = format_number(t, "202501", 100_000);
        // Text order would pick the wrong maximum.
        assert!(small > large);
        assert!(parse_sequence(t, "202501", &large) > parse_sequence(t, "202501", &small));
    }
}
