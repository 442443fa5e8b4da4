//! Document numbering tests. Require PostgreSQL via `TEST_DATABASE_URL`.

mod common;

use axum::http::{Method, StatusCode};
use chrono::NaiveDate;
use common::{bearer, TestApp};
use operations_service::models::{DocumentType, TenantId};
use operations_service::services::error::DOCUMENT_NUMBER_CONSTRAINT;
use operations_service::services::sequence::{parse_sequence, period_for};
use operations_service::services::ServiceError;
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::Executor;
use std::sync::atomic::{AtomicU32, Ordering};

fn january() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

fn invoice_body(customer_id: &str) -> Value {
    json!({
        "documentDate": "2025-01-15",
        "customerId": customer_id,
        "currency": "USD",
        "lines": [{ "description": "Consulting", "quantity": 1, "unitPrice": "100.00" }]
    })
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn allocations_for_one_series_are_gapless() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.register_tenant("acme").await;
    let period = period_for(january());

    let mut sequences = Vec::new();
    for _ in 0..5 {
        let number = app
            .db()
            .allocate_document_number(tenant, DocumentType::SalesInvoice, january())
            .await
            .unwrap();
        sequences.push(parse_sequence(DocumentType::SalesInvoice, &period, &number).unwrap());
    }

    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn series_are_independent_per_tenant_type_and_period() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;
    let (globex, _) = app.register_tenant("globex").await;
    let february = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();

    let allocate = |tenant: TenantId, doc_type: DocumentType, date: NaiveDate| {
        let db = app.db().clone();
        async move { db.allocate_document_number(tenant, doc_type, date).await.unwrap() }
    };

    assert_eq!(allocate(acme, DocumentType::SalesInvoice, january()).await, "SI-202501-00001");
    assert_eq!(allocate(acme, DocumentType::SalesInvoice, january()).await, "SI-202501-00002");
    assert_eq!(allocate(globex, DocumentType::SalesInvoice, january()).await, "SI-202501-00001");
    assert_eq!(allocate(acme, DocumentType::SalesOrder, january()).await, "SO-202501-00001");
    assert_eq!(allocate(acme, DocumentType::SalesInvoice, february).await, "SI-202502-00001");
    assert_eq!(allocate(acme, DocumentType::Payment, february).await, "PAY-202502-00001");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn concurrent_invoices_get_consecutive_numbers() {
    let app = TestApp::spawn().await;
    let (_, token) = app.register_tenant("acme").await;
    let customer = app.create_customer(&token, "Customer").await;
    let auth = bearer(&token);
    let headers = [("authorization", auth.as_str())];

    let (first, second) = tokio::join!(
        app.request(
            Method::POST,
            "/documents/sales-invoices",
            &headers,
            Some(invoice_body(&customer)),
        ),
        app.request(
            Method::POST,
            "/documents/sales-invoices",
            &headers,
            Some(invoice_body(&customer)),
        ),
    );

    assert_eq!(first.0, StatusCode::CREATED, "{}", first.1);
    assert_eq!(second.0, StatusCode::CREATED, "{}", second.1);

    let mut numbers = vec![
        first.1["documentNumber"].as_str().unwrap().to_string(),
        second.1["documentNumber"].as_str().unwrap().to_string(),
    ];
    numbers.sort();
    assert_eq!(numbers, vec!["SI-202501-00001", "SI-202501-00002"]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn many_concurrent_allocations_never_collide() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.register_tenant("acme").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = app.db().clone();
            tokio::spawn(async move {
                db.allocate_document_number(tenant, DocumentType::PurchaseOrder, january())
                    .await
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for handle in handles {
        let number = handle.await.unwrap().unwrap();
        sequences.push(parse_sequence(DocumentType::PurchaseOrder, "202501", &number).unwrap());
    }
    sequences.sort();

    assert_eq!(sequences, (1..=8).collect::<Vec<i64>>());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn rolled_back_allocation_does_not_consume_a_number() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.register_tenant("acme").await;

    let result: Result<(), ServiceError> = app
        .db()
        .run_in_tenant_transaction(tenant, "aborted_allocation", |tx| {
            Box::pin(async move {
                tx.next_document_number(DocumentType::SalesOrder, january())
                    .await?;
                Err(ServiceError::Validation("abort".into()))
            })
        })
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let number = app
        .db()
        .allocate_document_number(tenant, DocumentType::SalesOrder, january())
        .await
        .unwrap();
    assert_eq!(number, "SO-202501-00001");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn first_allocation_continues_after_existing_documents() {
    let app = TestApp::spawn().await;
    let (tenant, token) = app.register_tenant("acme").await;
    let customer = app.create_customer(&token, "Customer").await;
    let auth = bearer(&token);

    let (status, created) = app
        .request(
            Method::POST,
            "/documents/sales-invoices",
            &[("authorization", auth.as_str())],
            Some(invoice_body(&customer)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Simulate a document imported before the counter existed.
    let pool = app.db().pool();
    sqlx::query("UPDATE documents SET document_number = 'SI-202501-00042' WHERE document_id = $1")
        .bind(uuid::Uuid::parse_str(created["documentId"].as_str().unwrap()).unwrap())
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM document_sequences")
        .execute(pool)
        .await
        .unwrap();

    let number = app
        .db()
        .allocate_document_number(tenant, DocumentType::SalesInvoice, january())
        .await
        .unwrap();
    assert_eq!(number, "SI-202501-00043");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn failed_commit_is_reported_without_rerunning_the_operation() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.register_tenant("acme").await;

    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let result: Result<(), ServiceError> = app
        .db()
        .run_in_tenant_transaction(tenant, "deferred_violation", move |tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                // Checked only at commit, and named like the number backstop so
                // an in-flight failure would count as retryable.
                tx.conn()
                    .execute(sqlx::raw_sql(&format!(
                        "CREATE TEMP TABLE deferred_numbers (n INT, \
                             CONSTRAINT {} UNIQUE (n) DEFERRABLE INITIALLY DEFERRED) \
                         ON COMMIT DROP; \
                         INSERT INTO deferred_numbers VALUES (1), (1);",
                        DOCUMENT_NUMBER_CONSTRAINT
                    )))
                    .await?;
                Ok(())
            })
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err();
    assert!(
        !matches!(err, ServiceError::SequenceConflict),
        "commit failure was retried: {}",
        err
    );
}
