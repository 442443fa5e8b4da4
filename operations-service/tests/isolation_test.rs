//! Row-level isolation tests against the storage layer itself. Require
//! PostgreSQL via `TEST_DATABASE_URL`.

mod common;

use common::TestApp;
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn raw_queries_only_see_the_bound_tenant() {
    let app = TestApp::spawn().await;
    let (acme, acme_token) = app.register_tenant("acme").await;
    let (_, globex_token) = app.register_tenant("globex").await;
    app.create_customer(&acme_token, "Acme one").await;
    app.create_customer(&globex_token, "Globex one").await;
    app.create_customer(&globex_token, "Globex two").await;

    let mut tx = app.db().begin_tenant(acme).await.unwrap();
    let (visible,): (i64,) = sqlx::query_as("SELECT count(*) FROM customers")
        .fetch_one(tx.conn())
        .await
        .unwrap();
    let (tenants,): (i64,) = sqlx::query_as("SELECT count(*) FROM tenants")
        .fetch_one(tx.conn())
        .await
        .unwrap();
    tx.rollback().await;

    assert_eq!(visible, 1);
    assert_eq!(tenants, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn writes_for_another_tenant_are_refused() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;
    let (globex, _) = app.register_tenant("globex").await;

    let mut tx = app.db().begin_tenant(acme).await.unwrap();
    let result = sqlx::query(
        "INSERT INTO customers (customer_id, tenant_id, customer_name) VALUES ($1, $2, 'Smuggled')",
    )
    .bind(Uuid::new_v4())
    .bind(globex.as_uuid())
    .execute(tx.conn())
    .await;
    tx.rollback().await;

    assert!(result.is_err(), "row-level security accepted a foreign tenant_id");

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM customers")
        .fetch_one(app.db().pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn updates_cannot_reach_other_tenants_rows() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;
    let (_, globex_token) = app.register_tenant("globex").await;
    let customer = app.create_customer(&globex_token, "Globex one").await;

    let mut tx = app.db().begin_tenant(acme).await.unwrap();
    let result = sqlx::query("UPDATE customers SET customer_name = 'Renamed' WHERE customer_id = $1")
        .bind(Uuid::parse_str(&customer).unwrap())
        .execute(tx.conn())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(result.rows_affected(), 0);

    let (name,): (String,) =
        sqlx::query_as("SELECT customer_name FROM customers WHERE customer_id = $1")
            .bind(Uuid::parse_str(&customer).unwrap())
            .fetch_one(app.db().pool())
            .await
            .unwrap();
    assert_eq!(name, "Globex one");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn tenant_binding_does_not_outlive_the_transaction() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;

    let tx = app.db().begin_tenant(acme).await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = app.db().pool().acquire().await.unwrap();
    let (tenant, role): (Option<String>, String) = sqlx::query_as(
        "SELECT NULLIF(current_setting('app.current_tenant', true), ''), current_user::text",
    )
    .fetch_one(&mut *conn)
    .await
    .unwrap();

    assert_eq!(tenant, None);
    assert_ne!(role, "operations_app");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn unbound_scoped_role_sees_nothing() {
    let app = TestApp::spawn().await;
    let (_, token) = app.register_tenant("acme").await;
    app.create_customer(&token, "Acme one").await;

    let mut tx = app.db().pool().begin().await.unwrap();
    sqlx::raw_sql("SET LOCAL ROLE operations_app")
        .execute(&mut *tx)
        .await
        .unwrap();
    let (visible,): (i64,) = sqlx::query_as("SELECT count(*) FROM customers")
        .fetch_one(&mut *tx)
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(visible, 0);
}
