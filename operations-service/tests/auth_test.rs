//! Registration, login and session tests. Require PostgreSQL via
//! `TEST_DATABASE_URL`.

mod common;

use axum::http::{Method, StatusCode};
use common::{bearer, TestApp};
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn creating_a_tenant_returns_admin_token() {
    let app = TestApp::spawn().await;

    let (tenant_id, token) = app.register_tenant("acme").await;
    let auth = bearer(&token);

    let (status, me) = app
        .request(Method::GET, "/auth/me", &[("authorization", auth.as_str())], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["tenantId"], tenant_id.to_string());
    assert_eq!(me["username"], "acme-admin");
    assert!(me.get("passwordHash").is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn duplicate_tenant_code_conflicts() {
    let app = TestApp::spawn().await;
    app.register_tenant("acme").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/register",
            &[],
            Some(json!({
                "tenant": { "code": "acme", "name": "Other" },
                "email": "other@example.com",
                "username": "other",
                "password": "correct horse battery"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn joining_a_tenant_and_logging_in_by_body_tenant() {
    let app = TestApp::spawn().await;
    let (tenant_id, _) = app.register_tenant("acme").await;

    let (status, joined) = app
        .request(
            Method::POST,
            "/auth/register",
            &[],
            Some(json!({
                "tenantId": tenant_id.to_string(),
                "email": "bob@acme.test",
                "username": "bob",
                "password": "correct horse battery"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", joined);
    assert_eq!(joined["user"]["tenantId"], tenant_id.to_string());
    assert!(joined.get("tenant").is_none());

    let (status, login) = app
        .request(
            Method::POST,
            "/auth/login",
            &[],
            Some(json!({
                "tenantId": tenant_id.to_string(),
                "email": "BOB@acme.test",
                "password": "correct horse battery"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", login);
    assert_eq!(login["tokenType"], "Bearer");
    assert_eq!(login["user"]["username"], "bob");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn joining_an_unknown_tenant_is_not_found() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/register",
            &[],
            Some(json!({
                "tenantId": uuid::Uuid::new_v4().to_string(),
                "email": "bob@nowhere.test",
                "username": "bob",
                "password": "correct horse battery"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn duplicate_username_within_tenant_conflicts_but_not_across_tenants() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;
    let (globex, _) = app.register_tenant("globex").await;

    let join = |tenant: String| {
        json!({
            "tenantId": tenant,
            "email": "sam@example.com",
            "username": "sam",
            "password": "correct horse battery"
        })
    };

    let (first, _) = app
        .request(Method::POST, "/auth/register", &[], Some(join(acme.to_string())))
        .await;
    let (second, body) = app
        .request(Method::POST, "/auth/register", &[], Some(join(acme.to_string())))
        .await;
    let (other_tenant, _) = app
        .request(Method::POST, "/auth/register", &[], Some(join(globex.to_string())))
        .await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(other_tenant, StatusCode::CREATED);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn wrong_password_and_wrong_tenant_are_rejected_alike() {
    let app = TestApp::spawn().await;
    let (acme, _) = app.register_tenant("acme").await;
    let (globex, _) = app.register_tenant("globex").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            &[("x-tenant-id", acme.to_string().as_str())],
            Some(json!({ "username": "acme-admin", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    // The user exists, but in another tenant.
    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            &[("x-tenant-id", globex.to_string().as_str())],
            Some(json!({ "username": "acme-admin", "password": "correct horse battery" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn logout_revokes_the_session() {
    let app = TestApp::spawn().await;
    let (_, token) = app.register_tenant("acme").await;
    let auth = bearer(&token);
    let headers = [("authorization", auth.as_str())];

    let (status, _) = app.request(Method::POST, "/auth/logout", &headers, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.request(Method::GET, "/auth/me", &headers, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn credential_tenant_wins_over_header() {
    let app = TestApp::spawn().await;
    let (acme, acme_token) = app.register_tenant("acme").await;
    let (globex, _) = app.register_tenant("globex").await;
    app.create_customer(&acme_token, "Acme customer").await;

    let auth = bearer(&acme_token);
    let globex_header = globex.to_string();
    let headers = [
        ("authorization", auth.as_str()),
        ("x-tenant-id", globex_header.as_str()),
    ];

    let (status, me) = app.request(Method::GET, "/auth/me", &headers, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["tenantId"], acme.to_string());

    let (status, customers) = app.request(Method::GET, "/customers", &headers, None).await;
    assert_eq!(status, StatusCode::OK);
    let customers = customers.as_array().unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0]["tenantId"], acme.to_string());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn suspended_tenant_cannot_log_in_or_use_tokens() {
    let app = TestApp::spawn().await;
    let (acme, token) = app.register_tenant("acme").await;

    sqlx::query("UPDATE tenants SET tenant_state_code = 'suspended' WHERE tenant_id = $1")
        .bind(acme.as_uuid())
        .execute(app.db().pool())
        .await
        .unwrap();

    let auth = bearer(&token);
    let (status, _) = app
        .request(Method::GET, "/auth/me", &[("authorization", auth.as_str())], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            &[],
            Some(json!({
                "tenantId": acme.to_string(),
                "username": "acme-admin",
                "password": "correct horse battery"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Tenant is suspended");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
#[serial]
async fn expired_sessions_are_purged() {
    let app = TestApp::spawn().await;
    let (_, token) = app.register_tenant("acme").await;

    sqlx::query("UPDATE sessions SET expiry_utc = NOW() - INTERVAL '1 minute'")
        .execute(app.db().pool())
        .await
        .unwrap();

    let purged = app.db().purge_expired_sessions().await.unwrap();
    assert_eq!(purged, 1);

    let auth = bearer(&token);
    let (status, _) = app
        .request(Method::GET, "/auth/me", &[("authorization", auth.as_str())], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
