pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::OperationsConfig;
use crate::middleware::{TenantResolver, TENANT_HEADER};
use crate::services::{AuthService, Database, DocumentService, IdentityResolver, JwtService};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: OperationsConfig,
    pub db: Database,
    pub jwt: JwtService,
    pub tenant_resolver: TenantResolver,
    pub identity: IdentityResolver,
    pub auth_service: AuthService,
    pub document_service: DocumentService,
}

impl AppState {
    /// Wire the services around an existing database handle.
    pub fn new(config: OperationsConfig, db: Database) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;
        let tenant_resolver = TenantResolver::new(jwt.clone(), config.tenancy.allow_tenant_header);

        Ok(Self {
            identity: IdentityResolver::new(db.clone()),
            auth_service: AuthService::new(db.clone(), jwt.clone()),
            document_service: DocumentService::new(db.clone()),
            tenant_resolver,
            jwt,
            db,
            config,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route(
            "/documents/:doc_type",
            post(handlers::documents::create_document).get(handlers::documents::list_documents),
        )
        .route(
            "/documents/:doc_type/:id",
            get(handlers::documents::get_document).put(handlers::documents::update_document),
        )
        .route(
            "/documents/:doc_type/:id/transition",
            post(handlers::documents::transition_document),
        )
        .route(
            "/documents/:doc_type/:id/cancel",
            post(handlers::documents::cancel_document),
        )
        .route(
            "/customers",
            post(handlers::master_data::create_customer).get(handlers::master_data::list_customers),
        )
        .route(
            "/suppliers",
            post(handlers::master_data::create_supplier).get(handlers::master_data::list_suppliers),
        )
        .route(
            "/items",
            post(handlers::master_data::create_item).get(handlers::master_data::list_items),
        )
        .route("/addresses", post(handlers::master_data::create_address))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let tenant_scoped = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/signup", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .merge(protected)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::tenant_context_middleware,
        ));

    Router::new()
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(tenant_scoped)
        .with_state(state.clone())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

fn cors_layer(config: &OperationsConfig) -> CorsLayer {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(TENANT_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up"
        }
    })))
}
