//! Master data handlers. Thin tenant-scoped inserts and listings for the
//! rows documents reference.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::master_data::{AddressRequest, ItemRequest, ListQuery, PartyRequest};
use crate::middleware::TenantContext;
use crate::models::{Address, Customer, Item, Supplier};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn create_customer(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<PartyRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    let customer = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "create_customer", move |tx| {
            let name = req.name.trim().to_string();
            let email = req.email.clone();
            Box::pin(async move { tx.insert_customer(&name, email.as_deref()).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn list_customers(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Customer>>, AppError> {
    let limit = query.limit();
    let customers = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "list_customers", move |tx| {
            Box::pin(async move { tx.list_customers(limit).await })
        })
        .await?;
    Ok(Json(customers))
}

pub async fn create_supplier(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<PartyRequest>,
) -> Result<(StatusCode, Json<Supplier>), AppError> {
    let supplier = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "create_supplier", move |tx| {
            let name = req.name.trim().to_string();
            let email = req.email.clone();
            Box::pin(async move { tx.insert_supplier(&name, email.as_deref()).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(supplier)))
}

pub async fn list_suppliers(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Supplier>>, AppError> {
    let limit = query.limit();
    let suppliers = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "list_suppliers", move |tx| {
            Box::pin(async move { tx.list_suppliers(limit).await })
        })
        .await?;
    Ok(Json(suppliers))
}

pub async fn create_item(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<ItemRequest>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    let item = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "create_item", move |tx| {
            let sku = req.sku.trim().to_string();
            let name = req.name.trim().to_string();
            let unit_price = req.unit_price;
            Box::pin(async move { tx.insert_item(&sku, &name, unit_price).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn list_items(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Item>>, AppError> {
    let limit = query.limit();
    let items = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "list_items", move |tx| {
            Box::pin(async move { tx.list_items(limit).await })
        })
        .await?;
    Ok(Json(items))
}

pub async fn create_address(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<AddressRequest>,
) -> Result<(StatusCode, Json<Address>), AppError> {
    let address = state
        .db
        .run_in_tenant_transaction(tenant.tenant_id, "create_address", move |tx| {
            let line1 = req.line1.clone();
            let line2 = req.line2.clone();
            let city = req.city.clone();
            let postal_code = req.postal_code.clone();
            let country = req.country.to_ascii_uppercase();
            Box::pin(async move {
                tx.insert_address(
                    &line1,
                    line2.as_deref(),
                    &city,
                    postal_code.as_deref(),
                    &country,
                )
                .await
            })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(address)))
}
