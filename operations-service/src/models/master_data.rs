//! Master data that documents reference.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_name: String,
    pub email: Option<String>,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub supplier_id: Uuid,
    pub tenant_id: Uuid,
    pub supplier_name: String,
    pub email: Option<String>,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: Uuid,
    pub tenant_id: Uuid,
    pub sku: String,
    pub item_name: String,
    pub unit_price: Decimal,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub address_id: Uuid,
    pub tenant_id: Uuid,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: Option<String>,
    pub country: String,
    pub created_utc: DateTime<Utc>,
}

/// Kinds of row a document may reference. Names match the
/// `reference_tenants` database function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Customer,
    Supplier,
    Item,
    Address,
    Document,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Customer => "customer",
            ReferenceKind::Supplier => "supplier",
            ReferenceKind::Item => "item",
            ReferenceKind::Address => "address",
            ReferenceKind::Document => "document",
        }
    }
}
