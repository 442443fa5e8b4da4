//! Services layer for operations-service.
//!
//! Tenant-bound storage access, identity, authentication and the document
//! workflow.

pub mod auth;
pub mod database;
pub mod documents;
pub mod error;
pub mod identity;
mod jwt;
pub mod metrics;
pub mod sequence;

pub use auth::AuthService;
pub use database::{Database, ScopedRole, TenantTx};
pub use documents::{DocumentPage, DocumentService};
pub use error::ServiceError;
pub use identity::IdentityResolver;
pub use jwt::{bearer_token, AccessTokenClaims, IssuedToken, JwtService};
