pub mod auth;
pub mod tenant;

pub use auth::{auth_middleware, AuthClaims, AuthUser};
pub use tenant::{
    is_public_path, tenant_context_middleware, TenantContext, TenantResolver, TenantSource,
    PUBLIC_PATHS, TENANT_HEADER,
};
