pub mod auth;
pub mod documents;
pub mod master_data;

pub use service_core::error::ErrorResponse;
