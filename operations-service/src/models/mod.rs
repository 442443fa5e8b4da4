pub mod document;
pub mod master_data;
pub mod session;
pub mod tenant;
pub mod user;

pub use document::{
    compute_totals, AmountOutOfRange, Document, DocumentLine, DocumentStatus, DocumentTotals, DocumentType,
    DocumentWithLines, ListDocumentsFilter, NewDocument, NewLine,
};
pub use master_data::{Address, Customer, Item, ReferenceKind, Supplier};
pub use session::Session;
pub use tenant::{SubscriptionTier, Tenant, TenantId, TenantState};
pub use user::{Principal, Role, User};
