//! Vendor administration screens.
//!
//! Every operation here is reserved to active vendor staff. The admin route
//! guard keeps other users out and the gateway refuses them again, so these
//! functions only validate forms and sequence the gateway calls.

pub mod billing;
pub mod clients;
pub mod plans;
pub mod system_users;

pub use billing::{BillingFilter, InvoiceDetail, InvoicePreview};
pub use clients::ClientCreation;
