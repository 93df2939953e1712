//! HTTP API.
//!
//! Exposes the application services as JSON endpoints under `/api/`.
//! Guarded subtrees redirect instead of erroring: to `/login` without a
//! session, to `/app` for non-staff callers of `/api/admin`.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{serve, start_server, ApiServer};
pub use types::ApiContext;
