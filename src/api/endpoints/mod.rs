//! Endpoint handlers, one module per screen.

pub mod admin;
pub mod agenda;
pub mod health;
pub mod invites;
pub mod orgs;
pub mod preferences;
pub mod registry;
pub mod session;
