//! API middleware stack.
//!
//! Execution order (outermost to innermost):
//! 1. Audit logger, so refused requests are logged too
//! 2. Rate limiter on sign-in
//! 3. Session and staff guards

pub mod audit;
pub mod auth;
pub mod rate;
