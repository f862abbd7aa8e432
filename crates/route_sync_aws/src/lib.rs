//! AWS wiring for route reconciliation.
//!
//! This crate owns runtime integration details (SDK adapters for API Gateway
//! and Lambda, the command line, tracing setup) and delegates every decision
//! to `route_sync_core`.

pub mod adapters;
pub mod cli;
pub mod observability;
pub mod summary;
