//! Route reconciliation for a shared REST API.
//!
//! This crate owns the deterministic part of a module deployment: parsing
//! declared paths, indexing the remote resource tree, converging it with
//! idempotent creates, and gating stage deployments on actual change. It
//! intentionally excludes AWS SDK concerns; those live behind the
//! [`remote::ApiGateway`] and [`remote::FunctionDirectory`] seams and are
//! implemented in `route_sync_aws`.

pub mod binding;
pub mod controller;
pub mod declaration;
pub mod deployer;
pub mod path;
pub mod plan;
pub mod reconciler;
pub mod remote;
pub mod retry;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod tree;

pub use controller::{RunConfig, RunController, RunError, RunMode, RunStatus, RunSummary};
pub use declaration::{ConfigError, ModuleDeclaration, RouteDeclaration};
pub use path::{parse_path, ParseError, PathSpec, Segment};
pub use reconciler::{ReconcileReport, Reconciler};
pub use tree::{ResourceNode, ResourceTreeIndex};
