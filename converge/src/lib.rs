//! Declarative project-configuration convergence engine.
//!
//! Independently authored features declare the files, dependencies and tasks
//! a project should have. The engine orders them, lets them talk through peer
//! contexts, computes one desired state and converges the project directory
//! toward it. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, peer contexts,
//!   effect collection, content resolution, reconciliation decisions,
//!   manifest edits). No I/O.
//! - **[`io`]**: Side-effecting operations (project discovery, cache,
//!   file writes, manifests, registry lookups).
//!
//! [`apply`] and [`status`] coordinate the two.

pub mod apply;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
