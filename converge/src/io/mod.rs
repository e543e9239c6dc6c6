//! Side-effecting helpers: filesystem, cache, manifests and child processes.

pub mod cache;
pub mod config;
pub mod disk;
pub mod manifest;
pub mod process;
pub mod project;
pub mod registry;
