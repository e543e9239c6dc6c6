//! Pure convergence core: no filesystem or process access.

pub mod codec;
pub mod collect;
pub mod dependency;
pub mod error;
pub mod feature;
pub mod peer_context;
pub mod reconcile;
pub mod resolve;
pub mod scheduler;
pub mod types;
