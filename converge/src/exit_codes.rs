//! Stable exit codes for the `converge` CLI.

/// The project converged (or is already converged).
pub const OK: i32 = 0;
/// Invalid settings, unknown features, scheduling or recipe errors.
pub const INVALID: i32 = 1;
/// A file operation or dependency resolution failed.
pub const FAILED: i32 = 2;
/// Manual edits need review.
pub const REVIEW: i32 = 3;
