//! Error type for the handful of tree operations that are genuinely
//! fallible in Rust even though the core is infallible by design.
//!
//! Almost everything in this crate follows the source's error model:
//! unresolved paths and misuse at the API boundary are silent no-ops or
//! `None` returns, and invariant violations or pool exhaustion panic
//! rather than propagate (see the crate-level docs). Lock poisoning is
//! recovered from in place everywhere a lock is taken (`unwrap_or_else
//! (PoisonError::into_inner)`), never surfaced as an `Error` — a panicking
//! observer callback or mutator is already an invariant violation, and the
//! tree's own state is never left inconsistent by one, so there is nothing
//! a caller could usefully do with a "the lock was poisoned" error that
//! recovering silently doesn't already do. [`Error`] exists only for the
//! two failure modes with no silent-recovery path: a thread that failed to
//! spawn, and an external event payload that does not downcast to the
//! type the caller asked for.

/// Errors surfaced by the handful of operations that can fail for reasons
/// outside the tree's own invariants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Spawning a threaded courier's worker thread failed.
    #[error("failed to spawn courier worker thread: {0}")]
    CourierSpawnFailed(#[source] std::io::Error),

    /// An external event payload did not downcast to the type the caller
    /// requested.
    #[error("external event payload type mismatch")]
    ExtEventTypeMismatch,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
