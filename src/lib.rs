//! Protocol disable/lockup coordination for gaming machines: per-protocol lockup
//! and soft-error tracking plus host-negotiated change deadlines.

use std::sync::{Mutex, MutexGuard};

pub mod config;
/// Per-protocol lockup and soft-error tracking.
pub mod disable;
/// Serializable event payloads.
pub mod dto;
/// Construction errors.
pub mod error;
pub mod hub;
/// Host-negotiated change deadlines and the request queue.
pub mod pending;
/// Concrete reason sets for the supported host protocols.
pub mod protocols;

pub use error::BuildError;

/// Acquire `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
