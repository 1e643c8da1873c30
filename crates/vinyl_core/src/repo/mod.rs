//! Repository layer: record helpers over an execution context.
//!
//! # Responsibility
//! - Define the per-entity record helper contract.
//! - Isolate SQL text and parameter binding from import orchestration.
//!
//! # Invariants
//! - Repository reads flush pending context edits first.
//! - Absence is `Ok(None)` or an empty list, never an error.

pub mod query;
pub mod record_repo;
