//! Entity model contract shared by every persistent type.
//!
//! # Responsibility
//! - Define descriptors, attribute kinds and the `Entity` access trait.
//! - Keep value conversion rules in one place.
//!
//! # Invariants
//! - Descriptors are validated before registration creates storage.
//! - Primary-key values compare by value, never by identity.

pub mod entity;
pub mod value;
