//! Host domain model.
//!
//! # Responsibility
//! - Define the user record every extension augments.
//!
//! # Invariants
//! - A user's shape is the finalized host definition; it never changes at
//!   runtime.

pub mod user;
