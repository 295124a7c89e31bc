//! Storage collaborator for the composed host entity.
//!
//! # Responsibility
//! - Define the user store contract the invitation lifecycle writes through.
//! - Keep SQLite query details out of lifecycle orchestration.
//!
//! # Invariants
//! - Writes only persist valid changesets.
//! - Declared unique violations come back as changeset errors, not
//!   transport errors.

pub mod user_repo;
