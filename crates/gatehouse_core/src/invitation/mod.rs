//! Invitation lifecycle built on the extension engine.
//!
//! # Responsibility
//! - Contribute the invitation fields, relations and token index to the host.
//! - Drive the pending → accepted transition through the user store.
//!
//! # Invariants
//! - `invitation_accepted_at == Null` means pending; any value means accepted.
//! - Accepted is terminal.
//! - Token values are unique across all users regardless of state.

pub mod context;
pub mod extension;

pub use context::InvitationContext;
pub use extension::{
    InvitationExtension, EXTENSION_ID, FIELD_ACCEPTED_AT, FIELD_INVITED_BY_ID, FIELD_TOKEN,
    MESSAGE_ACCEPTED,
};
