//! Invitation use-case entry points.
//!
//! # Responsibility
//! - Create invited users, accept invitations, resolve pending tokens.
//! - Delegate persistence to a `UserStore` implementation.
//!
//! # Invariants
//! - Nothing is persisted when a changeset is invalid.
//! - `get_by_token` never resolves an accepted invitation.
//! - Tokens and identity values never reach the log.

use super::extension::{accept_changeset, invite_changeset, is_pending, FIELD_TOKEN};
use crate::changeset::{Changeset, Params};
use crate::model::user::User;
use crate::repo::user_repo::{RepoResult, UserQuery, UserStore, WriteError};
use crate::schema::host::UserSchema;
use crate::schema::FieldValue;
use log::{debug, info, warn};

/// Invitation lifecycle over one finalized schema and one store.
pub struct InvitationContext<'s, S: UserStore> {
    schema: &'s UserSchema,
    store: S,
}

impl<'s, S: UserStore> InvitationContext<'s, S> {
    pub fn new(schema: &'s UserSchema, store: S) -> Self {
        Self { schema, store }
    }

    pub fn schema(&self) -> &UserSchema {
        self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a pending invitation on behalf of `inviter`.
    ///
    /// # Errors
    /// - `WriteError::Invalid` with every validation or unique violation.
    /// - `WriteError::Repo` for storage failures.
    pub fn create(&self, inviter: &User, params: &Params) -> Result<User, WriteError> {
        let changeset = invite_changeset(
            self.schema,
            Changeset::new(Some(self.schema.blank_user())),
            inviter,
            params,
        );
        let result = self.store.insert(changeset);
        log_write("invitation_create", &result);
        result
    }

    /// Accepts the pending invitation held by `user`.
    ///
    /// # Errors
    /// - `WriteError::Invalid` when `user` was already accepted or `params`
    ///   fail any host changeset stage.
    /// - `WriteError::Repo` for storage failures, including `NotFound`.
    pub fn update(&self, user: User, params: &Params) -> Result<User, WriteError> {
        let changeset = accept_changeset(self.schema, Changeset::change(user), params);
        let result = self.store.update(changeset);
        log_write("invitation_accept", &result);
        result
    }

    /// Pending invitation holding `token`, if any.
    ///
    /// Accepted invitations resolve to `None`.
    pub fn get_by_token(&self, token: &str) -> RepoResult<Option<User>> {
        let query = UserQuery::new().eq(FIELD_TOKEN, FieldValue::string(token));
        let found = self.store.get_by(&query)?;
        let pending = found.filter(is_pending);
        debug!(
            "event=invitation_lookup module=invitation status=ok found={}",
            pending.is_some()
        );
        Ok(pending)
    }
}

fn log_write(event: &str, result: &Result<User, WriteError>) {
    match result {
        Ok(user) => info!("event={event} module=invitation status=ok user_id={}", user.id),
        Err(WriteError::Invalid(changeset)) => {
            let fields: Vec<&str> = changeset
                .errors()
                .iter()
                .map(|err| err.field.as_str())
                .collect();
            warn!(
                "event={event} module=invitation status=rejected error_fields={}",
                fields.join(",")
            );
        }
        Err(WriteError::Repo(err)) => {
            warn!("event={event} module=invitation status=error error={err}")
        }
    }
}
