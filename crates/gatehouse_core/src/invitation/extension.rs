//! Invitation capability module and its changesets.

use crate::changeset::{Changeset, ErrorKind, Params};
use crate::config::Config;
use crate::extension::capability::{Capability, CapabilityModule};
use crate::model::user::{now_epoch_ms, user_id_changeset, User};
use crate::schema::gate::{require_field, StructuralError};
use crate::schema::host::{HostDefinition, UserSchema};
use crate::schema::{FieldSpec, FieldType, FieldValue, IndexSpec, RelationSpec, RelationTarget};
use uuid::Uuid;

pub const EXTENSION_ID: &str = "invitation";
pub const FIELD_TOKEN: &str = "invitation_token";
pub const FIELD_ACCEPTED_AT: &str = "invitation_accepted_at";
pub const FIELD_INVITED_BY_ID: &str = "invited_by_id";
pub const MESSAGE_ACCEPTED: &str = "has already been accepted";

const RELATION_INVITED_BY: &str = "invited_by";
const RELATION_INVITED_USERS: &str = "invited_users";

/// Adds invitation state to the host entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvitationExtension;

impl CapabilityModule for InvitationExtension {
    fn id(&self) -> &str {
        EXTENSION_ID
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::Fields,
            Capability::Relations,
            Capability::Indexes,
            Capability::ValidateHost,
        ]
    }

    fn attrs(&self, _config: &Config) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(FIELD_TOKEN, FieldType::String),
            FieldSpec::new(FIELD_ACCEPTED_AT, FieldType::UtcDatetime),
        ]
    }

    fn assocs(&self, _config: &Config) -> Vec<RelationSpec> {
        vec![
            RelationSpec::belongs_to(RELATION_INVITED_BY, RelationTarget::host()),
            RelationSpec::has_many(RELATION_INVITED_USERS, RelationTarget::host())
                .with_foreign_key(FIELD_INVITED_BY_ID),
        ]
    }

    fn indexes(&self, _config: &Config) -> Vec<IndexSpec> {
        vec![IndexSpec::unique(&[FIELD_TOKEN])]
    }

    fn validate(&self, config: &Config, host: &HostDefinition) -> Result<(), StructuralError> {
        require_field(host, config.user_id_field(), EXTENSION_ID)
    }
}

/// Changeset for a new invited user.
///
/// Casts only the user id field; the remaining host fields are filled in
/// on acceptance. A `invitation_token` param is kept, otherwise one is
/// generated.
pub fn invite_changeset(
    schema: &UserSchema,
    changeset: Changeset,
    inviter: &User,
    params: &Params,
) -> Changeset {
    let token = match params.get(FIELD_TOKEN) {
        Some(FieldValue::String(token)) if !token.trim().is_empty() => token.clone(),
        _ => Uuid::new_v4().to_string(),
    };

    user_id_changeset(changeset, params, schema.config())
        .put_change(FIELD_INVITED_BY_ID, FieldValue::Id(inviter.id))
        .put_change(FIELD_TOKEN, FieldValue::String(token))
        .unique_constraint(FIELD_TOKEN)
}

/// Changeset marking a pending invitation accepted, then the full host
/// changeset over `params`.
///
/// The store applies it only while the row is still pending.
pub fn accept_changeset(schema: &UserSchema, changeset: Changeset, params: &Params) -> Changeset {
    let changeset = if changeset.get_field(FIELD_ACCEPTED_AT).is_null() {
        let now = now_epoch_ms();
        changeset
            .put_change(
                FIELD_ACCEPTED_AT,
                FieldValue::UtcDatetime(now - now.rem_euclid(1000)),
            )
            .precondition(FIELD_ACCEPTED_AT, FieldValue::Null, MESSAGE_ACCEPTED)
    } else {
        changeset.add_error(FIELD_ACCEPTED_AT, MESSAGE_ACCEPTED, ErrorKind::Invalid)
    };

    schema.changeset(changeset, params)
}

/// Whether `user` holds a pending invitation.
pub fn is_pending(user: &User) -> bool {
    user.get(FIELD_ACCEPTED_AT).is_null()
}
