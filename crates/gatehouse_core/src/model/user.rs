//! User host entity.
//!
//! # Responsibility
//! - Define the user record whose shape is fixed by composition.
//! - Own the base identity fields and the base identity changeset.
//!
//! # Invariants
//! - `id` is stable and never reused for another user.
//! - `fields` holds only fields declared by the finalized host definition
//!   once the record has passed through storage.

use crate::changeset::{Changeset, Params};
use crate::config::Config;
use crate::schema::host::HostDefinition;
use crate::schema::{FieldSpec, FieldType, FieldValue, IndexSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type UserId = Uuid;

/// Storage timestamp set on insert.
pub const FIELD_INSERTED_AT: &str = "inserted_at";
/// Storage timestamp refreshed on every write.
pub const FIELD_UPDATED_AT: &str = "updated_at";

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static NULL: FieldValue = FieldValue::Null;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Every non-id field keyed by name.
    pub fields: BTreeMap<String, FieldValue>,
}

impl User {
    /// Creates a user with no field values.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Creates an unsaved user holding every host field at its default.
    pub fn blank(host: &HostDefinition) -> Self {
        let mut user = Self::new(Uuid::new_v4());
        for field in &host.fields {
            user.set(&field.name, field.default.clone());
        }
        user
    }

    /// Value of `field`, or `Null` when absent.
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }
}

/// Identity and timestamp fields every host carries.
pub fn base_fields(config: &Config) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(config.user_id_field(), FieldType::String),
        FieldSpec::new(FIELD_INSERTED_AT, FieldType::UtcDatetime),
        FieldSpec::new(FIELD_UPDATED_AT, FieldType::UtcDatetime),
    ]
}

pub fn base_indexes(config: &Config) -> Vec<IndexSpec> {
    vec![IndexSpec::unique(&[config.user_id_field()])]
}

/// Casts and validates the user identity field.
///
/// Email identities are trimmed, lowercased and format-checked.
pub fn user_id_changeset(changeset: Changeset, params: &Params, config: &Config) -> Changeset {
    let field = config.user_id_field();
    let changeset = changeset
        .cast(params, &[field])
        .update_change(field, normalize_identity);
    let changeset = if field == "email" {
        changeset.validate_format(field, &EMAIL_RE, "has invalid format")
    } else {
        changeset
    };

    changeset
        .validate_required(&[field])
        .unique_constraint(field)
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn normalize_identity(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(text) => FieldValue::String(text.trim().to_lowercase()),
        other => other,
    }
}
