//! Changesets: proposed changes plus accumulated validation errors.
//!
//! # Responsibility
//! - Carry one entity, its proposed field changes and every validation error.
//! - Provide the cast/validate building blocks extension stages use.
//!
//! # Invariants
//! - Every operation consumes the changeset and returns a new value.
//! - Errors only accumulate; no operation removes an error.
//! - A change equal to the current data value is not recorded.

pub mod pipeline;

use crate::model::user::User;
use crate::schema::FieldValue;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Raw input keyed by field name.
pub type Params = BTreeMap<String, FieldValue>;

/// Message used for missing required values.
pub const MESSAGE_REQUIRED: &str = "can't be blank";
/// Message used for unique constraint violations reported by storage.
pub const MESSAGE_TAKEN: &str = "has already been taken";

/// Validation error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Required,
    Format,
    Unique,
    Invalid,
}

/// One validation error attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub kind: ErrorKind,
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Changeset {
    data: Option<User>,
    changes: BTreeMap<String, FieldValue>,
    errors: Vec<FieldError>,
    unique_constraints: Vec<String>,
    preconditions: Vec<Precondition>,
}

/// Stored value a write requires; checked atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub field: String,
    pub expected: FieldValue,
    /// Error message attached to `field` when the stored value differs.
    pub message: String,
}

impl Changeset {
    /// Starts a changeset over `data`; `None` means creation without a base.
    pub fn new(data: Option<User>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn change(user: User) -> Self {
        Self::new(Some(user))
    }

    /// Copies permitted params into changes.
    ///
    /// Blank strings are cast to `Null`. Params outside `permitted` are ignored.
    pub fn cast(mut self, params: &Params, permitted: &[&str]) -> Self {
        for field in permitted {
            if let Some(value) = params.get(*field) {
                self.record_change(field, empty_to_null(value.clone()));
            }
        }
        self
    }

    pub fn put_change(mut self, field: &str, value: FieldValue) -> Self {
        self.record_change(field, value);
        self
    }

    /// Maps an existing change; no-op when `field` has no change.
    pub fn update_change(mut self, field: &str, f: impl FnOnce(FieldValue) -> FieldValue) -> Self {
        if let Some(value) = self.changes.remove(field) {
            self.record_change(field, f(value));
        }
        self
    }

    pub fn add_error(mut self, field: &str, message: impl Into<String>, kind: ErrorKind) -> Self {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
            kind,
        });
        self
    }

    /// Adds a `Required` error for every field whose current value is null.
    pub fn validate_required(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if self.get_field(field).is_null() {
                self = self.add_error(field, MESSAGE_REQUIRED, ErrorKind::Required);
            }
        }
        self
    }

    /// Checks a string change against `pattern`; absent or null changes pass.
    pub fn validate_format(self, field: &str, pattern: &Regex, message: &str) -> Self {
        let mismatch = match self.changes.get(field) {
            Some(FieldValue::String(value)) => !pattern.is_match(value),
            Some(FieldValue::Null) | None => false,
            Some(_) => true,
        };
        if mismatch {
            return self.add_error(field, message, ErrorKind::Format);
        }
        self
    }

    /// Declares that storage unique violations on `field` map to an error.
    pub fn unique_constraint(mut self, field: &str) -> Self {
        if !self.has_unique_constraint(field) {
            self.unique_constraints.push(field.to_string());
        }
        self
    }

    /// Requires the stored `field` to still equal `expected` when updating.
    pub fn precondition(mut self, field: &str, expected: FieldValue, message: &str) -> Self {
        self.preconditions.push(Precondition {
            field: field.to_string(),
            expected,
            message: message.to_string(),
        });
        self
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    pub fn data(&self) -> Option<&User> {
        self.data.as_ref()
    }

    pub fn changes(&self) -> &BTreeMap<String, FieldValue> {
        &self.changes
    }

    pub fn get_change(&self, field: &str) -> Option<&FieldValue> {
        self.changes.get(field)
    }

    /// Change for `field`, else the data value, else `Null`.
    pub fn get_field(&self, field: &str) -> FieldValue {
        if let Some(value) = self.changes.get(field) {
            return value.clone();
        }
        self.data
            .as_ref()
            .map(|user| user.get(field).clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn errors_on(&self, field: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|err| err.field == field).collect()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_unique_constraint(&self, field: &str) -> bool {
        self.unique_constraints.iter().any(|value| value == field)
    }

    /// Base entity with every change applied.
    pub fn apply_changes(&self) -> Option<User> {
        let mut user = self.data.clone()?;
        for (field, value) in &self.changes {
            user.set(field, value.clone());
        }
        Some(user)
    }

    /// Re-attaches upstream errors a stage dropped, ahead of its own errors.
    pub(crate) fn retain_errors(mut self, upstream: &[FieldError]) -> Self {
        let missing: Vec<FieldError> = upstream
            .iter()
            .filter(|err| !self.errors.contains(err))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let own = std::mem::take(&mut self.errors);
            self.errors = missing;
            self.errors.extend(own);
        }
        self
    }

    fn record_change(&mut self, field: &str, value: FieldValue) {
        let unchanged = self
            .data
            .as_ref()
            .is_some_and(|user| user.get(field) == &value);
        if unchanged {
            self.changes.remove(field);
        } else {
            self.changes.insert(field.to_string(), value);
        }
    }
}

fn empty_to_null(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(text) if text.trim().is_empty() => FieldValue::Null,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{Changeset, ErrorKind, FieldError, Params, MESSAGE_REQUIRED};
    use crate::model::user::User;
    use crate::schema::FieldValue;
    use regex::Regex;
    use uuid::Uuid;

    fn params(pairs: &[(&str, FieldValue)]) -> Params {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn user_with_email(email: &str) -> User {
        let mut user = User::new(Uuid::new_v4());
        user.set("email", FieldValue::string(email));
        user
    }

    #[test]
    fn cast_copies_only_permitted_params() {
        let input = params(&[
            ("email", FieldValue::string("a@example.com")),
            ("role", FieldValue::string("admin")),
        ]);
        let changeset = Changeset::new(None).cast(&input, &["email"]);

        assert_eq!(
            changeset.get_change("email"),
            Some(&FieldValue::string("a@example.com"))
        );
        assert_eq!(changeset.get_change("role"), None);
    }

    #[test]
    fn cast_turns_blank_strings_into_null() {
        let input = params(&[("email", FieldValue::string("   "))]);
        let changeset = Changeset::new(None)
            .cast(&input, &["email"])
            .validate_required(&["email"]);

        assert_eq!(changeset.get_change("email"), Some(&FieldValue::Null));
        assert_eq!(changeset.errors_on("email")[0].message, MESSAGE_REQUIRED);
    }

    #[test]
    fn unchanged_values_are_not_recorded() {
        let user = user_with_email("a@example.com");
        let changeset = Changeset::change(user)
            .cast(&params(&[("email", FieldValue::string("a@example.com"))]), &["email"]);
        assert!(changeset.changes().is_empty());
    }

    #[test]
    fn get_field_prefers_change_over_data() {
        let user = user_with_email("old@example.com");
        let changeset = Changeset::change(user);
        assert_eq!(
            changeset.get_field("email"),
            FieldValue::string("old@example.com")
        );

        let changeset = changeset.put_change("email", FieldValue::string("new@example.com"));
        assert_eq!(
            changeset.get_field("email"),
            FieldValue::string("new@example.com")
        );
        assert_eq!(changeset.get_field("missing"), FieldValue::Null);
    }

    #[test]
    fn validate_required_uses_data_when_no_change() {
        let changeset = Changeset::change(user_with_email("a@example.com"))
            .validate_required(&["email", "nickname"]);

        assert!(changeset.errors_on("email").is_empty());
        assert_eq!(changeset.errors_on("nickname").len(), 1);
        assert_eq!(changeset.errors()[0].kind, ErrorKind::Required);
    }

    #[test]
    fn validate_format_checks_string_changes() {
        let pattern = Regex::new(r"^\d+$").expect("valid regex");
        let changeset = Changeset::new(None)
            .put_change("code", FieldValue::string("12a"))
            .validate_format("code", &pattern, "has invalid format");
        assert_eq!(changeset.errors_on("code")[0].kind, ErrorKind::Format);

        let changeset = Changeset::new(None)
            .put_change("code", FieldValue::string("123"))
            .validate_format("code", &pattern, "has invalid format");
        assert!(changeset.is_valid());
    }

    #[test]
    fn update_change_maps_existing_change_only() {
        let changeset = Changeset::new(None)
            .put_change("email", FieldValue::string("A@Example.com"))
            .update_change("email", |value| match value {
                FieldValue::String(text) => FieldValue::String(text.to_lowercase()),
                other => other,
            })
            .update_change("missing", |_| FieldValue::Integer(1));

        assert_eq!(
            changeset.get_change("email"),
            Some(&FieldValue::string("a@example.com"))
        );
        assert_eq!(changeset.get_change("missing"), None);
    }

    #[test]
    fn apply_changes_merges_into_data() {
        let user = user_with_email("a@example.com");
        let id = user.id;
        let applied = Changeset::change(user)
            .put_change("nickname", FieldValue::string("ann"))
            .apply_changes()
            .expect("data present");

        assert_eq!(applied.id, id);
        assert_eq!(applied.get("nickname"), &FieldValue::string("ann"));
        assert_eq!(applied.get("email"), &FieldValue::string("a@example.com"));
        assert!(Changeset::new(None).apply_changes().is_none());
    }

    #[test]
    fn retain_errors_restores_dropped_upstream_errors() {
        let upstream = vec![FieldError {
            field: "email".to_string(),
            message: MESSAGE_REQUIRED.to_string(),
            kind: ErrorKind::Required,
        }];
        let stage_output =
            Changeset::new(None).add_error("token", "is invalid", ErrorKind::Invalid);

        let merged = stage_output.retain_errors(&upstream);
        let fields: Vec<&str> = merged.errors().iter().map(|err| err.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "token"]);
    }

    #[test]
    fn unique_constraints_are_declared_once() {
        let changeset = Changeset::new(None)
            .unique_constraint("email")
            .unique_constraint("email");
        assert!(changeset.has_unique_constraint("email"));
        assert!(!changeset.has_unique_constraint("token"));
    }
}
