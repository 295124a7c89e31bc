//! Composition configuration.
//!
//! # Responsibility
//! - Carry the ordered extension id list, the host entity reference and
//!   extension-specific options.
//! - Validate declaration-level invariants before composition starts.
//!
//! # Invariants
//! - Extension ids are unique; their order is the single precedence source
//!   for every merge and pipeline fold.
//! - Options are passed unchanged to every extension call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Option key naming the user identity field.
pub const OPTION_USER_ID_FIELD: &str = "user_id_field";
/// Identity field used when `user_id_field` is not configured.
pub const DEFAULT_USER_ID_FIELD: &str = "email";

/// Concrete host entity that placeholder relations resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntity {
    /// Entity type name, e.g. `User`.
    pub name: String,
    /// Storage table name, e.g. `users`.
    pub table: String,
}

impl HostEntity {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }
}

impl Default for HostEntity {
    fn default() -> Self {
        Self::new("User", "users")
    }
}

/// Ordered composition config shared by registry, composer, pipeline and gate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Extension ids in precedence order.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub host: HostEntity,
    /// Extension-specific options, opaque to the engine.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl Config {
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets one extension option, replacing any previous value.
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Name of the user identity field (`email` unless configured).
    pub fn user_id_field(&self) -> &str {
        self.option(OPTION_USER_ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_USER_ID_FIELD)
    }

    /// Validates declaration-level config invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::<&str>::new();
        for id in &self.extensions {
            if id.trim().is_empty() {
                return Err(ConfigError::EmptyExtensionId);
            }
            if !is_valid_extension_id(id) {
                return Err(ConfigError::InvalidExtensionId(id.clone()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::DuplicateExtensionId(id.clone()));
            }
        }

        if !is_valid_entity_name(&self.host.name) {
            return Err(ConfigError::InvalidHostName(self.host.name.clone()));
        }
        if !is_valid_identifier(&self.host.table) {
            return Err(ConfigError::InvalidHostTable(self.host.table.clone()));
        }
        if let Some(value) = self.option(OPTION_USER_ID_FIELD) {
            match value.as_str() {
                Some(field) if is_valid_identifier(field) => {}
                _ => return Err(ConfigError::InvalidUserIdField(value.to_string())),
            }
        }
        Ok(())
    }
}

/// Extension ids: `[a-z0-9]` segments joined by single `.`, `_` or `-`.
pub fn is_valid_extension_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if matches!(c, '.' | '_' | '-') {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

/// Storage identifiers (field and table names): `[a-z][a-z0-9_]*`.
pub fn is_valid_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_entity_name(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Config declaration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    EmptyExtensionId,
    InvalidExtensionId(String),
    DuplicateExtensionId(String),
    InvalidHostName(String),
    InvalidHostTable(String),
    InvalidUserIdField(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "config could not be parsed: {message}"),
            Self::EmptyExtensionId => write!(f, "extension id must not be empty"),
            Self::InvalidExtensionId(value) => write!(f, "extension id is invalid: {value}"),
            Self::DuplicateExtensionId(value) => {
                write!(f, "extension id is configured twice: {value}")
            }
            Self::InvalidHostName(value) => write!(f, "host entity name is invalid: {value}"),
            Self::InvalidHostTable(value) => write!(f, "host table name is invalid: {value}"),
            Self::InvalidUserIdField(value) => {
                write!(f, "option `{OPTION_USER_ID_FIELD}` is invalid: {value}")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{is_valid_extension_id, Config, ConfigError, HostEntity};
    use serde_json::json;

    #[test]
    fn default_config_is_valid() {
        let config = Config::new(&["invitation"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.host, HostEntity::new("User", "users"));
        assert_eq!(config.user_id_field(), "email");
    }

    #[test]
    fn rejects_duplicate_extension_ids() {
        let config = Config::new(&["invitation", "audit", "invitation"]);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::DuplicateExtensionId("invitation".to_string())
        );
    }

    #[test]
    fn rejects_malformed_extension_ids() {
        assert!(is_valid_extension_id("builtin.invitation"));
        assert!(is_valid_extension_id("email-confirmation"));
        assert!(!is_valid_extension_id("Invitation"));
        assert!(!is_valid_extension_id("two..dots"));
        assert!(!is_valid_extension_id("trailing."));

        let err = Config::new(&["   "]).validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyExtensionId);
    }

    #[test]
    fn rejects_invalid_host_reference() {
        let mut config = Config::new(&[]);
        config.host = HostEntity::new("user", "users");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHostName(_))
        ));

        config.host = HostEntity::new("User", "Users; DROP");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHostTable(_))
        ));
    }

    #[test]
    fn parses_json_config_with_options() {
        let config = Config::from_json_str(
            r#"{
                "extensions": ["invitation"],
                "host": {"name": "Member", "table": "members"},
                "options": {"user_id_field": "username", "invite_ttl_days": 7}
            }"#,
        )
        .expect("config parse");

        assert_eq!(config.extensions, vec!["invitation".to_string()]);
        assert_eq!(config.host.table, "members");
        assert_eq!(config.user_id_field(), "username");
        assert_eq!(config.option("invite_ttl_days"), Some(&json!(7)));
    }

    #[test]
    fn rejects_non_string_user_id_field() {
        let config = Config::new(&[]).with_option("user_id_field", json!(3));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUserIdField(_))
        ));
    }

    #[test]
    fn reports_parse_failures() {
        let err = Config::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
