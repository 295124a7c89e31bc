//! One-time structural validation of the finalized host.
//!
//! # Invariants
//! - Runs once, at definition finalization, never per request.
//! - Fail-fast: the first failing extension stops the check.
//! - Structural errors are fatal; startup must not continue past one.

use crate::config::{Config, ConfigError};
use crate::extension::capability::Capability;
use crate::extension::registry::{RegistryError, ResolvedExtensions};
use crate::schema::host::HostDefinition;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Runs every host-validating extension in config order.
pub fn validate(
    extensions: &ResolvedExtensions,
    config: &Config,
    host: &HostDefinition,
) -> Result<(), StructuralError> {
    for module in extensions.discover(Capability::ValidateHost) {
        if let Err(err) = module.validate(config, host) {
            error!(
                "event=host_validate module=schema status=error extension={} entity={} error={}",
                module.id(),
                host.entity,
                err
            );
            return Err(err);
        }
    }

    info!(
        "event=host_validate module=schema status=ok entity={}",
        host.entity
    );
    Ok(())
}

/// Fails unless `host` declares `field`.
pub fn require_field(
    host: &HostDefinition,
    field: &str,
    extension: &str,
) -> Result<(), StructuralError> {
    if host.has_field(field) {
        return Ok(());
    }
    Err(StructuralError::MissingField {
        field: field.to_string(),
        extension: extension.to_string(),
        entity: host.entity.clone(),
    })
}

/// Fatal definition-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    Config(ConfigError),
    Registry(RegistryError),
    UnknownPlaceholder {
        placeholder: String,
        relation: String,
        extension: String,
    },
    InvalidFieldName {
        field: String,
        extension: String,
    },
    DuplicateField {
        field: String,
        extension: String,
        entity: String,
    },
    MissingField {
        field: String,
        extension: String,
        entity: String,
    },
    /// Extension-specific structural failure.
    Extension {
        extension: String,
        message: String,
    },
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::UnknownPlaceholder {
                placeholder,
                relation,
                extension,
            } => write!(
                f,
                "unknown relation placeholder `{placeholder}` on {relation} for extension {extension}"
            ),
            Self::InvalidFieldName { field, extension } => {
                write!(f, "field name `{field}` from extension {extension} is invalid")
            }
            Self::DuplicateField {
                field,
                extension,
                entity,
            } => write!(
                f,
                "field {field} from extension {extension} is already defined on entity {entity}"
            ),
            Self::MissingField {
                field,
                extension,
                entity,
            } => write!(
                f,
                "required field {field} missing for extension {extension} on entity {entity}"
            ),
            Self::Extension { extension, message } => {
                write!(f, "extension {extension} rejected host: {message}")
            }
        }
    }
}

impl Error for StructuralError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for StructuralError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RegistryError> for StructuralError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}
