//! Capability declarations and the extension module contract.

use crate::changeset::{Changeset, Params};
use crate::config::Config;
use crate::schema::gate::StructuralError;
use crate::schema::host::HostDefinition;
use crate::schema::{FieldSpec, IndexSpec, RelationSpec};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One capability an extension module may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Fields,
    Relations,
    Indexes,
    Changeset,
    ValidateHost,
}

impl Capability {
    /// Stable string id used in diagnostics and declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fields => CAPABILITY_FIELDS,
            Self::Relations => CAPABILITY_RELATIONS,
            Self::Indexes => CAPABILITY_INDEXES,
            Self::Changeset => CAPABILITY_CHANGESET,
            Self::ValidateHost => CAPABILITY_VALIDATE_HOST,
        }
    }

    /// Every capability in declaration order.
    pub fn all() -> [Capability; 5] {
        [
            Self::Fields,
            Self::Relations,
            Self::Indexes,
            Self::Changeset,
            Self::ValidateHost,
        ]
    }
}

pub const CAPABILITY_FIELDS: &str = "fields";
pub const CAPABILITY_RELATIONS: &str = "relations";
pub const CAPABILITY_INDEXES: &str = "indexes";
pub const CAPABILITY_CHANGESET: &str = "changeset";
pub const CAPABILITY_VALIDATE_HOST: &str = "validate_host";

/// Parses one capability from its string id.
pub fn parse_capability(value: &str) -> Result<Capability, CapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityError::EmptyCapability);
    }

    match normalized {
        CAPABILITY_FIELDS => Ok(Capability::Fields),
        CAPABILITY_RELATIONS => Ok(Capability::Relations),
        CAPABILITY_INDEXES => Ok(Capability::Indexes),
        CAPABILITY_CHANGESET => Ok(Capability::Changeset),
        CAPABILITY_VALIDATE_HOST => Ok(Capability::ValidateHost),
        other => Err(CapabilityError::UnsupportedCapability(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "capability value must not be empty"),
            Self::UnsupportedCapability(value) => write!(f, "capability is unsupported: {value}"),
        }
    }
}

impl Error for CapabilityError {}

/// Contract every extension module satisfies.
///
/// Only capabilities listed by `capabilities()` are ever invoked; every hook
/// defaults to a no-op so a module implements just the subset it declares.
pub trait CapabilityModule: Send + Sync {
    /// Stable id matched against `Config::extensions`.
    fn id(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    fn implements(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn attrs(&self, _config: &Config) -> Vec<FieldSpec> {
        Vec::new()
    }

    fn assocs(&self, _config: &Config) -> Vec<RelationSpec> {
        Vec::new()
    }

    fn indexes(&self, _config: &Config) -> Vec<IndexSpec> {
        Vec::new()
    }

    /// One pipeline stage. Must keep every error already on `changeset`.
    fn changeset(&self, changeset: Changeset, _params: &Params, _config: &Config) -> Changeset {
        changeset
    }

    /// One-time structural check against the finalized host.
    fn validate(&self, _config: &Config, _host: &HostDefinition) -> Result<(), StructuralError> {
        Ok(())
    }
}
