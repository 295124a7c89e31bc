//! Extensible user schema engine with an invitation lifecycle.
//!
//! Capability modules contribute fields, relations, indexes, changeset
//! stages and structural checks to one host entity. The host is finalized
//! once by `UserSchema::define`; the invitation module is the bundled
//! consumer.

pub mod changeset;
pub mod config;
pub mod db;
pub mod extension;
pub mod invitation;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;

pub use changeset::{Changeset, ErrorKind, FieldError, Params, Precondition};
pub use config::{Config, ConfigError, HostEntity};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use extension::capability::{Capability, CapabilityModule};
pub use extension::registry::{ExtensionRegistry, RegistryError, ResolvedExtensions};
pub use invitation::{InvitationContext, InvitationExtension};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::user::{User, UserId};
pub use repo::user_repo::{
    RepoError, RepoResult, SqliteUserRepository, UserQuery, UserStore, WriteError,
};
pub use schema::gate::StructuralError;
pub use schema::host::{HostDefinition, UserSchema};
pub use schema::{FieldSpec, FieldType, FieldValue, IndexSpec, RelationSpec, RelationTarget};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Registry holding every bundled extension module.
pub fn default_registry() -> Result<ExtensionRegistry, RegistryError> {
    let mut registry = ExtensionRegistry::new();
    registry.register(std::sync::Arc::new(InvitationExtension))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::{core_version, default_registry};

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn default_registry_bundles_invitation() {
        let registry = default_registry().expect("default registry");
        assert!(registry.get("invitation").is_some());
        assert_eq!(registry.len(), 1);
    }
}
