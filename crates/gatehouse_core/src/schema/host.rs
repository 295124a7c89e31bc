//! Host definition finalization.
//!
//! # Responsibility
//! - Assemble the host shape once from base fields and every extension's
//!   contributions, then run the structural gate.
//! - Hold the finalized shape as immutable state for the process lifetime.
//!
//! # Invariants
//! - Field names are unique on the finalized host and valid identifiers.
//! - `belongs_to` relations contribute their foreign key as an `Id` field.
//! - Host-targeted `has_many` foreign keys and every index field exist on
//!   the host.
//! - A `UserSchema` only exists after the gate has passed.

use crate::changeset::pipeline;
use crate::changeset::{Changeset, Params};
use crate::config::{is_valid_identifier, Config};
use crate::extension::registry::{ExtensionRegistry, ResolvedExtensions};
use crate::model::user::{base_fields, base_indexes, user_id_changeset, User};
use crate::schema::composer::{assocs_by_extension, attrs_by_extension, indexes_by_extension};
use crate::schema::gate::{self, StructuralError};
use crate::schema::{
    FieldSpec, FieldType, IndexSpec, RelationKind, RelationSpec, RelationTarget,
};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::time::Instant;

/// Provenance label for fields the host itself declares.
pub const CORE_OWNER: &str = "core";
/// Primary key column; never declared as a field.
pub const PRIMARY_KEY: &str = "id";

static INSTALLED_SCHEMA: OnceCell<UserSchema> = OnceCell::new();

/// Finalized host entity shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDefinition {
    pub entity: String,
    pub table: String,
    /// Base fields, then extension fields, then derived foreign keys.
    pub fields: Vec<FieldSpec>,
    /// Relations with concrete targets only.
    pub relations: Vec<RelationSpec>,
    /// Base identity index, then extension indexes.
    pub indexes: Vec<IndexSpec>,
}

impl HostDefinition {
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}

/// Finalized, validated host plus the extensions that shaped it.
#[derive(Debug, Clone)]
pub struct UserSchema {
    config: Config,
    extensions: ResolvedExtensions,
    definition: HostDefinition,
}

impl UserSchema {
    /// Builds and validates the host definition.
    ///
    /// # Errors
    /// - Config, registry and placeholder errors from composition.
    /// - Invalid or duplicated field names.
    /// - The first failing extension's structural check.
    pub fn define(config: Config, registry: &ExtensionRegistry) -> Result<Self, StructuralError> {
        let started_at = Instant::now();
        match Self::assemble(config, registry) {
            Ok(schema) => {
                info!(
                    "event=schema_define module=schema status=ok entity={} extensions={} fields={} duration_ms={}",
                    schema.definition.entity,
                    schema.extensions.len(),
                    schema.definition.fields.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(schema)
            }
            Err(err) => {
                error!(
                    "event=schema_define module=schema status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn assemble(config: Config, registry: &ExtensionRegistry) -> Result<Self, StructuralError> {
        config.validate()?;
        let extensions = registry.resolve(&config)?;

        let mut builder = FieldSetBuilder::new(&config.host.name);
        for field in base_fields(&config) {
            builder.push(field, CORE_OWNER)?;
        }
        for (extension, fields) in attrs_by_extension(&extensions, &config) {
            for field in fields {
                builder.push(field, &extension)?;
            }
        }

        let mut relations = Vec::new();
        let mut host_has_many = Vec::new();
        for (extension, contributed) in assocs_by_extension(&extensions, &config)? {
            for relation in contributed {
                match relation.kind {
                    RelationKind::BelongsTo => {
                        let foreign_key = FieldSpec::new(relation.foreign_key(), FieldType::Id);
                        builder.push(foreign_key, &extension)?;
                    }
                    RelationKind::HasMany
                        if relation.target == RelationTarget::Entity(config.host.name.clone()) =>
                    {
                        host_has_many.push((extension.clone(), relation.foreign_key()));
                    }
                    RelationKind::HasMany => {}
                }
                relations.push(relation);
            }
        }
        let fields = builder.finish();
        let declares = |name: &str| name == PRIMARY_KEY || fields.iter().any(|f| f.name == name);

        for (extension, foreign_key) in host_has_many {
            if !declares(foreign_key.as_str()) {
                return Err(StructuralError::MissingField {
                    field: foreign_key,
                    extension,
                    entity: config.host.name.clone(),
                });
            }
        }

        let mut all_indexes = Vec::new();
        let contributed = std::iter::once((CORE_OWNER.to_string(), base_indexes(&config)))
            .chain(indexes_by_extension(&extensions, &config));
        for (extension, indexes) in contributed {
            for index in indexes {
                if index.fields.is_empty() {
                    return Err(StructuralError::Extension {
                        extension,
                        message: "index declares no fields".to_string(),
                    });
                }
                if let Some(unknown) = index.fields.iter().find(|field| !declares(field.as_str())) {
                    return Err(StructuralError::MissingField {
                        field: unknown.clone(),
                        extension,
                        entity: config.host.name.clone(),
                    });
                }
                all_indexes.push(index);
            }
        }

        let definition = HostDefinition {
            entity: config.host.name.clone(),
            table: config.host.table.clone(),
            fields,
            relations,
            indexes: all_indexes,
        };
        gate::validate(&extensions, &config, &definition)?;

        Ok(Self {
            config,
            extensions,
            definition,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn extensions(&self) -> &ResolvedExtensions {
        &self.extensions
    }

    pub fn definition(&self) -> &HostDefinition {
        &self.definition
    }

    /// Unsaved user with every host field at its default.
    pub fn blank_user(&self) -> User {
        User::blank(&self.definition)
    }

    /// Full host changeset: identity casting, then every extension stage.
    pub fn changeset(&self, changeset: Changeset, params: &Params) -> Changeset {
        let changeset = user_id_changeset(changeset, params, &self.config);
        pipeline::apply(&self.extensions, changeset, params, &self.config)
    }
}

/// Installs `schema` as the process-wide host definition.
///
/// Returns the rejected schema when one is already installed.
pub fn install(schema: UserSchema) -> Result<&'static UserSchema, UserSchema> {
    INSTALLED_SCHEMA
        .try_insert(schema)
        .map_err(|(_, rejected)| rejected)
}

/// Process-wide host definition, if installed.
pub fn installed() -> Option<&'static UserSchema> {
    INSTALLED_SCHEMA.get()
}

struct FieldSetBuilder<'a> {
    entity: &'a str,
    fields: Vec<FieldSpec>,
    names: BTreeSet<String>,
}

impl<'a> FieldSetBuilder<'a> {
    fn new(entity: &'a str) -> Self {
        Self {
            entity,
            fields: Vec::new(),
            names: BTreeSet::from([PRIMARY_KEY.to_string()]),
        }
    }

    fn push(&mut self, field: FieldSpec, extension: &str) -> Result<(), StructuralError> {
        if !is_valid_identifier(&field.name) {
            return Err(StructuralError::InvalidFieldName {
                field: field.name,
                extension: extension.to_string(),
            });
        }
        if self.names.contains(field.name.as_str()) {
            return Err(StructuralError::DuplicateField {
                field: field.name,
                extension: extension.to_string(),
                entity: self.entity.to_string(),
            });
        }
        if !field.default.fits(field.field_type) {
            return Err(StructuralError::Extension {
                extension: extension.to_string(),
                message: format!("default of field {} does not match its type", field.name),
            });
        }

        self.names.insert(field.name.clone());
        self.fields.push(field);
        Ok(())
    }

    fn finish(self) -> Vec<FieldSpec> {
        self.fields
    }
}
