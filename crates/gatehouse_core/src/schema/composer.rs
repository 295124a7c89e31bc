//! Config-ordered merge of extension schema contributions.
//!
//! Every projection is a left-to-right concatenation: extensions in config
//! order, each extension's items in its own order. Nothing is deduplicated.

use crate::config::Config;
use crate::extension::capability::Capability;
use crate::extension::registry::ResolvedExtensions;
use crate::schema::gate::StructuralError;
use crate::schema::{FieldSpec, IndexSpec, RelationSpec, RelationTarget, HOST_PLACEHOLDER};

/// Fields contributed by every field-capable extension.
pub fn attrs(extensions: &ResolvedExtensions, config: &Config) -> Vec<FieldSpec> {
    attrs_by_extension(extensions, config)
        .into_iter()
        .flat_map(|(_, fields)| fields)
        .collect()
}

/// Same as `attrs`, grouped by contributing extension id.
pub(crate) fn attrs_by_extension(
    extensions: &ResolvedExtensions,
    config: &Config,
) -> Vec<(String, Vec<FieldSpec>)> {
    extensions
        .discover(Capability::Fields)
        .map(|module| (module.id().to_string(), module.attrs(config)))
        .collect()
}

/// Relations with host placeholders rewritten to `config.host.name`.
///
/// Any placeholder other than the host placeholder is rejected.
pub fn assocs(
    extensions: &ResolvedExtensions,
    config: &Config,
) -> Result<Vec<RelationSpec>, StructuralError> {
    Ok(assocs_by_extension(extensions, config)?
        .into_iter()
        .flat_map(|(_, relations)| relations)
        .collect())
}

/// Same as `assocs`, grouped by contributing extension id.
pub(crate) fn assocs_by_extension(
    extensions: &ResolvedExtensions,
    config: &Config,
) -> Result<Vec<(String, Vec<RelationSpec>)>, StructuralError> {
    let mut grouped = Vec::new();
    for module in extensions.discover(Capability::Relations) {
        let relations = module
            .assocs(config)
            .into_iter()
            .map(|relation| rewrite_target(relation, module.id(), config))
            .collect::<Result<Vec<_>, _>>()?;
        grouped.push((module.id().to_string(), relations));
    }
    Ok(grouped)
}

/// Indexes contributed by every index-capable extension.
pub fn indexes(extensions: &ResolvedExtensions, config: &Config) -> Vec<IndexSpec> {
    indexes_by_extension(extensions, config)
        .into_iter()
        .flat_map(|(_, indexes)| indexes)
        .collect()
}

/// Same as `indexes`, grouped by contributing extension id.
pub(crate) fn indexes_by_extension(
    extensions: &ResolvedExtensions,
    config: &Config,
) -> Vec<(String, Vec<IndexSpec>)> {
    extensions
        .discover(Capability::Indexes)
        .map(|module| (module.id().to_string(), module.indexes(config)))
        .collect()
}

fn rewrite_target(
    mut relation: RelationSpec,
    extension: &str,
    config: &Config,
) -> Result<RelationSpec, StructuralError> {
    if let RelationTarget::Placeholder(placeholder) = &relation.target {
        if placeholder != HOST_PLACEHOLDER {
            return Err(StructuralError::UnknownPlaceholder {
                placeholder: placeholder.clone(),
                relation: relation.name.clone(),
                extension: extension.to_string(),
            });
        }
        relation.target = RelationTarget::Entity(config.host.name.clone());
    }
    Ok(relation)
}
