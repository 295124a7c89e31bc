//! Extension registry and config-driven discovery.

use crate::config::{is_valid_extension_id, Config};
use crate::extension::capability::{Capability, CapabilityModule};
use log::debug;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Known extension modules keyed by id.
///
/// Registration order is irrelevant; precedence always comes from
/// `Config::extensions`.
#[derive(Default)]
pub struct ExtensionRegistry {
    modules: BTreeMap<String, Arc<dyn CapabilityModule>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one module under its declared id.
    pub fn register(&mut self, module: Arc<dyn CapabilityModule>) -> Result<(), RegistryError> {
        let id = module.id().trim().to_string();
        if !is_valid_extension_id(&id) {
            return Err(RegistryError::InvalidExtensionId(id));
        }
        if self.modules.contains_key(id.as_str()) {
            return Err(RegistryError::DuplicateExtensionId(id));
        }

        self.modules.insert(id, module);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Returns sorted registered ids.
    pub fn extension_ids(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn get(&self, extension_id: &str) -> Option<Arc<dyn CapabilityModule>> {
        self.modules.get(extension_id.trim()).cloned()
    }

    /// Resolves every configured id to its module, in config order.
    pub fn resolve(&self, config: &Config) -> Result<ResolvedExtensions, RegistryError> {
        let mut modules = Vec::with_capacity(config.extensions.len());
        for id in &config.extensions {
            let module = self
                .get(id)
                .ok_or_else(|| RegistryError::UnknownExtension(id.clone()))?;
            modules.push(module);
        }

        debug!(
            "event=extensions_resolve module=extension status=ok count={}",
            modules.len()
        );
        Ok(ResolvedExtensions { modules })
    }

    /// Configured modules implementing `capability`, in config order.
    pub fn discover(
        &self,
        config: &Config,
        capability: Capability,
    ) -> Result<Vec<Arc<dyn CapabilityModule>>, RegistryError> {
        let resolved = self.resolve(config)?;
        Ok(resolved
            .modules
            .into_iter()
            .filter(|module| module.implements(capability))
            .collect())
    }
}

/// Config-ordered module list, resolved once at definition time.
#[derive(Clone, Default)]
pub struct ResolvedExtensions {
    modules: Vec<Arc<dyn CapabilityModule>>,
}

impl ResolvedExtensions {
    /// Modules implementing `capability`; modules that don't are skipped.
    pub fn discover(&self, capability: Capability) -> impl Iterator<Item = &dyn CapabilityModule> {
        self.modules
            .iter()
            .map(|module| module.as_ref())
            .filter(move |module| module.implements(capability))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.modules.iter().map(|module| module.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Debug for ResolvedExtensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

/// Registration and resolution errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidExtensionId(String),
    DuplicateExtensionId(String),
    UnknownExtension(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExtensionId(value) => write!(f, "extension id is invalid: {value}"),
            Self::DuplicateExtensionId(value) => {
                write!(f, "extension id already registered: {value}")
            }
            Self::UnknownExtension(value) => {
                write!(f, "configured extension is not registered: {value}")
            }
        }
    }
}

impl Error for RegistryError {}
