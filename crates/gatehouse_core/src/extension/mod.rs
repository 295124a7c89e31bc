//! Extension contracts and registry.
//!
//! Extensions are plain values implementing `CapabilityModule`. The registry
//! resolves the configured ids once, in config order; no runtime loading.

pub mod capability;
pub mod registry;
