//! Ordered fold of extension changeset stages.

use crate::changeset::{Changeset, Params};
use crate::config::Config;
use crate::extension::capability::Capability;
use crate::extension::registry::ResolvedExtensions;
use log::debug;

/// Folds every changeset-capable extension over `changeset` in config order.
///
/// Each stage sees the cumulative result of earlier stages. The result keeps
/// every error any stage produced; validity is decided only after the fold.
pub fn apply(
    extensions: &ResolvedExtensions,
    changeset: Changeset,
    params: &Params,
    config: &Config,
) -> Changeset {
    extensions
        .discover(Capability::Changeset)
        .fold(changeset, |changeset, module| {
            let upstream = changeset.errors().to_vec();
            let next = module
                .changeset(changeset, params, config)
                .retain_errors(&upstream);
            debug!(
                "event=changeset_stage module=changeset status=ok extension={} errors={}",
                module.id(),
                next.errors().len()
            );
            next
        })
}
