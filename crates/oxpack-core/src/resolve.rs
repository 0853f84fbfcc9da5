//! Specifier resolution: plugin hooks first, then built-in path
//! resolution, then normalization into a canonical [`ResolvedId`].

use oxpack_error::BuildResult;
use oxpack_fs::FileSystem;
use serde::{Deserialize, Serialize};

use crate::{
    options::NormalizedOptions,
    path,
    plugin::{PartialResolvedId, PluginDriver, ResolveIdResult},
};

/// A fully resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedId {
    pub id: String,
    pub external: bool,
    pub module_side_effects: bool,
    pub synthetic_named_exports: bool,
}

/// Resolve `specifier` from `importer` into a canonical [`ResolvedId`],
/// or `None` when nothing matched and the external option does not claim
/// the id either.
pub(crate) async fn resolve_id(
    options: &NormalizedOptions,
    plugin_driver: &PluginDriver,
    fs: &dyn FileSystem,
    specifier: &str,
    importer: Option<&str>,
    skip: Option<usize>,
) -> BuildResult<Option<ResolvedId>> {
    let raw = if options.external.matches(specifier, importer, false) {
        Some(ResolveIdResult::MarkExternal)
    } else {
        resolve_id_raw(
            plugin_driver,
            fs,
            specifier,
            importer,
            options.preserve_symlinks,
            &options.cwd,
            skip,
        )
        .await?
    };
    Ok(normalize_resolve_id_result(options, raw, importer, specifier)
        .map(|partial| add_defaults(options, partial)))
}

/// The plugin pipeline followed by built-in path resolution.
async fn resolve_id_raw(
    plugin_driver: &PluginDriver,
    fs: &dyn FileSystem,
    specifier: &str,
    importer: Option<&str>,
    preserve_symlinks: bool,
    cwd: &str,
    skip: Option<usize>,
) -> BuildResult<Option<ResolveIdResult>> {
    if let Some(result) = plugin_driver.resolve_id(specifier, importer, skip).await? {
        return Ok(Some(result));
    }
    // Bare specifiers imported from a real module are left to the
    // unresolved-import policy; only entries fall through to the working
    // directory.
    if importer.is_some() && !path::is_absolute(specifier) && !specifier.starts_with('.') {
        return Ok(None);
    }
    let base = importer.map(path::dirname).unwrap_or(cwd);
    let candidate = path::resolve(base, specifier);
    Ok(find_file(fs, &candidate, preserve_symlinks)
        .await
        .map(ResolveIdResult::Id))
}

/// Probe the exact candidate, then a `.js`-suffixed sibling. Symlinks
/// are resolved to their target unless `preserve_symlinks` is set.
async fn find_file(fs: &dyn FileSystem, candidate: &str, preserve_symlinks: bool) -> Option<String> {
    for probe in [candidate.to_owned(), format!("{candidate}.js")] {
        if fs.exists(&probe).await {
            if preserve_symlinks {
                return Some(probe);
            }
            return Some(fs.canonicalize(&probe).await.unwrap_or(probe));
        }
    }
    None
}

/// Fold the raw hook result into a partial resolution, deciding
/// externality. `None` means unresolved: the caller applies the
/// unresolved-import policy.
pub(crate) fn normalize_resolve_id_result(
    options: &NormalizedOptions,
    result: Option<ResolveIdResult>,
    importer: Option<&str>,
    specifier: &str,
) -> Option<PartialResolvedId> {
    match result {
        Some(ResolveIdResult::Partial(partial)) => Some(partial),
        Some(ResolveIdResult::Id(id)) => {
            if options.external.matches(&id, importer, true) {
                // An external hint may still be a relative path.
                Some(PartialResolvedId::external(
                    path::normalize_relative_external_id(&id, importer, &options.cwd),
                ))
            } else {
                Some(PartialResolvedId::new(id))
            }
        }
        other => {
            let force_external = matches!(other, Some(ResolveIdResult::MarkExternal));
            let id = path::normalize_relative_external_id(specifier, importer, &options.cwd);
            if force_external || options.external.matches(&id, importer, true) {
                Some(PartialResolvedId::external(id))
            } else {
                None
            }
        }
    }
}

/// Fill unset flags from the side-effect policy.
pub(crate) fn add_defaults(options: &NormalizedOptions, partial: PartialResolvedId) -> ResolvedId {
    let PartialResolvedId {
        id,
        external,
        module_side_effects,
        synthetic_named_exports,
    } = partial;
    let module_side_effects =
        module_side_effects.unwrap_or_else(|| options.side_effects.has_effects(&id, external));
    ResolvedId {
        id,
        external,
        module_side_effects,
        synthetic_named_exports: synthetic_named_exports.unwrap_or(false),
    }
}
