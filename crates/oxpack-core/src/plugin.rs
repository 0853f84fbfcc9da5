//! The plugin hook contract and the first-hook-wins dispatcher.

use async_trait::async_trait;
use oxpack_error::BuildResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::module::DynamicImportArgument;

/// A partially resolved reference returned by a plugin. Unset flags are
/// filled in from the loader's policies during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResolvedId {
    pub id: String,
    pub external: bool,
    pub module_side_effects: Option<bool>,
    pub synthetic_named_exports: Option<bool>,
}

impl PartialResolvedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
            module_side_effects: None,
            synthetic_named_exports: None,
        }
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::new(id)
        }
    }
}

/// Raw result of a `resolve_id` / `resolve_dynamic_import` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveIdResult {
    /// An id string; whether it is external is decided by the `external`
    /// option.
    Id(String),
    /// Unresolvable but intentionally so: keep the specifier and treat
    /// it as external.
    MarkExternal,
    Partial(PartialResolvedId),
}

/// What a `load` hook produces, and what the transformer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub code: String,
    pub map: Option<String>,
    pub module_side_effects: Option<bool>,
    pub synthetic_named_exports: Option<bool>,
}

impl From<String> for SourceDescription {
    fn from(code: String) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }
}

/// A file emitted alongside the build, replayed on cache hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedAsset {
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub source: String,
}

/// A build plugin. Every hook defaults to "no opinion"; the driver moves
/// on to the next plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn resolve_id(
        &self,
        _specifier: &str,
        _importer: Option<&str>,
    ) -> BuildResult<Option<ResolveIdResult>> {
        Ok(None)
    }

    async fn load(&self, _id: &str) -> BuildResult<Option<SourceDescription>> {
        Ok(None)
    }

    async fn resolve_dynamic_import(
        &self,
        _argument: &DynamicImportArgument,
        _importer: &str,
    ) -> BuildResult<Option<ResolveIdResult>> {
        Ok(None)
    }
}

/// First-hook-wins dispatcher over an ordered plugin list.
pub struct PluginDriver {
    plugins: Vec<Arc<dyn Plugin>>,
    emitted_assets: Mutex<Vec<EmittedAsset>>,
}

impl PluginDriver {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins,
            emitted_assets: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch `resolve_id`, optionally skipping the plugin at `skip`
    /// so a plugin can delegate without seeing its own earlier answer.
    pub async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
        skip: Option<usize>,
    ) -> BuildResult<Option<ResolveIdResult>> {
        for (index, plugin) in self.plugins.iter().enumerate() {
            if skip == Some(index) {
                continue;
            }
            if let Some(result) = plugin.resolve_id(specifier, importer).await? {
                tracing::debug!(plugin = plugin.name(), specifier, "resolveId hook matched");
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub async fn load(&self, id: &str) -> BuildResult<Option<SourceDescription>> {
        for plugin in &self.plugins {
            if let Some(source) = plugin.load(id).await? {
                tracing::debug!(plugin = plugin.name(), id, "load hook matched");
                return Ok(Some(source));
            }
        }
        Ok(None)
    }

    pub async fn resolve_dynamic_import(
        &self,
        argument: &DynamicImportArgument,
        importer: &str,
    ) -> BuildResult<Option<ResolveIdResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve_dynamic_import(argument, importer).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn emit_file(&self, asset: EmittedAsset) {
        self.emitted_assets.lock().push(asset);
    }

    pub fn emitted_assets(&self) -> Vec<EmittedAsset> {
        self.emitted_assets.lock().clone()
    }
}
