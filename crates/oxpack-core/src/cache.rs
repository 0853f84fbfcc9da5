//! Prior-build cache used to skip transformation of unchanged modules.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{plugin::EmittedAsset, resolve::ResolvedId, transform::ParsedModule};

/// A module record carried over from a previous build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedModule {
    pub id: String,
    pub original_code: String,
    pub parsed: ParsedModule,
    pub resolved_ids: FxHashMap<String, ResolvedId>,
    /// Assets the module's plugins emitted; replayed on a cache hit.
    pub emitted_assets: Vec<EmittedAsset>,
    /// Set when a transform plugin maintains its own cache; such modules
    /// are never replayed from here.
    pub custom_transform_cache: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleCache {
    modules: FxHashMap<String, CachedModule>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: CachedModule) {
        self.modules.insert(module.id.clone(), module);
    }

    pub fn get(&self, id: &str) -> Option<&CachedModule> {
        self.modules.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl FromIterator<CachedModule> for ModuleCache {
    fn from_iter<I: IntoIterator<Item = CachedModule>>(modules: I) -> Self {
        let mut cache = Self::new();
        for module in modules {
            cache.insert(module);
        }
        cache
    }
}
