//! Module nodes owned by the registry.

use std::{borrow::Borrow, fmt, ops::Deref, sync::Arc};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{FxIndexMap, FxIndexSet, resolve::ResolvedId, transform::ParsedModule};

/// A canonical module id: an absolute path, a virtual id or a bare
/// external name. Cheap to clone and ordered, so importer lists can be
/// kept sorted without copying strings.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ModuleId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl PartialEq<&str> for ModuleId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// The argument of a dynamic import as seen by the parser: either a
/// string literal or the raw text of a non-literal expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicImportArgument {
    Literal(String),
    Expression(String),
}

impl DynamicImportArgument {
    pub fn specifier(&self) -> &str {
        match self {
            Self::Literal(specifier) => specifier,
            Self::Expression(expression) => expression,
        }
    }
}

/// Resolution state of one dynamic import site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DynamicImportResolution {
    #[default]
    Unresolved,
    /// A plugin substituted the import expression with raw text; no
    /// module is materialized.
    Replacement(String),
    /// The import was linked to a registered module.
    Module(ModuleId),
}

#[derive(Debug, Clone)]
pub struct DynamicImport {
    pub argument: DynamicImportArgument,
    pub resolution: DynamicImportResolution,
}

impl DynamicImport {
    pub(crate) fn new(argument: DynamicImportArgument) -> Self {
        Self {
            argument,
            resolution: DynamicImportResolution::Unresolved,
        }
    }
}

/// A module participating in the graph.
#[derive(Debug)]
pub enum Module {
    Normal(NormalModule),
    External(ExternalModule),
}

impl Module {
    pub fn id(&self) -> &ModuleId {
        match self {
            Self::Normal(module) => &module.id,
            Self::External(module) => &module.id,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    pub fn module_side_effects(&self) -> bool {
        match self {
            Self::Normal(module) => module.module_side_effects,
            Self::External(module) => module.module_side_effects,
        }
    }

    pub fn importers(&self) -> &[ModuleId] {
        match self {
            Self::Normal(module) => &module.importers,
            Self::External(module) => &module.importers,
        }
    }

    pub fn dynamic_importers(&self) -> &[ModuleId] {
        match self {
            Self::Normal(module) => &module.dynamic_importers,
            Self::External(module) => &module.dynamic_importers,
        }
    }

    pub fn as_normal(&self) -> Option<&NormalModule> {
        match self {
            Self::Normal(module) => Some(module),
            Self::External(_) => None,
        }
    }

    pub fn as_normal_mut(&mut self) -> Option<&mut NormalModule> {
        match self {
            Self::Normal(module) => Some(module),
            Self::External(_) => None,
        }
    }

    pub fn expect_normal(&self) -> &NormalModule {
        self.as_normal()
            .unwrap_or_else(|| panic!("expected normal module, got external: {}", self.id()))
    }

    pub(crate) fn add_importer(&mut self, importer: &ModuleId) {
        let importers = match self {
            Self::Normal(module) => &mut module.importers,
            Self::External(module) => &mut module.importers,
        };
        insert_sorted(importers, importer);
    }

    pub(crate) fn add_dynamic_importer(&mut self, importer: &ModuleId) {
        let importers = match self {
            Self::Normal(module) => &mut module.dynamic_importers,
            Self::External(module) => &mut module.dynamic_importers,
        };
        insert_sorted(importers, importer);
    }
}

/// A module whose source is loaded, transformed and walked.
#[derive(Debug)]
pub struct NormalModule {
    pub id: ModuleId,
    pub is_entry_point: bool,
    pub is_user_defined_entry_point: bool,
    pub manual_chunk_alias: Option<String>,
    pub chunk_name: Option<String>,
    pub chunk_file_names: FxIndexSet<String>,
    pub user_chunk_names: FxIndexSet<String>,
    pub module_side_effects: bool,
    pub synthetic_named_exports: bool,
    pub original_code: Option<String>,
    pub code: Option<String>,
    /// Static import specifiers, in source order.
    pub sources: FxIndexSet<String>,
    pub dynamic_imports: Vec<DynamicImport>,
    /// Specifiers of `export * from` statements.
    pub export_all_sources: FxIndexSet<String>,
    /// Names declared by the module itself.
    pub exports: FxIndexSet<String>,
    /// Aggregated export namespace: name to defining module id. Never
    /// contains `default` sourced from the module itself.
    pub exports_all: FxIndexMap<String, ModuleId>,
    /// Memoized specifier resolutions; a slot is written at most once.
    pub resolved_ids: FxHashMap<String, ResolvedId>,
    pub importers: Vec<ModuleId>,
    pub dynamic_importers: Vec<ModuleId>,
}

impl NormalModule {
    pub(crate) fn new(
        id: ModuleId,
        module_side_effects: bool,
        synthetic_named_exports: bool,
        is_entry_point: bool,
    ) -> Self {
        Self {
            id,
            is_entry_point,
            is_user_defined_entry_point: false,
            manual_chunk_alias: None,
            chunk_name: None,
            chunk_file_names: FxIndexSet::default(),
            user_chunk_names: FxIndexSet::default(),
            module_side_effects,
            synthetic_named_exports,
            original_code: None,
            code: None,
            sources: FxIndexSet::default(),
            dynamic_imports: Vec::new(),
            export_all_sources: FxIndexSet::default(),
            exports: FxIndexSet::default(),
            exports_all: FxIndexMap::default(),
            resolved_ids: FxHashMap::default(),
            importers: Vec::new(),
            dynamic_importers: Vec::new(),
        }
    }

    /// Install a parsed body, honoring flag overrides declared during
    /// loading or transformation.
    pub(crate) fn set_parsed(&mut self, parsed: ParsedModule) {
        self.code = Some(parsed.code);
        self.sources = parsed.sources.into_iter().collect();
        self.dynamic_imports = parsed
            .dynamic_imports
            .into_iter()
            .map(DynamicImport::new)
            .collect();
        self.export_all_sources = parsed.export_all_sources.into_iter().collect();
        self.exports = parsed.exports.into_iter().collect();
        if let Some(module_side_effects) = parsed.module_side_effects {
            self.module_side_effects = module_side_effects;
        }
        if let Some(synthetic_named_exports) = parsed.synthetic_named_exports {
            self.synthetic_named_exports = synthetic_named_exports;
        }
    }
}

/// A module left as an import in the output.
#[derive(Debug)]
pub struct ExternalModule {
    pub id: ModuleId,
    pub module_side_effects: bool,
    pub importers: Vec<ModuleId>,
    pub dynamic_importers: Vec<ModuleId>,
}

impl ExternalModule {
    pub(crate) fn new(id: ModuleId, module_side_effects: bool) -> Self {
        Self {
            id,
            module_side_effects,
            importers: Vec::new(),
            dynamic_importers: Vec::new(),
        }
    }
}

fn insert_sorted(list: &mut Vec<ModuleId>, id: &ModuleId) {
    if let Err(position) = list.binary_search(id) {
        list.insert(position, id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importer_lists_stay_sorted_and_deduped() {
        let mut module = Module::External(ExternalModule::new(ModuleId::new("lodash"), true));
        for importer in ["/z.js", "/a.js", "/m.js", "/a.js"] {
            module.add_importer(&ModuleId::new(importer));
        }
        let importers: Vec<&str> = module.importers().iter().map(ModuleId::as_str).collect();
        assert_eq!(importers, ["/a.js", "/m.js", "/z.js"]);
    }

    #[test]
    fn parsed_bodies_override_flags_only_when_declared() {
        let mut module = NormalModule::new(ModuleId::new("/a.js"), true, false, false);
        module.set_parsed(ParsedModule {
            code: "x".to_owned(),
            synthetic_named_exports: Some(true),
            ..ParsedModule::default()
        });
        assert!(module.module_side_effects);
        assert!(module.synthetic_named_exports);
    }
}
