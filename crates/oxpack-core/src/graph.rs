//! The module registry and the bookkeeping shared by entry batches.

use itertools::Itertools;
use oxpack_error::{BuildError, BuildResult};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::module::{Module, ModuleId, NormalModule};

/// Process-wide registry of module nodes, plus the indexed entry list,
/// manual-chunk table and watch-file set.
///
/// At most one node exists per id. Back-edges reference nodes by id, so
/// cycles are plain data.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    module_by_id: FxHashMap<ModuleId, Module>,
    indexed_entries: Vec<(u32, ModuleId)>,
    next_entry_index: u32,
    manual_chunk_modules: FxHashMap<String, Vec<ModuleId>>,
    watch_files: FxHashSet<ModuleId>,
}

impl ModuleGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.module_by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.module_by_id.contains_key(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.module_by_id.values()
    }

    pub fn len(&self) -> usize {
        self.module_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_by_id.is_empty()
    }

    /// Entry modules in stable submission order.
    pub fn entry_modules(&self) -> Vec<ModuleId> {
        self.indexed_entries
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn indexed_entries(&self) -> &[(u32, ModuleId)] {
        &self.indexed_entries
    }

    pub fn manual_chunk_modules(&self) -> &FxHashMap<String, Vec<ModuleId>> {
        &self.manual_chunk_modules
    }

    pub fn watch_files(&self) -> &FxHashSet<ModuleId> {
        &self.watch_files
    }

    pub(crate) fn insert_module(&mut self, module: Module) {
        // The only permitted replacement is an external placeholder being
        // re-instantiated as a normal module.
        debug_assert!(!matches!(
            self.module_by_id.get(module.id().as_str()),
            Some(Module::Normal(_))
        ));
        self.module_by_id.insert(module.id().clone(), module);
    }

    pub(crate) fn module_mut(&mut self, id: &str) -> Option<&mut Module> {
        self.module_by_id.get_mut(id)
    }

    pub(crate) fn expect_module_mut(&mut self, id: &str) -> &mut Module {
        self.module_by_id
            .get_mut(id)
            .unwrap_or_else(|| panic!("module not in registry: {id}"))
    }

    pub(crate) fn normal(&self, id: &str) -> &NormalModule {
        self.module_by_id
            .get(id)
            .unwrap_or_else(|| panic!("module not in registry: {id}"))
            .expect_normal()
    }

    pub(crate) fn normal_mut(&mut self, id: &str) -> &mut NormalModule {
        self.expect_module_mut(id)
            .as_normal_mut()
            .unwrap_or_else(|| panic!("expected normal module, got external: {id}"))
    }

    pub(crate) fn normal_module_ids(&self) -> Vec<ModuleId> {
        self.module_by_id
            .values()
            .filter(|module| !module.is_external())
            .map(|module| module.id().clone())
            .sorted()
            .collect()
    }

    pub(crate) fn mark_watched(&mut self, id: ModuleId) {
        self.watch_files.insert(id);
    }

    /// Reserve a contiguous index range for a batch of `count` entries.
    pub(crate) fn reserve_entry_indices(&mut self, count: u32) -> u32 {
        let first = self.next_entry_index;
        self.next_entry_index += count;
        first
    }

    /// Insert an entry, or lower its stored index to the minimum
    /// observed when it was already present.
    pub(crate) fn add_entry(&mut self, index: u32, id: ModuleId) {
        match self
            .indexed_entries
            .iter_mut()
            .find(|(_, existing)| *existing == id)
        {
            Some(entry) => entry.0 = entry.0.min(index),
            None => self.indexed_entries.push((index, id)),
        }
        self.indexed_entries.sort_by_key(|(index, _)| *index);
    }

    pub(crate) fn add_module_to_manual_chunk(
        &mut self,
        alias: &str,
        id: &ModuleId,
    ) -> BuildResult<()> {
        let module = self.normal_mut(id);
        match &module.manual_chunk_alias {
            Some(existing) if existing != alias => {
                return Err(BuildError::cannot_assign_module_to_chunk(
                    id.as_str(),
                    alias,
                    existing.as_str(),
                ));
            }
            Some(_) => return Ok(()),
            None => module.manual_chunk_alias = Some(alias.to_owned()),
        }
        self.manual_chunk_modules
            .entry(alias.to_owned())
            .or_default()
            .push(id.clone());
        Ok(())
    }
}

/// The read-only view handed to a manual-chunk assignment callback.
pub struct ManualChunkApi<'a> {
    graph: &'a ModuleGraph,
}

impl<'a> ManualChunkApi<'a> {
    pub(crate) fn new(graph: &'a ModuleGraph) -> Self {
        Self { graph }
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.graph
            .module_by_id
            .keys()
            .sorted()
            .cloned()
            .collect()
    }

    pub fn module_info(&self, id: &str) -> Option<ModuleInfo> {
        let module = self.graph.module(id)?;
        let info = match module {
            Module::External(external) => ModuleInfo {
                id: external.id.clone(),
                is_entry: false,
                is_external: true,
                imported_ids: Vec::new(),
                importers: external.importers.clone(),
                dynamic_importers: external.dynamic_importers.clone(),
                has_module_side_effects: external.module_side_effects,
            },
            Module::Normal(normal) => ModuleInfo {
                id: normal.id.clone(),
                is_entry: normal.is_entry_point,
                is_external: false,
                imported_ids: normal
                    .sources
                    .iter()
                    .filter_map(|source| normal.resolved_ids.get(source))
                    .map(|resolved| ModuleId::new(&resolved.id))
                    .collect(),
                importers: normal.importers.clone(),
                dynamic_importers: normal.dynamic_importers.clone(),
                has_module_side_effects: normal.module_side_effects,
            },
        };
        Some(info)
    }
}

/// A snapshot of one module's graph-facing metadata.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub is_entry: bool,
    pub is_external: bool,
    pub imported_ids: Vec<ModuleId>,
    pub importers: Vec<ModuleId>,
    pub dynamic_importers: Vec<ModuleId>,
    pub has_module_side_effects: bool,
}
