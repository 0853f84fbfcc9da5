//! The concurrent, deduplicating module discovery engine.
//!
//! Entries fan out into loads, loads fan out into more loads via their
//! imports. The registry lock is never held across a suspension point,
//! and a module id is claimed with a placeholder in the same lock
//! acquisition that misses it, so a body is fetched and transformed at
//! most once no matter how many importers race for it.

use std::sync::Arc;

use futures::{
    FutureExt,
    future::{BoxFuture, Shared, join_all},
};
use oxpack_error::{BuildError, BuildResult};
use oxpack_fs::FileSystem;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{
    cache::ModuleCache,
    graph::{ManualChunkApi, ModuleGraph},
    module::{
        DynamicImportArgument, DynamicImportResolution, ExternalModule, Module, ModuleId,
        NormalModule,
    },
    options::{InputOptions, NormalizedOptions},
    path,
    plugin::{Plugin, PluginDriver, SourceDescription},
    resolve::{self, ResolvedId},
    transform::Transformer,
};

type SharedLoad = Shared<BoxFuture<'static, BuildResult<()>>>;

/// An entry as submitted by the host or emitted by a plugin.
#[derive(Debug, Clone, Default)]
pub struct UnresolvedModule {
    pub id: String,
    pub file_name: Option<String>,
    pub name: Option<String>,
    pub importer: Option<String>,
}

impl UnresolvedModule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(id)
        }
    }
}

/// Result of one entry batch.
#[derive(Debug)]
pub struct EntryModules {
    /// All entries so far, in stable submission order.
    pub entry_modules: Vec<ModuleId>,
    pub manual_chunk_modules_by_alias: FxHashMap<String, Vec<ModuleId>>,
    /// The modules loaded by this batch, in submission order.
    pub new_entry_modules: Vec<ModuleId>,
}

#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    graph: Mutex<ModuleGraph>,
    plugin_driver: Arc<PluginDriver>,
    transformer: Arc<dyn Transformer>,
    fs: Arc<dyn FileSystem>,
    options: NormalizedOptions,
    cache: ModuleCache,
    /// Join of every batch scheduled so far; see `await_load_modules`.
    latest_load: Mutex<Option<SharedLoad>>,
}

/// Outcome of resolving one dynamic import site.
enum DynamicResolution {
    None,
    Replacement(String),
    Resolved(ResolvedId),
}

impl ModuleLoader {
    pub fn new(
        options: InputOptions,
        plugins: Vec<Arc<dyn Plugin>>,
        transformer: Arc<dyn Transformer>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self::with_cache(options, plugins, transformer, fs, ModuleCache::default())
    }

    pub fn with_cache(
        options: InputOptions,
        plugins: Vec<Arc<dyn Plugin>>,
        transformer: Arc<dyn Transformer>,
        fs: Arc<dyn FileSystem>,
        cache: ModuleCache,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                graph: Mutex::new(ModuleGraph::new()),
                plugin_driver: Arc::new(PluginDriver::new(plugins)),
                transformer,
                fs,
                options: options.normalize(),
                cache,
                latest_load: Mutex::new(None),
            }),
        }
    }

    pub fn plugin_driver(&self) -> &Arc<PluginDriver> {
        &self.inner.plugin_driver
    }

    /// Inspect the graph. The callback must not call back into the
    /// loader.
    pub fn with_graph<R>(&self, f: impl FnOnce(&ModuleGraph) -> R) -> R {
        f(&self.inner.graph.lock())
    }

    /// Resolve a specifier the way the graph walker would. `skip` is the
    /// index of a plugin whose `resolve_id` hook must not answer, used
    /// for plugin chaining.
    pub async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
        skip: Option<usize>,
    ) -> BuildResult<Option<ResolvedId>> {
        self.inner.resolve_id(specifier, importer, skip).await
    }

    /// Add a batch of entries. Batches may be submitted concurrently;
    /// entry indices reflect submission order, and the returned future
    /// resolves only once every load scheduled so far has settled.
    #[tracing::instrument(skip_all, fields(count = entries.len()))]
    pub async fn add_entry_modules(
        &self,
        entries: Vec<UnresolvedModule>,
        is_user_defined: bool,
    ) -> BuildResult<EntryModules> {
        let inner = self.inner.clone();
        let first_index = inner.graph.lock().reserve_entry_indices(entries.len() as u32);

        let batch = {
            let inner = inner.clone();
            async move {
                let loads = entries.iter().map(|entry| {
                    inner
                        .clone()
                        .load_entry_module(entry.id.clone(), true, entry.importer.clone())
                });
                let results = join_all(loads).await;
                let mut loaded = Vec::with_capacity(results.len());
                for result in results {
                    loaded.push(result?);
                }

                let mut graph = inner.graph.lock();
                for (offset, (entry, module_id)) in entries.iter().zip(&loaded).enumerate() {
                    let module = graph.normal_mut(module_id);
                    if is_user_defined {
                        module.is_user_defined_entry_point = true;
                    }
                    if let Some(file_name) = &entry.file_name {
                        module.chunk_file_names.insert(file_name.clone());
                    } else if let Some(name) = &entry.name {
                        if module.chunk_name.is_none() {
                            module.chunk_name = Some(name.clone());
                        }
                        if is_user_defined {
                            module.user_chunk_names.insert(name.clone());
                        }
                    }
                    graph.add_entry(first_index + offset as u32, module_id.clone());
                }
                Ok(loaded)
            }
        }
        .boxed()
        .shared();

        inner.extend_load_modules(batch.clone().map(|result| result.map(|_| ())).boxed());
        let new_entry_modules = batch.await?;
        inner.await_load_modules().await?;

        let graph = inner.graph.lock();
        Ok(EntryModules {
            entry_modules: graph.entry_modules(),
            manual_chunk_modules_by_alias: graph.manual_chunk_modules().clone(),
            new_entry_modules,
        })
    }

    /// Load the listed ids as non-entry modules and pin them to their
    /// aliases. An empty map is a valid no-op.
    #[tracing::instrument(skip_all)]
    pub async fn add_manual_chunks(
        &self,
        manual_chunks: Vec<(String, Vec<String>)>,
    ) -> BuildResult<()> {
        let inner = self.inner.clone();
        let assignments: Vec<(String, String)> = manual_chunks
            .into_iter()
            .flat_map(|(alias, files)| {
                files.into_iter().map(move |file| (alias.clone(), file))
            })
            .collect();

        let batch = {
            let inner = inner.clone();
            async move {
                let loads = assignments
                    .iter()
                    .map(|(_, file)| inner.clone().load_entry_module(file.clone(), false, None));
                let results = join_all(loads).await;
                let mut loaded = Vec::with_capacity(results.len());
                for result in results {
                    loaded.push(result?);
                }

                let mut graph = inner.graph.lock();
                for ((alias, _), module_id) in assignments.iter().zip(&loaded) {
                    graph.add_module_to_manual_chunk(alias, module_id)?;
                }
                Ok(())
            }
        }
        .boxed()
        .shared();

        inner.extend_load_modules(batch.clone().boxed());
        batch.await?;
        inner.await_load_modules().await
    }

    /// Run a manual-chunk assignment callback over every internal
    /// module already in the graph. The callback is synchronous.
    pub fn assign_manual_chunks<F>(&self, get_manual_chunk: F) -> BuildResult<()>
    where
        F: Fn(&str, &ManualChunkApi<'_>) -> Option<String>,
    {
        let mut graph = self.inner.graph.lock();
        let module_ids = graph.normal_module_ids();
        for module_id in module_ids {
            let alias = get_manual_chunk(&module_id, &ManualChunkApi::new(&graph));
            if let Some(alias) = alias {
                graph.add_module_to_manual_chunk(&alias, &module_id)?;
            }
        }
        Ok(())
    }
}

impl LoaderInner {
    fn warn(&self, warning: BuildError) {
        (self.options.on_warn)(warning);
    }

    fn display_id(&self, id: &str) -> String {
        path::relative_id(id, &self.options.cwd)
    }

    async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
        skip: Option<usize>,
    ) -> BuildResult<Option<ResolvedId>> {
        resolve::resolve_id(
            &self.options,
            &self.plugin_driver,
            &*self.fs,
            specifier,
            importer,
            skip,
        )
        .await
    }

    /// Apply the unresolved-import policy to a resolution.
    fn handle_resolve_id(
        &self,
        resolved: Option<ResolvedId>,
        specifier: &str,
        importer: &ModuleId,
    ) -> BuildResult<ResolvedId> {
        match resolved {
            Some(resolved) => {
                if resolved.external && resolved.synthetic_named_exports {
                    self.warn(BuildError::external_synthetic_exports(resolved.id.clone()));
                }
                Ok(resolved)
            }
            None => {
                if path::is_relative(specifier) {
                    return Err(BuildError::unresolved_import(
                        specifier,
                        self.display_id(importer),
                    ));
                }
                self.warn(BuildError::unresolved_import_treated_as_external(
                    specifier,
                    self.display_id(importer),
                ));
                Ok(ResolvedId {
                    id: specifier.to_owned(),
                    external: true,
                    module_side_effects: self.options.side_effects.has_effects(specifier, true),
                    synthetic_named_exports: false,
                })
            }
        }
    }

    fn load_entry_module(
        self: Arc<Self>,
        unresolved_id: String,
        is_entry: bool,
        importer: Option<String>,
    ) -> BoxFuture<'static, BuildResult<ModuleId>> {
        async move {
            let resolved = self
                .resolve_id(&unresolved_id, importer.as_deref(), None)
                .await?;
            match resolved {
                None => Err(BuildError::unresolved_entry(unresolved_id)),
                Some(resolved) if resolved.external => {
                    Err(BuildError::entry_cannot_be_external(unresolved_id))
                }
                Some(resolved) => self.clone().fetch_module(resolved, importer, is_entry).await,
            }
        }
        .boxed()
    }

    /// Materialize an internal module, fetching and walking its body at
    /// most once. A repeated call for an id that is still loading
    /// returns the placeholder immediately; this is what breaks import
    /// cycles.
    fn fetch_module(
        self: Arc<Self>,
        resolved: ResolvedId,
        importer: Option<String>,
        is_entry: bool,
    ) -> BoxFuture<'static, BuildResult<ModuleId>> {
        async move {
            let id = ModuleId::new(&resolved.id);
            {
                let mut graph = self.graph.lock();
                if let Some(Module::Normal(existing)) = graph.module_mut(&id) {
                    existing.is_entry_point |= is_entry;
                    return Ok(id);
                }
                // An id previously seen as external is re-instantiated
                // as a normal module; the external node is replaced.
                graph.insert_module(Module::Normal(NormalModule::new(
                    id.clone(),
                    resolved.module_side_effects,
                    resolved.synthetic_named_exports,
                    is_entry,
                )));
                graph.mark_watched(id.clone());
            }
            tracing::debug!(module = %id, "fetching module");

            self.add_module_source(&id, importer.as_deref(), &resolved)
                .await?;
            self.clone().fetch_all_dependencies(id.clone()).await?;
            self.link_export_all(&id);
            Ok(id)
        }
        .boxed()
    }

    /// Load the module's source (plugin `load` hook, then filesystem),
    /// replay the cache when possible, otherwise transform.
    async fn add_module_source(
        &self,
        id: &ModuleId,
        importer: Option<&str>,
        resolved: &ResolvedId,
    ) -> BuildResult<()> {
        let imported_by = importer.map(|importer| self.display_id(importer));

        let desc = match self.plugin_driver.load(id).await {
            Err(error) => {
                return Err(BuildError::load_failed(
                    id.as_str(),
                    imported_by.as_deref(),
                    error.to_string(),
                ));
            }
            Ok(Some(desc)) => desc,
            Ok(None) => {
                let bytes = self.fs.read(id).await.map_err(|error| {
                    BuildError::load_failed(id.as_str(), imported_by.as_deref(), error.to_string())
                })?;
                match String::from_utf8(bytes) {
                    Ok(code) => SourceDescription::from(code),
                    Err(_) => return Err(BuildError::bad_loader(id.as_str())),
                }
            }
        };

        if let Some(cached) = self.cache.get(id)
            && !cached.custom_transform_cache
            && cached.original_code == desc.code
        {
            for asset in &cached.emitted_assets {
                self.plugin_driver.emit_file(asset.clone());
            }
            let mut graph = self.graph.lock();
            let module = graph.normal_mut(id);
            module.original_code = Some(cached.original_code.clone());
            module.set_parsed(cached.parsed.clone());
            module.resolved_ids = cached.resolved_ids.clone();
            tracing::debug!(module = %id, "restored module from cache");
            return Ok(());
        }

        {
            // Flags declared by the resolution were applied at
            // construction; merge the ones declared by the loader before
            // the transformer runs.
            let mut graph = self.graph.lock();
            let module = graph.normal_mut(id);
            module.original_code = Some(desc.code.clone());
            if let Some(module_side_effects) = desc.module_side_effects {
                module.module_side_effects = module_side_effects;
            }
            if let Some(synthetic_named_exports) = desc.synthetic_named_exports {
                module.synthetic_named_exports = synthetic_named_exports;
            }
        }

        let parsed = self.transformer.transform(desc, id).await?;
        self.graph.lock().normal_mut(id).set_parsed(parsed);
        Ok(())
    }

    /// Concurrent fan-out over the module's static sources and dynamic
    /// imports. Errors surface in submission order.
    fn fetch_all_dependencies(self: Arc<Self>, module_id: ModuleId) -> BoxFuture<'static, BuildResult<()>> {
        async move {
            let (sources, dynamic_imports) = {
                let graph = self.graph.lock();
                let module = graph.normal(&module_id);
                // `export *` targets are dependency edges too; the
                // transformer is not required to repeat them in
                // `sources`.
                let mut sources: Vec<String> = module.sources.iter().cloned().collect();
                sources.extend(
                    module
                        .export_all_sources
                        .iter()
                        .filter(|source| !module.sources.contains(source.as_str()))
                        .cloned(),
                );
                (
                    sources,
                    module
                        .dynamic_imports
                        .iter()
                        .enumerate()
                        .map(|(index, import)| (index, import.argument.clone()))
                        .collect::<Vec<_>>(),
                )
            };

            let mut jobs: Vec<BoxFuture<'static, BuildResult<()>>> = Vec::new();
            for source in sources {
                jobs.push(self.clone().fetch_static_dependency(module_id.clone(), source));
            }
            for (index, argument) in dynamic_imports {
                jobs.push(
                    self.clone()
                        .fetch_dynamic_dependency(module_id.clone(), index, argument),
                );
            }
            for result in join_all(jobs).await {
                result?;
            }
            Ok(())
        }
        .boxed()
    }

    fn fetch_static_dependency(
        self: Arc<Self>,
        importer: ModuleId,
        source: String,
    ) -> BoxFuture<'static, BuildResult<()>> {
        async move {
            let resolved = self.resolve_static_dependency(&importer, &source).await?;
            let dependency = self
                .clone()
                .fetch_resolved_dependency(&source, &importer, resolved)
                .await?;
            self.graph
                .lock()
                .expect_module_mut(&dependency)
                .add_importer(&importer);
            Ok(())
        }
        .boxed()
    }

    /// Resolve a specifier from a module, memoized in the module's
    /// `resolved_ids`. The first stored result wins; concurrent losers
    /// adopt it.
    async fn resolve_static_dependency(
        &self,
        importer: &ModuleId,
        source: &str,
    ) -> BuildResult<ResolvedId> {
        let memoized = {
            let graph = self.graph.lock();
            graph.normal(importer).resolved_ids.get(source).cloned()
        };
        if let Some(resolved) = memoized {
            return Ok(resolved);
        }
        let resolved = self.resolve_id(source, Some(importer.as_str()), None).await?;
        let resolved = self.handle_resolve_id(resolved, source, importer)?;
        let mut graph = self.graph.lock();
        Ok(graph
            .normal_mut(importer)
            .resolved_ids
            .entry(source.to_owned())
            .or_insert(resolved)
            .clone())
    }

    /// Materialize a resolved dependency as an internal or external
    /// module.
    fn fetch_resolved_dependency(
        self: Arc<Self>,
        source: &str,
        importer: &ModuleId,
        resolved: ResolvedId,
    ) -> BoxFuture<'static, BuildResult<ModuleId>> {
        let source = source.to_owned();
        let importer = importer.clone();
        async move {
            if resolved.external {
                let id = ModuleId::new(&resolved.id);
                let mut graph = self.graph.lock();
                match graph.module(&id) {
                    Some(Module::Normal(_)) => {
                        return Err(BuildError::internal_id_cannot_be_external(
                            source,
                            self.display_id(&importer),
                        ));
                    }
                    Some(Module::External(_)) => {}
                    None => graph.insert_module(Module::External(ExternalModule::new(
                        id.clone(),
                        resolved.module_side_effects,
                    ))),
                }
                Ok(id)
            } else {
                self.fetch_module(resolved, Some(importer.to_string()), false)
                    .await
            }
        }
        .boxed()
    }

    fn fetch_dynamic_dependency(
        self: Arc<Self>,
        module_id: ModuleId,
        index: usize,
        argument: DynamicImportArgument,
    ) -> BoxFuture<'static, BuildResult<()>> {
        async move {
            match self.resolve_dynamic_import(&module_id, &argument).await? {
                DynamicResolution::None => Ok(()),
                DynamicResolution::Replacement(replacement) => {
                    let mut graph = self.graph.lock();
                    graph.normal_mut(&module_id).dynamic_imports[index].resolution =
                        DynamicImportResolution::Replacement(replacement);
                    Ok(())
                }
                DynamicResolution::Resolved(resolved) => {
                    let external = resolved.external;
                    let dependency = self
                        .clone()
                        .fetch_resolved_dependency(argument.specifier(), &module_id, resolved)
                        .await?;
                    let mut graph = self.graph.lock();
                    if !external {
                        graph
                            .expect_module_mut(&dependency)
                            .add_dynamic_importer(&module_id);
                    }
                    graph.normal_mut(&module_id).dynamic_imports[index].resolution =
                        DynamicImportResolution::Module(dependency);
                    Ok(())
                }
            }
        }
        .boxed()
    }

    async fn resolve_dynamic_import(
        &self,
        module_id: &ModuleId,
        argument: &DynamicImportArgument,
    ) -> BuildResult<DynamicResolution> {
        use crate::plugin::ResolveIdResult;

        let hook = self
            .plugin_driver
            .resolve_dynamic_import(argument, module_id)
            .await?;
        match argument {
            DynamicImportArgument::Expression(_) => Ok(match hook {
                // A plugin may substitute a non-literal import with raw
                // replacement text; no module is materialized for it.
                Some(ResolveIdResult::Id(replacement)) => {
                    DynamicResolution::Replacement(replacement)
                }
                Some(ResolveIdResult::Partial(partial)) => {
                    DynamicResolution::Resolved(ResolvedId {
                        id: partial.id,
                        external: partial.external,
                        module_side_effects: partial.module_side_effects.unwrap_or(true),
                        synthetic_named_exports: partial.synthetic_named_exports.unwrap_or(false),
                    })
                }
                Some(ResolveIdResult::MarkExternal) | None => DynamicResolution::None,
            }),
            DynamicImportArgument::Literal(specifier) => match hook {
                None => Ok(DynamicResolution::Resolved(
                    self.resolve_static_dependency(module_id, specifier).await?,
                )),
                Some(result) => {
                    let normalized = resolve::normalize_resolve_id_result(
                        &self.options,
                        Some(result),
                        Some(module_id.as_str()),
                        specifier,
                    )
                    .map(|partial| resolve::add_defaults(&self.options, partial));
                    Ok(DynamicResolution::Resolved(self.handle_resolve_id(
                        normalized, specifier, module_id,
                    )?))
                }
            },
        }
    }

    /// Populate the module's aggregate export namespace from its own
    /// exports and its `export *` sources. Runs after the dependency
    /// fan-out, so every target is fully linked.
    fn link_export_all(&self, module_id: &ModuleId) {
        let mut warnings = Vec::new();
        {
            let mut graph = self.graph.lock();

            let own_exports: Vec<String> = graph
                .normal(module_id)
                .exports
                .iter()
                .filter(|name| *name != "default")
                .cloned()
                .collect();
            {
                let module = graph.normal_mut(module_id);
                for name in own_exports {
                    module.exports_all.insert(name, module_id.clone());
                }
            }

            let targets: Vec<ModuleId> = {
                let module = graph.normal(module_id);
                module
                    .export_all_sources
                    .iter()
                    .filter_map(|source| module.resolved_ids.get(source))
                    .map(|resolved| ModuleId::new(&resolved.id))
                    .collect()
            };
            for target in targets {
                let reexports: Option<Vec<(String, ModuleId)>> = match graph.module(&target) {
                    Some(Module::Normal(dependency)) => Some(
                        dependency
                            .exports_all
                            .iter()
                            .map(|(name, owner)| (name.clone(), owner.clone()))
                            .collect(),
                    ),
                    // Externals contribute nothing to the namespace.
                    _ => None,
                };
                let Some(reexports) = reexports else { continue };
                let module = graph.normal_mut(module_id);
                for (name, owner) in reexports {
                    if let Some(existing) = module.exports_all.get(&name) {
                        warnings.push(BuildError::namespace_conflict(
                            name.clone(),
                            self.display_id(module_id),
                            self.display_id(existing),
                            self.display_id(&owner),
                        ));
                    } else {
                        module.exports_all.insert(name, owner);
                    }
                }
            }
        }
        for warning in warnings {
            self.warn(warning);
        }
    }

    /// Fold a new batch into the join of everything scheduled so far.
    fn extend_load_modules(&self, load: BoxFuture<'static, BuildResult<()>>) {
        let mut latest = self.latest_load.lock();
        let combined = match latest.take() {
            Some(previous) => async move {
                let (new, old) = futures::future::join(load, previous).await;
                new.and(old)
            }
            .boxed()
            .shared(),
            None => load.shared(),
        };
        *latest = Some(combined);
    }

    /// Await quiescence: snapshot the latest load, await it, and repeat
    /// if another batch arrived in the meantime. Each new batch is built
    /// atop the previous reference, so the loop terminates once no new
    /// batch shows up during an await.
    async fn await_load_modules(&self) -> BuildResult<()> {
        loop {
            let Some(snapshot) = self.latest_load.lock().clone() else {
                return Ok(());
            };
            snapshot.clone().await?;
            let settled = {
                let latest = self.latest_load.lock();
                match latest.as_ref() {
                    Some(current) => current.ptr_eq(&snapshot),
                    None => true,
                }
            };
            if settled {
                return Ok(());
            }
        }
    }
}
