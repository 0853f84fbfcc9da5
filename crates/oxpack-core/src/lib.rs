//! Module loading and resolution core of an ES-module bundler.
//!
//! Given a set of entry points, the loader discovers the transitive
//! module graph: it resolves import specifiers through a plugin pipeline
//! and built-in path resolution, loads and transforms source text,
//! records importer back-edges and links cross-module re-exports. Loads
//! run concurrently, but a module body is fetched at most once and the
//! visible entry ordering is deterministic across concurrent batches.
//!
//! Chunking, tree-shaking and code emission are downstream concerns;
//! this crate only records the metadata they need (side-effect flags,
//! synthetic-export flags, manual-chunk assignments).

mod cache;
mod filter;
mod graph;
mod module;
mod module_loader;
mod options;
pub mod path;
mod plugin;
mod resolve;
mod side_effects;
mod transform;

pub use oxpack_error::{BuildError, BuildResult, ErrorKind};

pub use self::{
    cache::{CachedModule, ModuleCache},
    filter::{IdFilter, StringOrRegex},
    graph::{ManualChunkApi, ModuleGraph, ModuleInfo},
    module::{
        DynamicImport, DynamicImportArgument, DynamicImportResolution, ExternalModule, Module,
        ModuleId, NormalModule,
    },
    module_loader::{EntryModules, ModuleLoader, UnresolvedModule},
    options::{InputOptions, WarningHandler},
    plugin::{
        EmittedAsset, PartialResolvedId, Plugin, PluginDriver, ResolveIdResult, SourceDescription,
    },
    resolve::ResolvedId,
    side_effects::{ModuleSideEffectsOption, SideEffectsPolicy},
    transform::{ParsedModule, Transformer},
};

/// Insertion-ordered set with the fast default hasher.
pub type FxIndexSet<T> = indexmap::IndexSet<T, rustc_hash::FxBuildHasher>;
/// Insertion-ordered map with the fast default hasher.
pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, rustc_hash::FxBuildHasher>;
