//! Prior-build cache replay in the source fetcher.

#![allow(clippy::needless_return)] // tokio macro-generated code doesn't respect this

#[allow(dead_code)]
mod support;

use std::sync::{Arc, Mutex};

use oxpack_core::{
    CachedModule, EmittedAsset, ModuleCache, ModuleLoader, ParsedModule, ResolvedId,
    UnresolvedModule,
};
use oxpack_fs::MemoryFileSystem;
use rustc_hash::FxHashMap;
use support::{CountingTransformer, collect_warnings, options_with};

const MAIN_CODE: &str = "import \"./dep\";\nexport const m = 1;\n";

fn fixture_fs() -> MemoryFileSystem {
    MemoryFileSystem::new()
        .add_file("/a/main.js", MAIN_CODE)
        .add_file("/a/dep.js", "export const d = 1;\n")
}

fn cached_main(original_code: &str, custom_transform_cache: bool) -> CachedModule {
    CachedModule {
        id: "/a/main.js".to_owned(),
        original_code: original_code.to_owned(),
        parsed: ParsedModule {
            code: "/* cached */".to_owned(),
            sources: vec!["./dep".to_owned()],
            exports: vec!["m".to_owned()],
            ..ParsedModule::default()
        },
        resolved_ids: FxHashMap::from_iter([(
            "./dep".to_owned(),
            ResolvedId {
                id: "/a/dep.js".to_owned(),
                external: false,
                module_side_effects: true,
                synthetic_named_exports: false,
            },
        )]),
        emitted_assets: vec![EmittedAsset {
            name: Some("manifest".to_owned()),
            file_name: None,
            source: "{}".to_owned(),
        }],
        custom_transform_cache,
    }
}

fn cached_loader(cache: ModuleCache) -> (ModuleLoader, Arc<Mutex<Vec<String>>>) {
    let (on_warn, _) = collect_warnings();
    let transformed: Arc<Mutex<Vec<String>>> = Arc::default();
    let transformer = CountingTransformer {
        transformed: transformed.clone(),
    };
    let loader = ModuleLoader::with_cache(
        options_with("/a", on_warn),
        vec![],
        Arc::new(transformer),
        Arc::new(fixture_fs()),
        cache,
    );
    (loader, transformed)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unchanged_modules_replay_without_transforming() {
    let cache = ModuleCache::from_iter([cached_main(MAIN_CODE, false)]);
    let (loader, transformed) = cached_loader(cache);

    loader
        .add_entry_modules(vec![UnresolvedModule::new("/a/main.js")], true)
        .await
        .unwrap();

    // Only the dependency went through the transformer.
    assert_eq!(*transformed.lock().unwrap(), ["/a/dep.js"]);
    loader.with_graph(|graph| {
        let main = graph.module("/a/main.js").unwrap().expect_normal();
        assert_eq!(main.code.as_deref(), Some("/* cached */"));
        assert_eq!(main.exports_all.get("m").unwrap().as_str(), "/a/main.js");
        assert!(main.resolved_ids.contains_key("./dep"));
        assert!(graph.contains("/a/dep.js"));
    });
    // Cached side files are re-emitted through the plugin driver.
    let assets = loader.plugin_driver().emitted_assets();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].name.as_deref(), Some("manifest"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn changed_sources_invalidate_the_cache() {
    let cache = ModuleCache::from_iter([cached_main("// stale\n", false)]);
    let (loader, transformed) = cached_loader(cache);

    loader
        .add_entry_modules(vec![UnresolvedModule::new("/a/main.js")], true)
        .await
        .unwrap();

    assert!(
        transformed
            .lock()
            .unwrap()
            .contains(&"/a/main.js".to_owned())
    );
    assert!(loader.plugin_driver().emitted_assets().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_transform_caches_bypass_replay() {
    let cache = ModuleCache::from_iter([cached_main(MAIN_CODE, true)]);
    let (loader, transformed) = cached_loader(cache);

    loader
        .add_entry_modules(vec![UnresolvedModule::new("/a/main.js")], true)
        .await
        .unwrap();

    assert!(
        transformed
            .lock()
            .unwrap()
            .contains(&"/a/main.js".to_owned())
    );
}
