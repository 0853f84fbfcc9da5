//! Shared fixtures: a line-oriented test transformer and plugin stubs.

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use oxpack_core::{
    BuildError, BuildResult, DynamicImportArgument, InputOptions, ModuleId, ModuleLoader,
    ParsedModule, Plugin, ResolveIdResult, SourceDescription, Transformer, WarningHandler,
};
use oxpack_fs::MemoryFileSystem;
use regex::Regex;
use rustc_hash::FxHashMap;

static EXPORT_ALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*export\s*\*\s*from\s*["']([^"']+)["']"#).unwrap());

static IMPORT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+[^'"]*?\bfrom\s*["']([^"']+)["']"#).unwrap());

static IMPORT_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s*["']([^"']+)["']"#).unwrap());

static EXPORT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*export\s*\{([^}]*)\}\s*from\s*["']([^"']+)["']"#).unwrap());

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*export\s+(?:async\s+function|function|class|const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap()
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*export\s+default\b").unwrap());

static EXPORT_BRACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*export\s*\{([^}]*)\}").unwrap());

static DYNAMIC_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s*\(\s*(?:"([^"]+)"|'([^']+)'|([^)]+?))\s*\)"#).unwrap());

fn push_brace_names(body: &str, exports: &mut Vec<String>) {
    for name in body.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let exported = match name.split_once(" as ") {
            Some((_, alias)) => alias.trim(),
            None => name,
        };
        exports.push(exported.to_owned());
    }
}

/// Scan an ES-module-shaped source line by line.
pub fn parse_module(desc: &SourceDescription) -> ParsedModule {
    let mut parsed = ParsedModule {
        code: desc.code.clone(),
        ..ParsedModule::default()
    };
    for line in desc.code.lines() {
        if let Some(captures) = EXPORT_ALL_RE.captures(line) {
            // A re-export-all is both a dependency edge and an
            // export-aggregation source.
            parsed.export_all_sources.push(captures[1].to_owned());
            parsed.sources.push(captures[1].to_owned());
        } else if let Some(captures) = IMPORT_FROM_RE.captures(line) {
            parsed.sources.push(captures[1].to_owned());
        } else if let Some(captures) = IMPORT_BARE_RE.captures(line) {
            parsed.sources.push(captures[1].to_owned());
        } else if let Some(captures) = EXPORT_FROM_RE.captures(line) {
            push_brace_names(&captures[1], &mut parsed.exports);
            parsed.sources.push(captures[2].to_owned());
        } else if let Some(captures) = EXPORT_DECL_RE.captures(line) {
            parsed.exports.push(captures[1].to_owned());
        } else if EXPORT_DEFAULT_RE.is_match(line) {
            parsed.exports.push("default".to_owned());
        } else if let Some(captures) = EXPORT_BRACES_RE.captures(line) {
            push_brace_names(&captures[1], &mut parsed.exports);
        }
        for captures in DYNAMIC_IMPORT_RE.captures_iter(line) {
            if let Some(literal) = captures.get(1).or_else(|| captures.get(2)) {
                parsed
                    .dynamic_imports
                    .push(DynamicImportArgument::Literal(literal.as_str().to_owned()));
            } else if let Some(expression) = captures.get(3) {
                parsed.dynamic_imports.push(DynamicImportArgument::Expression(
                    expression.as_str().trim().to_owned(),
                ));
            }
        }
    }
    parsed
}

/// Transformer that records every id it sees, so tests can assert a
/// body is transformed at most once.
pub struct CountingTransformer {
    pub transformed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transformer for CountingTransformer {
    async fn transform(&self, desc: SourceDescription, id: &ModuleId) -> BuildResult<ParsedModule> {
        self.transformed.lock().unwrap().push(id.to_string());
        Ok(parse_module(&desc))
    }
}

/// Plugin answering `resolve_id` from a closure.
pub struct ResolvePlugin<F>(pub F);

#[async_trait]
impl<F> Plugin for ResolvePlugin<F>
where
    F: Fn(&str, Option<&str>) -> Option<ResolveIdResult> + Send + Sync,
{
    fn name(&self) -> &'static str {
        "test-resolve"
    }

    async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> BuildResult<Option<ResolveIdResult>> {
        Ok((self.0)(specifier, importer))
    }
}

/// Plugin serving virtual module sources from a map.
pub struct LoadPlugin(pub FxHashMap<String, String>);

#[async_trait]
impl Plugin for LoadPlugin {
    fn name(&self) -> &'static str {
        "test-load"
    }

    async fn load(&self, id: &str) -> BuildResult<Option<SourceDescription>> {
        Ok(self.0.get(id).map(|code| SourceDescription::from(code.clone())))
    }
}

/// Plugin answering `resolve_dynamic_import` from a closure.
pub struct DynamicPlugin<F>(pub F);

#[async_trait]
impl<F> Plugin for DynamicPlugin<F>
where
    F: Fn(&DynamicImportArgument, &str) -> Option<ResolveIdResult> + Send + Sync,
{
    fn name(&self) -> &'static str {
        "test-dynamic"
    }

    async fn resolve_dynamic_import(
        &self,
        argument: &DynamicImportArgument,
        importer: &str,
    ) -> BuildResult<Option<ResolveIdResult>> {
        Ok((self.0)(argument, importer))
    }
}

/// Plugin delaying specific loads to force completion-order inversions.
pub struct DelayLoadPlugin(pub FxHashMap<String, u64>);

#[async_trait]
impl Plugin for DelayLoadPlugin {
    fn name(&self) -> &'static str {
        "test-delay"
    }

    async fn load(&self, id: &str) -> BuildResult<Option<SourceDescription>> {
        if let Some(millis) = self.0.get(id) {
            tokio::time::sleep(std::time::Duration::from_millis(*millis)).await;
        }
        Ok(None)
    }
}

pub fn collect_warnings() -> (WarningHandler, Arc<Mutex<Vec<BuildError>>>) {
    let warnings: Arc<Mutex<Vec<BuildError>>> = Arc::default();
    let sink = warnings.clone();
    (
        Arc::new(move |warning| sink.lock().unwrap().push(warning)),
        warnings,
    )
}

pub fn options_with(cwd: &str, on_warn: WarningHandler) -> InputOptions {
    InputOptions {
        cwd: cwd.to_owned(),
        on_warn,
        ..InputOptions::default()
    }
}

/// A loader over the in-memory filesystem plus the list of transformed
/// module ids.
pub fn build_loader(
    fs: MemoryFileSystem,
    plugins: Vec<Arc<dyn Plugin>>,
    options: InputOptions,
) -> (ModuleLoader, Arc<Mutex<Vec<String>>>) {
    let transformed: Arc<Mutex<Vec<String>>> = Arc::default();
    let transformer = CountingTransformer {
        transformed: transformed.clone(),
    };
    (
        ModuleLoader::new(options, plugins, Arc::new(transformer), Arc::new(fs)),
        transformed,
    )
}
