//! Loader configuration.

use std::sync::Arc;

use oxpack_error::BuildError;
use serde_json::Value;

use crate::{
    filter::IdFilter,
    path,
    side_effects::{ModuleSideEffectsOption, SideEffectsPolicy},
};

pub type WarningHandler = Arc<dyn Fn(BuildError) + Send + Sync>;

/// The loader's configuration surface.
///
/// `external` and `pure_external_modules` take any [`IdFilter`] shape;
/// `module_side_effects` takes any [`ModuleSideEffectsOption`] shape.
/// Warnings are routed through `on_warn` and never halt loading.
#[derive(Clone)]
pub struct InputOptions {
    pub external: IdFilter,
    pub module_side_effects: ModuleSideEffectsOption,
    pub pure_external_modules: IdFilter,
    pub preserve_symlinks: bool,
    /// Base directory for entry resolution and diagnostic display.
    pub cwd: String,
    pub on_warn: WarningHandler,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            external: IdFilter::default(),
            module_side_effects: ModuleSideEffectsOption::default(),
            pure_external_modules: IdFilter::default(),
            preserve_symlinks: false,
            cwd: "/".to_owned(),
            on_warn: Arc::new(|warning: BuildError| {
                tracing::warn!(code = warning.code(), "{warning}");
            }),
        }
    }
}

impl InputOptions {
    /// Build options from a host JSON config object. Unrecognized shapes
    /// produce an `INVALID_OPTION` warning through `on_warn` and fall
    /// back to the option's default.
    pub fn from_json(config: &Value, on_warn: WarningHandler) -> Self {
        let mut options = Self {
            on_warn,
            ..Self::default()
        };
        let field = |name: &str| config.get(name).cloned().unwrap_or(Value::Null);

        match IdFilter::from_json(&field("external"), "external") {
            Ok(external) => options.external = external,
            Err(warning) => (options.on_warn)(warning),
        }
        match ModuleSideEffectsOption::from_json(&field("moduleSideEffects")) {
            Ok(side_effects) => options.module_side_effects = side_effects,
            Err(warning) => (options.on_warn)(warning),
        }
        match IdFilter::from_json(&field("pureExternalModules"), "pureExternalModules") {
            Ok(pure) => options.pure_external_modules = pure,
            Err(warning) => (options.on_warn)(warning),
        }
        match field("preserveSymlinks") {
            Value::Null => {}
            Value::Bool(preserve) => options.preserve_symlinks = preserve,
            _ => (options.on_warn)(BuildError::invalid_option(
                "preserveSymlinks",
                "expected a boolean",
            )),
        }
        if let Some(Value::String(cwd)) = config.get("cwd") {
            options.cwd = cwd.clone();
        }
        options
    }

    pub(crate) fn normalize(self) -> NormalizedOptions {
        NormalizedOptions {
            external: self.external,
            side_effects: SideEffectsPolicy::new(
                self.module_side_effects,
                self.pure_external_modules,
            ),
            preserve_symlinks: self.preserve_symlinks,
            cwd: path::normalize(&self.cwd),
            on_warn: self.on_warn,
        }
    }
}

/// Options after compilation, as consumed by the loader and resolver.
#[derive(Clone)]
pub(crate) struct NormalizedOptions {
    pub external: IdFilter,
    pub side_effects: SideEffectsPolicy,
    pub preserve_symlinks: bool,
    pub cwd: String,
    pub on_warn: WarningHandler,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn json_config_round_trips() {
        let warnings: Arc<Mutex<Vec<BuildError>>> = Arc::default();
        let sink = warnings.clone();
        let options = InputOptions::from_json(
            &json!({
                "external": ["lodash"],
                "moduleSideEffects": "no-external",
                "preserveSymlinks": true,
                "cwd": "/work"
            }),
            Arc::new(move |warning| sink.lock().unwrap().push(warning)),
        );
        assert!(options.external.matches("lodash", None, false));
        assert!(options.preserve_symlinks);
        assert_eq!(options.cwd, "/work");
        assert!(warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_options_warn_and_fall_back() {
        let warnings: Arc<Mutex<Vec<BuildError>>> = Arc::default();
        let sink = warnings.clone();
        let options = InputOptions::from_json(
            &json!({ "moduleSideEffects": "sometimes", "preserveSymlinks": 3 }),
            Arc::new(move |warning| sink.lock().unwrap().push(warning)),
        );
        let warnings = warnings.lock().unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.code() == "INVALID_OPTION"));
        // Fallback: the default policy keeps internals side-effectful.
        let normalized = options.normalize();
        assert!(normalized.side_effects.has_effects("/a.js", false));
    }
}
