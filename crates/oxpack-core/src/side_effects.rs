//! The module side-effect oracle used for tree-shaking metadata.

use std::{fmt, sync::Arc};

use oxpack_error::BuildError;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::filter::IdFilter;

/// User callback form. `None` means "no opinion"; anything but an
/// explicit `Some(false)` keeps the module side-effectful.
pub type SideEffectsPredicate = dyn Fn(&str, bool) -> Option<bool> + Send + Sync;

/// The raw `moduleSideEffects` option.
#[derive(Clone, Default)]
pub enum ModuleSideEffectsOption {
    /// Not configured: internals have side effects, externals defer to
    /// the `pureExternalModules` matcher.
    #[default]
    Auto,
    Constant(bool),
    /// The `"no-external"` shorthand.
    NoExternal,
    Predicate(Arc<SideEffectsPredicate>),
    /// Only the listed ids have side effects.
    ListedIds(FxHashSet<String>),
}

impl ModuleSideEffectsOption {
    pub fn from_predicate(
        predicate: impl Fn(&str, bool) -> Option<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self::ListedIds(ids.into_iter().collect())
    }

    /// Compile a JSON option value: a boolean, the string
    /// `"no-external"`, or an array of module ids.
    pub fn from_json(value: &Value) -> Result<Self, BuildError> {
        const OPTION: &str = "moduleSideEffects";
        match value {
            Value::Null => Ok(Self::Auto),
            Value::Bool(constant) => Ok(Self::Constant(*constant)),
            Value::String(text) if text == "no-external" => Ok(Self::NoExternal),
            Value::Array(values) => {
                let mut ids = FxHashSet::default();
                for value in values {
                    let Value::String(id) = value else {
                        return Err(BuildError::invalid_option(
                            OPTION,
                            "expected an array of module ids",
                        ));
                    };
                    ids.insert(id.clone());
                }
                Ok(Self::ListedIds(ids))
            }
            _ => Err(BuildError::invalid_option(
                OPTION,
                "expected a boolean, \"no-external\" or an array of module ids",
            )),
        }
    }
}

impl fmt::Debug for ModuleSideEffectsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("Auto"),
            Self::Constant(constant) => write!(f, "Constant({constant})"),
            Self::NoExternal => f.write_str("NoExternal"),
            Self::Predicate(_) => f.write_str("Predicate"),
            Self::ListedIds(ids) => f.debug_tuple("ListedIds").field(ids).finish(),
        }
    }
}

/// The compiled `(id, external) -> bool` oracle.
#[derive(Debug, Clone)]
pub struct SideEffectsPolicy {
    option: ModuleSideEffectsOption,
    pure_externals: IdFilter,
}

impl SideEffectsPolicy {
    pub fn new(option: ModuleSideEffectsOption, pure_externals: IdFilter) -> Self {
        Self {
            option,
            pure_externals,
        }
    }

    pub fn has_effects(&self, id: &str, external: bool) -> bool {
        match &self.option {
            ModuleSideEffectsOption::Auto => {
                !(external && self.pure_externals.matches(id, None, false))
            }
            ModuleSideEffectsOption::Constant(constant) => *constant,
            ModuleSideEffectsOption::NoExternal => !external,
            ModuleSideEffectsOption::Predicate(predicate) => {
                // Synthetic modules are pessimistically side-effectful.
                if id.starts_with('\0') {
                    return true;
                }
                predicate(id, external) != Some(false)
            }
            ModuleSideEffectsOption::ListedIds(ids) => ids.contains(id),
        }
    }
}
