//! Compilation of user id-matching options into uniform predicates.

use std::{fmt, sync::Arc};

use oxpack_error::BuildError;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_json::Value;

/// User callback form of an id matcher. `None` means "no opinion" and is
/// treated as a non-match.
pub type IdPredicate = dyn Fn(&str, Option<&str>, bool) -> Option<bool> + Send + Sync;

/// One element of a pattern list.
#[derive(Debug, Clone)]
pub enum StringOrRegex {
    String(String),
    Regex(Regex),
}

/// A compiled `(id, importer, is_resolved) -> bool` matcher.
///
/// Synthetic ids (leading NUL byte) never reach a user predicate; the
/// predicate arm short-circuits to `false` for them. Literal and pattern
/// arms match whatever the user wrote, including NUL-prefixed literals.
#[derive(Clone, Default)]
pub enum IdFilter {
    #[default]
    None,
    All,
    Patterns {
        literals: FxHashSet<String>,
        patterns: Vec<Regex>,
    },
    Predicate(Arc<IdPredicate>),
}

impl IdFilter {
    pub fn from_bool(enabled: bool) -> Self {
        if enabled { Self::All } else { Self::None }
    }

    pub fn from_patterns(values: impl IntoIterator<Item = StringOrRegex>) -> Self {
        let mut literals = FxHashSet::default();
        let mut patterns = Vec::new();
        for value in values {
            match value {
                StringOrRegex::String(literal) => {
                    literals.insert(literal);
                }
                StringOrRegex::Regex(pattern) => patterns.push(pattern),
            }
        }
        Self::Patterns { literals, patterns }
    }

    pub fn from_predicate(
        predicate: impl Fn(&str, Option<&str>, bool) -> Option<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    /// Compile a JSON option value. Accepted shapes: a boolean, a single
    /// string, or an array of strings. Strings wrapped in `/` are
    /// compiled as regular expressions, everything else matches
    /// literally.
    pub fn from_json(value: &Value, option: &str) -> Result<Self, BuildError> {
        match value {
            Value::Null => Ok(Self::None),
            Value::Bool(enabled) => Ok(Self::from_bool(*enabled)),
            Value::String(single) => {
                Ok(Self::from_patterns([Self::parse_pattern(single, option)?]))
            }
            Value::Array(values) => {
                let mut patterns = Vec::with_capacity(values.len());
                for value in values {
                    let Value::String(text) = value else {
                        return Err(BuildError::invalid_option(
                            option,
                            "expected an array of strings",
                        ));
                    };
                    patterns.push(Self::parse_pattern(text, option)?);
                }
                Ok(Self::from_patterns(patterns))
            }
            _ => Err(BuildError::invalid_option(
                option,
                "expected a boolean, a string or an array of strings",
            )),
        }
    }

    fn parse_pattern(text: &str, option: &str) -> Result<StringOrRegex, BuildError> {
        if let Some(body) = text
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            && !body.is_empty()
        {
            let pattern = Regex::new(body)
                .map_err(|error| BuildError::invalid_option(option, error.to_string()))?;
            return Ok(StringOrRegex::Regex(pattern));
        }
        Ok(StringOrRegex::String(text.to_owned()))
    }

    pub fn matches(&self, id: &str, importer: Option<&str>, is_resolved: bool) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Patterns { literals, patterns } => {
                literals.contains(id) || patterns.iter().any(|pattern| pattern.is_match(id))
            }
            Self::Predicate(predicate) => {
                if id.starts_with('\0') {
                    return false;
                }
                predicate(id, importer, is_resolved) == Some(true)
            }
        }
    }
}

impl fmt::Debug for IdFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("IdFilter::None"),
            Self::All => f.write_str("IdFilter::All"),
            Self::Patterns { literals, patterns } => f
                .debug_struct("IdFilter::Patterns")
                .field("literals", literals)
                .field("patterns", &patterns.iter().map(Regex::as_str).collect::<Vec<_>>())
                .finish(),
            Self::Predicate(_) => f.write_str("IdFilter::Predicate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn boolean_filters_are_constant() {
        assert!(IdFilter::from_bool(true).matches("anything", None, false));
        assert!(!IdFilter::from_bool(false).matches("anything", None, false));
        assert!(!IdFilter::default().matches("anything", None, false));
    }

    #[test]
    fn pattern_lists_match_literals_and_regexes() {
        let filter = IdFilter::from_patterns([
            StringOrRegex::String("lodash".to_owned()),
            StringOrRegex::Regex(Regex::new("^@scope/").unwrap()),
        ]);
        assert!(filter.matches("lodash", None, false));
        assert!(filter.matches("@scope/pkg", None, false));
        assert!(!filter.matches("lodash-es", None, false));
    }

    #[test]
    fn predicates_never_see_synthetic_ids() {
        let filter = IdFilter::from_predicate(|id, _, _| {
            assert!(!id.starts_with('\0'));
            Some(true)
        });
        assert!(filter.matches("lodash", None, false));
        assert!(!filter.matches("\0virtual:x", None, false));
    }

    #[test]
    fn predicate_none_is_a_non_match() {
        let filter = IdFilter::from_predicate(|_, _, _| None);
        assert!(!filter.matches("lodash", None, false));
    }

    #[test]
    fn json_shapes_compile() {
        let filter = IdFilter::from_json(&json!(["lodash", "/^@scope\\//"]), "external").unwrap();
        assert!(filter.matches("lodash", None, false));
        assert!(filter.matches("@scope/pkg", None, false));
        assert!(IdFilter::from_json(&json!(true), "external")
            .unwrap()
            .matches("x", None, false));
    }

    #[test]
    fn invalid_json_is_reported() {
        let error = IdFilter::from_json(&json!(42), "external").unwrap_err();
        assert_eq!(error.code(), "INVALID_OPTION");
        let error = IdFilter::from_json(&json!([42]), "external").unwrap_err();
        assert_eq!(error.code(), "INVALID_OPTION");
    }
}
