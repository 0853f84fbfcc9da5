//! Build diagnostics for the module loader.
//!
//! Every diagnostic carries a stable machine-readable code next to its
//! human-readable message. Consumers match on [`BuildError::code`]; the
//! message text is not part of the contract. The same type is used for
//! fatal errors and for warnings routed through the host's warning
//! handler.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

/// The concrete diagnostic payload.
///
/// `Clone` is required so an error can be broadcast through a shared
/// batch future to every awaiter; all payloads are plain strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("Error loading \"{id}\": the loader did not return usable code.")]
    BadLoader { id: String },

    #[error(
        "Cannot assign \"{id}\" to the \"{alias}\" chunk because it is already in the \
         \"{existing}\" chunk."
    )]
    CannotAssignModuleToChunk {
        id: String,
        alias: String,
        existing: String,
    },

    #[error("Entry module \"{id}\" cannot be external.")]
    EntryCannotBeExternal { id: String },

    #[error("External module \"{id}\" cannot have synthetic named exports enabled.")]
    ExternalSyntheticExports { id: String },

    #[error(
        "\"{id}\" is imported as an external module by \"{importer}\", but is already loaded as \
         an internal module."
    )]
    InternalIdCannotBeExternal { id: String, importer: String },

    #[error("Invalid value for option \"{option}\": {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Could not load \"{id}\"{imported_by}: {message}")]
    Load {
        id: String,
        /// Pre-rendered ` (imported by <x>)` fragment, empty for entries.
        imported_by: String,
        message: String,
    },

    #[error(
        "Conflicting namespaces: \"{module}\" re-exports \"{name}\" from both \"{first}\" and \
         \"{second}\" (will be ignored)."
    )]
    NamespaceConflict {
        name: String,
        module: String,
        first: String,
        second: String,
    },

    #[error("Could not resolve entry module \"{id}\".")]
    UnresolvedEntry { id: String },

    #[error("Could not resolve \"{specifier}\" from \"{importer}\".")]
    UnresolvedImport { specifier: String, importer: String },

    #[error(
        "\"{specifier}\" is imported by \"{importer}\", but could not be resolved – treating it \
         as an external dependency."
    )]
    UnresolvedImportTreatedAsExternal { specifier: String, importer: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    kind: ErrorKind,
    contexts: Vec<String>,
}

impl BuildError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            contexts: Vec::new(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The stable code consumers match on.
    pub fn code(&self) -> &'static str {
        match &self.kind {
            ErrorKind::BadLoader { .. } => "BAD_LOADER",
            ErrorKind::CannotAssignModuleToChunk { .. } => "CANNOT_ASSIGN_MODULE_TO_CHUNK",
            ErrorKind::EntryCannotBeExternal { .. } => "ENTRY_CANNOT_BE_EXTERNAL",
            ErrorKind::ExternalSyntheticExports { .. } => "EXTERNAL_SYNTHETIC_EXPORTS",
            ErrorKind::InternalIdCannotBeExternal { .. } => "INTERNAL_ID_CANNOT_BE_EXTERNAL",
            ErrorKind::InvalidOption { .. } => "INVALID_OPTION",
            ErrorKind::Load { .. } => "LOAD_ERROR",
            ErrorKind::NamespaceConflict { .. } => "NAMESPACE_CONFLICT",
            ErrorKind::UnresolvedEntry { .. } => "UNRESOLVED_ENTRY",
            ErrorKind::UnresolvedImport { .. } => "UNRESOLVED_IMPORT",
            ErrorKind::UnresolvedImportTreatedAsExternal { .. } => {
                "UNRESOLVED_IMPORT_TREATED_AS_EXTERNAL"
            }
        }
    }

    /// Attach a free-form context line to the diagnostic.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.contexts.push(context.into());
        self
    }

    pub fn bad_loader(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadLoader { id: id.into() })
    }

    pub fn cannot_assign_module_to_chunk(
        id: impl Into<String>,
        alias: impl Into<String>,
        existing: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::CannotAssignModuleToChunk {
            id: id.into(),
            alias: alias.into(),
            existing: existing.into(),
        })
    }

    pub fn entry_cannot_be_external(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::EntryCannotBeExternal { id: id.into() })
    }

    pub fn external_synthetic_exports(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalSyntheticExports { id: id.into() })
    }

    pub fn internal_id_cannot_be_external(
        id: impl Into<String>,
        importer: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::InternalIdCannotBeExternal {
            id: id.into(),
            importer: importer.into(),
        })
    }

    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        })
    }

    pub fn load_failed(
        id: impl Into<String>,
        imported_by: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Load {
            id: id.into(),
            imported_by: imported_by
                .map(|importer| format!(" (imported by \"{importer}\")"))
                .unwrap_or_default(),
            message: message.into(),
        })
    }

    pub fn namespace_conflict(
        name: impl Into<String>,
        module: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::NamespaceConflict {
            name: name.into(),
            module: module.into(),
            first: first.into(),
            second: second.into(),
        })
    }

    pub fn unresolved_entry(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedEntry { id: id.into() })
    }

    pub fn unresolved_import(specifier: impl Into<String>, importer: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedImport {
            specifier: specifier.into(),
            importer: importer.into(),
        })
    }

    pub fn unresolved_import_treated_as_external(
        specifier: impl Into<String>,
        importer: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::UnresolvedImportTreatedAsExternal {
            specifier: specifier.into(),
            importer: importer.into(),
        })
    }
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for context in &self.contexts {
            write!(f, "\n  at {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}

impl From<ErrorKind> for BuildError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
