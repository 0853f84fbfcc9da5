//! The transformer collaborator contract.
//!
//! Running the sequential transform pipeline and parsing the result is
//! the transformer's business; the loader only guarantees it is invoked
//! at most once per module body.

use async_trait::async_trait;
use oxpack_error::BuildResult;
use serde::{Deserialize, Serialize};

use crate::{
    module::{DynamicImportArgument, ModuleId},
    plugin::SourceDescription,
};

/// The parsed body of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedModule {
    pub code: String,
    pub map: Option<String>,
    /// Static import specifiers, in source order.
    pub sources: Vec<String>,
    pub dynamic_imports: Vec<DynamicImportArgument>,
    /// Specifiers of `export * from` statements.
    pub export_all_sources: Vec<String>,
    /// Names declared by the module itself.
    pub exports: Vec<String>,
    pub module_side_effects: Option<bool>,
    pub synthetic_named_exports: Option<bool>,
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        desc: SourceDescription,
        id: &ModuleId,
    ) -> BuildResult<ParsedModule>;
}
