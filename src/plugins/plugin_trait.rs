//! Plugin system trait for kmodinfo
use crate::backend::{ModuleSource, Snapshot};
use crate::error::AnalysisError;
use crate::kernel::{ModuleMetadata, ModuleRecord};

/// Analysis context that provides access to all necessary components
pub struct AnalysisContext<'a> {
    pub source: &'a ModuleSource,
}

/// Output from plugins - different types of data
pub enum PluginOutput {
    Modules(Vec<ModuleRecord>),
    Metadata {
        name: String,
        metadata: ModuleMetadata,
    },
    Snapshot(Snapshot),
}

/// Trait that all introspection plugins must implement
pub trait IntrospectionPlugin {
    /// Get the name of the plugin
    fn name(&self) -> &str;

    /// Get a description of what the plugin does
    fn description(&self) -> &str;

    /// Run the plugin with the provided analysis context
    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError>;
}
