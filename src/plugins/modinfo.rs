//! Modinfo plugin - shows the metadata of one module
use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, IntrospectionPlugin, PluginOutput};

pub struct ModinfoPlugin {
    /// Module name, alias or path to a module image.
    pub target: String,
}

impl IntrospectionPlugin for ModinfoPlugin {
    fn name(&self) -> &str {
        "modinfo"
    }

    fn description(&self) -> &str {
        "Show information about a kernel module"
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let metadata = context.source.module_info(&self.target)?;
        Ok(PluginOutput::Metadata {
            name: self.target.clone(),
            metadata,
        })
    }
}
