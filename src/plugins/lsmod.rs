//! Lsmod plugin - lists loaded kernel modules
use log::info;

use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, IntrospectionPlugin, PluginOutput};

pub struct LsmodPlugin {
    /// Attach normalized modinfo data to every record.
    pub with_info: bool,
}

impl IntrospectionPlugin for LsmodPlugin {
    fn name(&self) -> &str {
        "lsmod"
    }

    fn description(&self) -> &str {
        "List loaded kernel modules"
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        let modules = context.source.enumerate(self.with_info)?;
        let failed = modules.iter().filter(|m| m.error.is_some()).count();
        info!(
            "{} module(s) from {} source, {} without metadata",
            modules.len(),
            context.source.name(),
            failed
        );
        Ok(PluginOutput::Modules(modules))
    }
}
