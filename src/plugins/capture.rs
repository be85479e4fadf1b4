//! Capture plugin - records the module inventory as a replayable snapshot
use crate::error::AnalysisError;
use crate::plugins::plugin_trait::{AnalysisContext, IntrospectionPlugin, PluginOutput};

pub struct CapturePlugin;

impl IntrospectionPlugin for CapturePlugin {
    fn name(&self) -> &str {
        "capture"
    }

    fn description(&self) -> &str {
        "Capture loaded modules as a JSON snapshot"
    }

    fn run(&self, context: &AnalysisContext) -> Result<PluginOutput, AnalysisError> {
        Ok(PluginOutput::Snapshot(context.source.capture()?))
    }
}
