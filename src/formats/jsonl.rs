//! JSONL (JSON Lines) output formatter for kmodinfo
use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{ModuleMetadata, ModuleRecord};

/// JSONL formatter that outputs data as JSON objects, one per line
pub struct JsonlFormatter;

impl OutputFormatter for JsonlFormatter {
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, AnalysisError> {
        let mut output = String::new();

        for module in modules {
            let line = serde_json::to_string(module)?;
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }

    fn format_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<String, AnalysisError> {
        let mut output = String::new();

        for (key, values) in &metadata.info {
            for value in values {
                let line = serde_json::json!({"name": name, "key": key, "value": value});
                output.push_str(&line.to_string());
                output.push('\n');
            }
        }
        for (param, descriptor) in &metadata.params {
            let line = serde_json::json!({"name": name, "param": param, "descriptor": descriptor});
            output.push_str(&line.to_string());
            output.push('\n');
        }

        Ok(output)
    }
}
