//! JSON output formatter for kmodinfo
use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{ModuleMetadata, ModuleRecord};
use serde::Serialize;

#[derive(Serialize)]
struct OutputWrapper<'a, T: Serialize> {
    plugin: &'a str,
    timestamp: String,
    count: usize,
    results: T,
}

fn wrap<T: Serialize>(plugin: &str, count: usize, results: T) -> Result<String, AnalysisError> {
    let wrapper = OutputWrapper {
        plugin,
        timestamp: chrono::Utc::now().to_rfc3339(),
        count,
        results,
    };
    Ok(serde_json::to_string_pretty(&wrapper)?)
}

/// JSON formatter that outputs data in JSON format with metadata
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, AnalysisError> {
        wrap("lsmod", modules.len(), modules)
    }

    fn format_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<String, AnalysisError> {
        #[derive(Serialize)]
        struct Named<'a> {
            name: &'a str,
            #[serde(flatten)]
            metadata: &'a ModuleMetadata,
        }
        wrap("modinfo", 1, [Named { name, metadata }])
    }
}
