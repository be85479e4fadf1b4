//! CSV output formatter for kmodinfo
use crate::error::AnalysisError;
use crate::formats::text::describe_param;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{ModuleMetadata, ModuleRecord};
use csv::Writer;

/// CSV formatter that outputs data in comma-separated values format
pub struct CsvFormatter;

impl OutputFormatter for CsvFormatter {
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, AnalysisError> {
        let mut wtr = Writer::from_writer(vec![]);

        // Write header
        wtr.write_record(["name", "size", "use_count", "holders", "description", "error"])?;

        // Write data rows
        for module in modules {
            let description = module
                .info
                .as_ref()
                .and_then(|info| info.first("description"))
                .unwrap_or("");
            let error = module
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            let size = module.size.to_string();
            let use_count = module.use_count.to_string();
            let holders = module.holders.join(",");
            wtr.write_record([
                module.name.as_str(),
                size.as_str(),
                use_count.as_str(),
                holders.as_str(),
                description,
                error.as_str(),
            ])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }

    fn format_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<String, AnalysisError> {
        let mut wtr = Writer::from_writer(vec![]);

        wtr.write_record(["name", "key", "value"])?;
        for (key, values) in &metadata.info {
            for value in values {
                wtr.write_record([name, key.as_str(), value.as_str()])?;
            }
        }
        for (param, descriptor) in &metadata.params {
            let rendered = describe_param(param, descriptor);
            wtr.write_record([name, "parm", rendered.as_str()])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }
}
