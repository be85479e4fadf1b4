//! Text (table) output formatter for kmodinfo
use crate::error::AnalysisError;
use crate::formats::traits::OutputFormatter;
use crate::kernel::{ModuleMetadata, ModuleRecord, ParamDescriptor};
use prettytable::{Cell, Row, Table};

/// Text formatter that outputs data in a human-readable table format
pub struct TextFormatter;

/// `lsmod`'s "Used by" column: the count followed by the holder names.
pub fn used_by(module: &ModuleRecord) -> String {
    if module.holders.is_empty() {
        module.use_count.to_string()
    } else {
        format!("{} {}", module.use_count, module.holders.join(","))
    }
}

/// `modinfo`'s rendering of one parameter.
pub fn describe_param(name: &str, param: &ParamDescriptor) -> String {
    match (&param.description, &param.param_type) {
        (Some(desc), Some(ty)) => format!("{}:{} ({})", name, desc, ty),
        (Some(desc), None) => format!("{}:{}", name, desc),
        (None, Some(ty)) => format!("{}: ({})", name, ty),
        (None, None) => name.to_string(),
    }
}

impl OutputFormatter for TextFormatter {
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, AnalysisError> {
        let detailed = modules.iter().any(|m| m.info.is_some() || m.error.is_some());

        let mut table = Table::new();
        table.set_format(*prettytable::format::consts::FORMAT_CLEAN);

        // Header
        let mut header = vec![
            Cell::new("Module"),
            Cell::new("Size").style_spec("r"),
            Cell::new("Used by"),
        ];
        if detailed {
            header.push(Cell::new("Description"));
        }
        table.set_titles(Row::new(header));

        // Data rows
        for module in modules {
            let mut row = vec![
                Cell::new(&module.name),
                Cell::new(&module.size.to_string()).style_spec("r"),
                Cell::new(&used_by(module)),
            ];
            if detailed {
                let description = match (&module.info, &module.error) {
                    (_, Some(err)) => format!("! {}", err),
                    (Some(info), None) => info.first("description").unwrap_or("").to_string(),
                    (None, None) => String::new(),
                };
                row.push(Cell::new(&description));
            }
            table.add_row(Row::new(row));
        }

        Ok(table.to_string())
    }

    fn format_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<String, AnalysisError> {
        let mut output = format!("{:<16}{}\n", "name:", name);

        for (key, values) in &metadata.info {
            for value in values {
                output.push_str(&format!("{:<16}{}\n", format!("{}:", key), value));
            }
        }
        for (param, descriptor) in &metadata.params {
            output.push_str(&format!("{:<16}{}\n", "parm:", describe_param(param, descriptor)));
        }

        Ok(output)
    }
}
