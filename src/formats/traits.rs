//! Output format traits for kmodinfo
use crate::error::AnalysisError;
use crate::kernel::{ModuleMetadata, ModuleRecord};

/// Trait for output formatters
pub trait OutputFormatter: Send + Sync {
    fn format_modules(&self, modules: &[ModuleRecord]) -> Result<String, AnalysisError>;
    fn format_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<String, AnalysisError>;
}

/// Enum for output format types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Enum for output destination
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Stdout,
    File(std::path::PathBuf),
}

/// Output writer that combines format and destination
pub struct OutputWriter {
    formatter: Box<dyn OutputFormatter>,
    destination: OutputDestination,
}

impl OutputWriter {
    /// Create a new output writer
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        let formatter: Box<dyn OutputFormatter> = match format {
            OutputFormat::Text => Box::new(crate::formats::text::TextFormatter),
            OutputFormat::Csv => Box::new(crate::formats::csv::CsvFormatter),
            OutputFormat::Json => Box::new(crate::formats::json::JsonFormatter),
            OutputFormat::Jsonl => Box::new(crate::formats::jsonl::JsonlFormatter),
        };

        Self {
            formatter,
            destination,
        }
    }

    /// Write module records to the configured destination
    pub fn write_modules(&self, modules: &[ModuleRecord]) -> Result<(), AnalysisError> {
        let content = self.formatter.format_modules(modules)?;
        self.emit(&content)
    }

    /// Write the metadata of one module to the configured destination
    pub fn write_metadata(&self, name: &str, metadata: &ModuleMetadata) -> Result<(), AnalysisError> {
        let content = self.formatter.format_metadata(name, metadata)?;
        self.emit(&content)
    }

    /// Write pre-rendered content as is
    pub fn write_raw(&self, content: &str) -> Result<(), AnalysisError> {
        self.emit(content)
    }

    fn emit(&self, content: &str) -> Result<(), AnalysisError> {
        match &self.destination {
            OutputDestination::Stdout => {
                println!("{}", content.trim_end_matches('\n'));
            }
            OutputDestination::File(path) => {
                std::fs::write(path, content)?;
            }
        }
        Ok(())
    }
}
