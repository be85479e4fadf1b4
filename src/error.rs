//! Custom error types for the application
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failures of the module introspection pipeline.
///
/// `ContextUnavailable` and `EnumerationFailed` abort a whole query. The
/// remaining kinds are local to a single module lookup and end up attached
/// to the record they concern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("could not obtain kmod context: {0}")]
    ContextUnavailable(String),

    #[error("could not get list of modules: {0}")]
    EnumerationFailed(String),

    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("module alias {0} not found")]
    AliasNotFound(String),

    #[error("failed to filter candidates for {0}")]
    FilterFailed(String),

    #[error("could not get modinfo for {module}: {reason}")]
    InfoUnavailable { module: String, reason: String },
}

impl ModuleError {
    /// Whether this error aborts the enumeration as a whole.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ModuleError::ContextUnavailable(_) | ModuleError::EnumerationFailed(_)
        )
    }

    /// Stable tag used in serialized output.
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleError::ContextUnavailable(_) => "contextUnavailable",
            ModuleError::EnumerationFailed(_) => "enumerationFailed",
            ModuleError::ModuleNotFound(_) => "moduleNotFound",
            ModuleError::AliasNotFound(_) => "aliasNotFound",
            ModuleError::FilterFailed(_) => "filterFailed",
            ModuleError::InfoUnavailable { .. } => "infoUnavailable",
        }
    }

    pub(crate) fn info_unavailable(module: &str, reason: impl ToString) -> Self {
        ModuleError::InfoUnavailable {
            module: module.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Serialize for ModuleError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ModuleError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Application-level errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("CSV into_inner error: {0}")]
    CsvIntoInnerError(#[from] csv::IntoInnerError<csv::Writer<Vec<u8>>>),

    #[error("UTF-8 conversion error: {0}")]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}
