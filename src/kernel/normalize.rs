//! Normalization of raw `modinfo` records into [`ModuleMetadata`]
use log::warn;

use crate::error::ModuleError;
use crate::kernel::{ModuleMetadata, ParamDescriptor};

/// Record key carrying `name:description` of a parameter.
pub const PARAM_DESCRIPTION_KEY: &str = "parm";
/// Record key carrying `name:type` of a parameter.
pub const PARAM_TYPE_KEY: &str = "parmtype";

const PARAM_SEPARATOR: char = ':';

/// A raw record after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoRecord<'a> {
    ParamDescription { param: &'a str, description: &'a str },
    ParamType { param: &'a str, param_type: &'a str },
    Generic { key: &'a str, value: &'a str },
}

impl<'a> InfoRecord<'a> {
    /// Classify a raw `(key, value)` pair.
    ///
    /// Parameter records must look like `name:rest`; `rest` may contain
    /// further separators.
    pub fn classify(key: &'a str, value: &'a str) -> Result<Self, String> {
        match key {
            PARAM_DESCRIPTION_KEY => {
                let (param, description) = split_param(value)?;
                Ok(InfoRecord::ParamDescription { param, description })
            }
            PARAM_TYPE_KEY => {
                let (param, param_type) = split_param(value)?;
                Ok(InfoRecord::ParamType { param, param_type })
            }
            _ => Ok(InfoRecord::Generic { key, value }),
        }
    }
}

fn split_param(value: &str) -> Result<(&str, &str), String> {
    match value.split_once(PARAM_SEPARATOR) {
        Some((param, rest)) if !param.is_empty() => Ok((param, rest)),
        Some(_) => Err(format!("empty parameter name in {:?}", value)),
        None => Err(format!("missing '{}' in {:?}", PARAM_SEPARATOR, value)),
    }
}

/// Incremental builder for [`ModuleMetadata`].
#[derive(Debug, Default)]
pub struct MetadataNormalizer {
    module: String,
    metadata: ModuleMetadata,
}

impl MetadataNormalizer {
    /// `module` only labels errors.
    pub fn new(module: &str) -> Self {
        MetadataNormalizer {
            module: module.to_string(),
            metadata: ModuleMetadata::default(),
        }
    }

    /// Fold one raw record in. A malformed parameter record is rejected and
    /// leaves the metadata untouched.
    pub fn push(&mut self, key: &str, value: &str) -> Result<(), ModuleError> {
        let record = InfoRecord::classify(key, value)
            .map_err(|reason| ModuleError::info_unavailable(&self.module, reason))?;

        match record {
            InfoRecord::ParamDescription { param, description } => {
                self.param(param).description = Some(description.to_string());
            }
            InfoRecord::ParamType { param, param_type } => {
                self.param(param).param_type = Some(param_type.to_string());
            }
            InfoRecord::Generic { key, value } => {
                self.metadata
                    .info
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        Ok(())
    }

    fn param(&mut self, name: &str) -> &mut ParamDescriptor {
        self.metadata.params.entry(name.to_string()).or_default()
    }

    pub fn finish(self) -> ModuleMetadata {
        self.metadata
    }
}

/// Normalize a full record stream, skipping malformed parameter records.
pub fn normalize<'a, I>(module: &str, records: I) -> ModuleMetadata
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut normalizer = MetadataNormalizer::new(module);
    for (key, value) in records {
        if let Err(e) = normalizer.push(key, value) {
            warn!("skipping record {}: {}", key, e);
        }
    }
    normalizer.finish()
}
