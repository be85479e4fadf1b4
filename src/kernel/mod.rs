//! Kernel module data model and the introspection pipeline
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ModuleError;

pub mod enumerator;
pub mod holders;
pub mod normalize;
pub mod resolver;
pub mod session;

pub use enumerator::Enumerator;
pub use normalize::{normalize, InfoRecord, MetadataNormalizer};
pub use session::Session;

/// Structure to hold one loaded kernel module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub name: String,
    pub size: u64,
    pub use_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub holders: Vec<String>,
    #[serde(skip_serializing_if = "ModuleRecord::no_info")]
    pub info: Option<ModuleMetadata>,
    /// Why metadata is missing when it was requested but could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ModuleError>,
}

impl ModuleRecord {
    fn no_info(info: &Option<ModuleMetadata>) -> bool {
        info.as_ref().map_or(true, ModuleMetadata::is_empty)
    }
}

/// Structured `modinfo` data of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// Generic records in arrival order, keyed by record name.
    pub info: BTreeMap<String, Vec<String>>,
    pub params: BTreeMap<String, ParamDescriptor>,
}

impl ModuleMetadata {
    pub fn is_empty(&self) -> bool {
        self.info.is_empty() && self.params.is_empty()
    }

    /// First value recorded for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.info
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Description and type of one module parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
}
