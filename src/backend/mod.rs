//! Kernel module subsystem backends
//!
//! The introspection pipeline talks to the module subsystem only through the
//! [`Backend`] trait. Every operation that hands out a handle has a matching
//! release operation; callers are expected to go through the guards in
//! [`crate::kernel::session`] rather than invoking the release functions
//! themselves. A released handle is never touched again.
use std::path::Path;

use crate::error::ModuleError;
use crate::kernel::{Enumerator, ModuleMetadata, ModuleRecord};

pub mod alias;
pub mod image;
pub mod snapshot;
pub mod sysfs;

pub use snapshot::{Snapshot, SnapshotBackend};
pub use sysfs::{SysfsBackend, SysfsConfig};

/// Filters that can be applied to a candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFilter {
    /// Drop modules compiled into the kernel image.
    Builtin,
}

/// Low-level view of the kernel module subsystem.
pub trait Backend {
    type Context;
    type Module;
    type List;
    type InfoList;

    fn new_context(&self) -> Result<Self::Context, ModuleError>;
    fn unref_context(&self, ctx: &Self::Context);

    /// All currently loaded modules, in the order the kernel reports them.
    fn new_from_loaded(&self, ctx: &Self::Context) -> Result<Self::List, ModuleError>;

    /// Resolve a module name or alias. `Ok(None)` means no candidates.
    fn new_from_lookup(
        &self,
        ctx: &Self::Context,
        name: &str,
    ) -> Result<Option<Self::List>, ModuleError>;

    /// Descriptor for a module image on disk. Does not load anything.
    fn new_from_path(&self, ctx: &Self::Context, path: &Path)
        -> Result<Self::Module, ModuleError>;

    /// Returns a new list; `list` itself is left untouched.
    fn apply_filter(
        &self,
        ctx: &Self::Context,
        filter: ModuleFilter,
        list: &Self::List,
    ) -> Result<Option<Self::List>, ModuleError>;

    fn list_len(&self, list: &Self::List) -> usize;

    /// Acquires a reference to the module at `index`.
    fn list_module(&self, list: &Self::List, index: usize) -> Option<Self::Module>;
    fn unref_list(&self, list: &Self::List);

    fn module_name(&self, module: &Self::Module) -> String;
    fn module_size(&self, ctx: &Self::Context, module: &Self::Module) -> u64;
    fn module_refcnt(&self, ctx: &Self::Context, module: &Self::Module) -> u32;

    /// Modules holding a reference to `module`. `None` when there are none.
    fn holders(&self, ctx: &Self::Context, module: &Self::Module) -> Option<Self::List>;
    fn unref_module(&self, module: &Self::Module);

    fn info(&self, ctx: &Self::Context, module: &Self::Module)
        -> Result<Self::InfoList, ModuleError>;
    fn info_len(&self, info: &Self::InfoList) -> usize;
    fn info_entry<'i>(&self, info: &'i Self::InfoList, index: usize)
        -> Option<(&'i str, &'i str)>;
    fn unref_info(&self, info: &Self::InfoList);
}

/// The backend chosen at runtime by the binary.
pub enum ModuleSource {
    Live(SysfsBackend),
    Snapshot(SnapshotBackend),
}

impl ModuleSource {
    pub fn name(&self) -> &str {
        match self {
            ModuleSource::Live(_) => "live",
            ModuleSource::Snapshot(_) => "snapshot",
        }
    }

    pub fn enumerate(&self, include_metadata: bool) -> Result<Vec<ModuleRecord>, ModuleError> {
        match self {
            ModuleSource::Live(backend) => Enumerator::new(backend).enumerate(include_metadata),
            ModuleSource::Snapshot(backend) => Enumerator::new(backend).enumerate(include_metadata),
        }
    }

    pub fn module_info(&self, name: &str) -> Result<ModuleMetadata, ModuleError> {
        match self {
            ModuleSource::Live(backend) => Enumerator::new(backend).module_info(name),
            ModuleSource::Snapshot(backend) => Enumerator::new(backend).module_info(name),
        }
    }

    pub fn capture(&self) -> Result<Snapshot, ModuleError> {
        match self {
            ModuleSource::Live(backend) => Snapshot::capture(backend),
            ModuleSource::Snapshot(backend) => Snapshot::capture(backend),
        }
    }
}
