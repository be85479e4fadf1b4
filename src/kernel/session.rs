//! Scoped handles over a module subsystem [`Backend`]
//!
//! Each guard owns exactly one backend handle and releases it when dropped,
//! so early returns and `?` never leak a reference.
use std::path::Path;

use log::debug;

use crate::backend::{Backend, ModuleFilter};
use crate::error::ModuleError;

/// An open connection to the module subsystem.
pub struct Session<'b, B: Backend> {
    backend: &'b B,
    ctx: B::Context,
}

impl<'b, B: Backend> Session<'b, B> {
    /// Open a session. Dropping it closes the connection.
    pub fn open(backend: &'b B) -> Result<Self, ModuleError> {
        let ctx = backend.new_context()?;
        debug!("module subsystem session opened");
        Ok(Session { backend, ctx })
    }

    fn scope(&self) -> Scope<'_, B> {
        Scope {
            backend: self.backend,
            ctx: &self.ctx,
        }
    }

    /// Every currently loaded module.
    pub fn loaded(&self) -> Result<ModuleList<'_, B>, ModuleError> {
        let raw = self.backend.new_from_loaded(&self.ctx)?;
        Ok(ModuleList::wrap(self.scope(), raw))
    }

    /// Candidates for a module name or alias, `None` if nothing matched.
    pub fn lookup(&self, name: &str) -> Result<Option<ModuleList<'_, B>>, ModuleError> {
        let raw = self.backend.new_from_lookup(&self.ctx, name)?;
        Ok(raw.map(|raw| ModuleList::wrap(self.scope(), raw)))
    }

    /// Read-only descriptor for a module image on disk.
    pub fn from_path(&self, path: &Path) -> Result<ModuleHandle<'_, B>, ModuleError> {
        let raw = self.backend.new_from_path(&self.ctx, path)?;
        Ok(ModuleHandle::wrap(self.scope(), raw))
    }

    pub fn filter(
        &self,
        list: &ModuleList<'_, B>,
        filter: ModuleFilter,
    ) -> Result<Option<ModuleList<'_, B>>, ModuleError> {
        let raw = self.backend.apply_filter(&self.ctx, filter, &list.raw)?;
        Ok(raw.map(|raw| ModuleList::wrap(self.scope(), raw)))
    }
}

impl<B: Backend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        self.backend.unref_context(&self.ctx);
        debug!("module subsystem session closed");
    }
}

/// Backend plus context, shared by every guard created from one session.
struct Scope<'s, B: Backend> {
    backend: &'s B,
    ctx: &'s B::Context,
}

impl<B: Backend> Clone for Scope<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for Scope<'_, B> {}

/// A list of module references owned by the subsystem.
pub struct ModuleList<'s, B: Backend> {
    scope: Scope<'s, B>,
    raw: B::List,
}

impl<'s, B: Backend> ModuleList<'s, B> {
    fn wrap(scope: Scope<'s, B>, raw: B::List) -> Self {
        ModuleList { scope, raw }
    }

    pub fn len(&self) -> usize {
        self.scope.backend.list_len(&self.raw)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the module at `index`.
    pub fn get(&self, index: usize) -> Option<ModuleHandle<'s, B>> {
        self.scope
            .backend
            .list_module(&self.raw, index)
            .map(|raw| ModuleHandle::wrap(self.scope, raw))
    }

    /// Acquire each entry in turn. Every yielded handle is independent of the
    /// list and must be dropped by the consumer.
    pub fn iter(&self) -> impl Iterator<Item = ModuleHandle<'s, B>> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

impl<B: Backend> Drop for ModuleList<'_, B> {
    fn drop(&mut self) {
        self.scope.backend.unref_list(&self.raw);
    }
}

/// A single module reference.
pub struct ModuleHandle<'s, B: Backend> {
    scope: Scope<'s, B>,
    raw: B::Module,
}

impl<'s, B: Backend> ModuleHandle<'s, B> {
    fn wrap(scope: Scope<'s, B>, raw: B::Module) -> Self {
        ModuleHandle { scope, raw }
    }

    pub fn name(&self) -> String {
        self.scope.backend.module_name(&self.raw)
    }

    pub fn size(&self) -> u64 {
        self.scope.backend.module_size(self.scope.ctx, &self.raw)
    }

    pub fn use_count(&self) -> u32 {
        self.scope.backend.module_refcnt(self.scope.ctx, &self.raw)
    }

    /// Modules holding a reference to this one, `None` if there are none.
    pub fn holders(&self) -> Option<ModuleList<'s, B>> {
        self.scope
            .backend
            .holders(self.scope.ctx, &self.raw)
            .map(|raw| ModuleList::wrap(self.scope, raw))
    }

    pub fn info(&self) -> Result<InfoList<'s, B>, ModuleError> {
        let raw = self.scope.backend.info(self.scope.ctx, &self.raw)?;
        Ok(InfoList {
            backend: self.scope.backend,
            raw,
        })
    }
}

impl<B: Backend> Drop for ModuleHandle<'_, B> {
    fn drop(&mut self) {
        self.scope.backend.unref_module(&self.raw);
    }
}

/// Raw `(key, value)` info records of one module.
pub struct InfoList<'s, B: Backend> {
    backend: &'s B,
    raw: B::InfoList,
}

impl<B: Backend> InfoList<'_, B> {
    pub fn len(&self) -> usize {
        self.backend.info_len(&self.raw)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        (0..self.len()).filter_map(move |index| self.backend.info_entry(&self.raw, index))
    }
}

impl<B: Backend> Drop for InfoList<'_, B> {
    fn drop(&mut self) {
        self.backend.unref_info(&self.raw);
    }
}
