//! Target resolution: module image path versus module name or alias
use std::fs;
use std::path::Path;

use log::debug;

use crate::backend::{Backend, ModuleFilter};
use crate::error::ModuleError;
use crate::kernel::session::{ModuleHandle, Session};

/// What a user-supplied name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// A module image on the local filesystem.
    Path(&'a Path),
    /// A module name or alias known to the subsystem.
    Name(&'a str),
}

impl<'a> Target<'a> {
    /// Existing regular files always win over names.
    pub fn classify(name: &'a str) -> Self {
        let path = Path::new(name);
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Target::Path(path),
            _ => Target::Name(name),
        }
    }
}

/// Resolve `name` to the module handles whose metadata should be read.
///
/// Built-in modules are excluded from name lookups. The handles come back in
/// the order the subsystem lists the candidates.
pub fn resolve<'s, B: Backend>(
    session: &'s Session<'_, B>,
    name: &str,
) -> Result<Vec<ModuleHandle<'s, B>>, ModuleError> {
    match Target::classify(name) {
        Target::Path(path) => {
            debug!("{} is a module image path", name);
            let module = session.from_path(path).map_err(|e| {
                debug!("could not open module image {}: {}", name, e);
                ModuleError::ModuleNotFound(name.to_string())
            })?;
            Ok(vec![module])
        }
        Target::Name(name) => resolve_name(session, name),
    }
}

fn resolve_name<'s, B: Backend>(
    session: &'s Session<'_, B>,
    name: &str,
) -> Result<Vec<ModuleHandle<'s, B>>, ModuleError> {
    let candidates = session
        .lookup(name)
        .map_err(|e| {
            debug!("lookup of {} failed: {}", name, e);
            ModuleError::AliasNotFound(name.to_string())
        })?
        .filter(|list| !list.is_empty())
        .ok_or_else(|| ModuleError::AliasNotFound(name.to_string()))?;

    let filtered = session.filter(&candidates, ModuleFilter::Builtin);
    drop(candidates);

    let filtered = filtered
        .map_err(|e| {
            debug!("builtin filter for {} failed: {}", name, e);
            ModuleError::FilterFailed(name.to_string())
        })?
        .filter(|list| !list.is_empty())
        .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))?;

    let handles: Vec<_> = filtered.iter().collect();
    debug!("{} resolved to {} candidate(s)", name, handles.len());
    Ok(handles)
}
