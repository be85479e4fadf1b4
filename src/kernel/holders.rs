//! Holder resolution
use crate::backend::Backend;
use crate::kernel::session::ModuleList;

/// Names of the modules in a holder list, in the order the subsystem
/// presents them. Each holder reference is released before moving on; the
/// list itself stays with the caller.
pub fn holder_names<B: Backend>(holders: &ModuleList<'_, B>) -> Vec<String> {
    holders.iter().map(|holder| holder.name()).collect()
}
