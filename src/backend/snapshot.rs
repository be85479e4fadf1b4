//! In-memory module subsystem backed by a JSON snapshot
//!
//! A snapshot is a captured module inventory that can be analysed away from
//! the machine it came from. The backend also keeps an exact tally of handle
//! traffic, which makes it the reference fake for exercising the pipeline.
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, ModuleFilter};
use crate::error::{AnalysisError, ModuleError};
use crate::kernel::holders::holder_names;
use crate::kernel::resolver::resolve;
use crate::kernel::Session;

/// A module as recorded in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotModule {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub use_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holders: Vec<String>,
    /// Raw `(key, value)` info records in their original order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub builtin: bool,
    /// Reading info for this module fails with this reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_error: Option<String>,
    /// Kind of the recorded failure.
    #[serde(default, skip_serializing_if = "FailureKind::is_info_unavailable")]
    pub info_error_kind: FailureKind,
}

/// Per-module failure kinds a snapshot can replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    ModuleNotFound,
    AliasNotFound,
    FilterFailed,
    #[default]
    InfoUnavailable,
}

impl FailureKind {
    fn is_info_unavailable(&self) -> bool {
        *self == FailureKind::InfoUnavailable
    }

    /// Split a failure into its kind and the text needed to rebuild it.
    fn record(error: ModuleError) -> (Self, String) {
        match error {
            ModuleError::ModuleNotFound(name) => (FailureKind::ModuleNotFound, name),
            ModuleError::AliasNotFound(name) => (FailureKind::AliasNotFound, name),
            ModuleError::FilterFailed(name) => (FailureKind::FilterFailed, name),
            ModuleError::InfoUnavailable { reason, .. } => (FailureKind::InfoUnavailable, reason),
            fatal => (FailureKind::InfoUnavailable, fatal.to_string()),
        }
    }

    fn replay(self, module: &str, detail: &str) -> ModuleError {
        match self {
            FailureKind::ModuleNotFound => ModuleError::ModuleNotFound(detail.to_string()),
            FailureKind::AliasNotFound => ModuleError::AliasNotFound(detail.to_string()),
            FailureKind::FilterFailed => ModuleError::FilterFailed(detail.to_string()),
            FailureKind::InfoUnavailable => ModuleError::info_unavailable(module, detail),
        }
    }
}

impl SnapshotModule {
    pub fn loaded(name: &str, size: u64, use_count: u32) -> Self {
        SnapshotModule {
            name: name.to_string(),
            size,
            use_count,
            ..SnapshotModule::default()
        }
    }

    pub fn available(name: &str) -> Self {
        SnapshotModule::loaded(name, 0, 0)
    }

    pub fn builtin(name: &str) -> Self {
        SnapshotModule {
            builtin: true,
            ..SnapshotModule::available(name)
        }
    }

    pub fn with_holders(mut self, holders: &[&str]) -> Self {
        self.holders = holders.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn with_info(mut self, info: &[(&str, &str)]) -> Self {
        self.info = info
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_info_error(mut self, reason: &str) -> Self {
        self.info_error = Some(reason.to_string());
        self
    }

    pub fn with_failure(mut self, kind: FailureKind, detail: &str) -> Self {
        self.info_error = Some(detail.to_string());
        self.info_error_kind = kind;
        self
    }
}

/// Injected failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faults {
    #[serde(default)]
    pub fail_context: bool,
    #[serde(default)]
    pub fail_loaded: bool,
    #[serde(default)]
    pub fail_lookup: bool,
    #[serde(default)]
    pub fail_filter: bool,
}

impl Faults {
    fn is_none(&self) -> bool {
        *self == Faults::default()
    }
}

/// Captured module inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Loaded modules, most recently loaded first.
    #[serde(default)]
    pub loaded: Vec<SnapshotModule>,
    /// Modules installed but not necessarily loaded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<SnapshotModule>,
    /// Alias to module names.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Module images by path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, SnapshotModule>,
    #[serde(default, skip_serializing_if = "Faults::is_none")]
    pub faults: Faults,
}

impl Snapshot {
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::SnapshotError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Snapshot::from_json(&json)
    }

    /// Record the loaded modules of `backend`, raw info records included.
    ///
    /// A module whose metadata lookup fails keeps the failure kind and detail;
    /// replaying the snapshot reports the same error for it.
    pub fn capture<B: Backend>(backend: &B) -> Result<Self, ModuleError> {
        let session = Session::open(backend)?;
        let loaded = session.loaded()?;

        let mut modules = Vec::with_capacity(loaded.len());
        for module in loaded.iter() {
            let mut entry = SnapshotModule::loaded(&module.name(), module.size(), module.use_count());
            if let Some(holders) = module.holders() {
                entry.holders = holder_names(&holders);
            }
            match capture_info(&session, &entry.name) {
                Ok(info) => entry.info = info,
                Err(e) => {
                    let (kind, detail) = FailureKind::record(e);
                    entry = entry.with_failure(kind, &detail);
                }
            }
            modules.push(entry);
        }

        Ok(Snapshot {
            loaded: modules,
            ..Snapshot::default()
        })
    }
}

fn capture_info<B: Backend>(
    session: &Session<'_, B>,
    name: &str,
) -> Result<Vec<(String, String)>, ModuleError> {
    let mut result = Err(ModuleError::ModuleNotFound(name.to_string()));
    for module in resolve(session, name)? {
        result = module.info().map(|info| {
            info.records()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        });
    }
    result
}

#[derive(Debug, Default)]
struct Counter {
    acquired: Cell<usize>,
    released: Cell<usize>,
}

impl Counter {
    fn acquire(&self) {
        self.acquired.set(self.acquired.get() + 1);
    }

    fn release(&self) {
        self.released.set(self.released.get() + 1);
    }

    fn outstanding(&self) -> usize {
        self.acquired.get().saturating_sub(self.released.get())
    }
}

/// How often the resolution entry points were used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lookup: usize,
    pub from_path: usize,
    pub filter: usize,
    pub info: usize,
}

/// Session context of a [`SnapshotBackend`].
#[derive(Debug)]
pub struct SnapshotContext;

/// [`Backend`] over a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBackend {
    snapshot: Snapshot,
    contexts: Counter,
    lists: Counter,
    modules: Counter,
    infos: Counter,
    calls: Cell<CallCounts>,
}

impl SnapshotBackend {
    pub fn new(snapshot: Snapshot) -> Self {
        SnapshotBackend {
            snapshot,
            ..SnapshotBackend::default()
        }
    }

    /// Handles acquired but not yet released, across all kinds.
    pub fn outstanding(&self) -> usize {
        self.contexts.outstanding()
            + self.lists.outstanding()
            + self.modules.outstanding()
            + self.infos.outstanding()
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.contexts.acquired.get()
    }

    pub fn calls(&self) -> CallCounts {
        self.calls.get()
    }

    fn count(&self, bump: impl FnOnce(&mut CallCounts)) {
        let mut calls = self.calls.get();
        bump(&mut calls);
        self.calls.set(calls);
    }

    fn find(&self, name: &str) -> Option<&SnapshotModule> {
        self.snapshot
            .available
            .iter()
            .chain(self.snapshot.loaded.iter())
            .find(|m| m.name == name)
    }

    fn new_list(&self, modules: Vec<SnapshotModule>) -> Vec<SnapshotModule> {
        self.lists.acquire();
        modules
    }
}

impl Backend for SnapshotBackend {
    type Context = SnapshotContext;
    type Module = SnapshotModule;
    type List = Vec<SnapshotModule>;
    type InfoList = Vec<(String, String)>;

    fn new_context(&self) -> Result<SnapshotContext, ModuleError> {
        if self.snapshot.faults.fail_context {
            return Err(ModuleError::ContextUnavailable(
                "snapshot context disabled".to_string(),
            ));
        }
        self.contexts.acquire();
        Ok(SnapshotContext)
    }

    fn unref_context(&self, _ctx: &SnapshotContext) {
        self.contexts.release();
    }

    fn new_from_loaded(&self, _ctx: &SnapshotContext) -> Result<Self::List, ModuleError> {
        if self.snapshot.faults.fail_loaded {
            return Err(ModuleError::EnumerationFailed(
                "snapshot module list disabled".to_string(),
            ));
        }
        Ok(self.new_list(self.snapshot.loaded.clone()))
    }

    fn new_from_lookup(
        &self,
        _ctx: &SnapshotContext,
        name: &str,
    ) -> Result<Option<Self::List>, ModuleError> {
        self.count(|c| c.lookup += 1);
        if self.snapshot.faults.fail_lookup {
            return Err(ModuleError::AliasNotFound(name.to_string()));
        }

        let candidates: Vec<SnapshotModule> = match self.find(name) {
            Some(module) => vec![module.clone()],
            None => self
                .snapshot
                .aliases
                .get(name)
                .map(|targets| {
                    targets
                        .iter()
                        .filter_map(|target| self.find(target).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        };
        debug!("snapshot lookup {} -> {} candidate(s)", name, candidates.len());

        if candidates.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.new_list(candidates)))
        }
    }

    fn new_from_path(
        &self,
        _ctx: &SnapshotContext,
        path: &Path,
    ) -> Result<SnapshotModule, ModuleError> {
        self.count(|c| c.from_path += 1);
        let key = path.to_string_lossy();
        let module = self
            .snapshot
            .images
            .get(key.as_ref())
            .cloned()
            .ok_or_else(|| ModuleError::ModuleNotFound(key.to_string()))?;
        self.modules.acquire();
        Ok(module)
    }

    fn apply_filter(
        &self,
        _ctx: &SnapshotContext,
        filter: ModuleFilter,
        list: &Self::List,
    ) -> Result<Option<Self::List>, ModuleError> {
        self.count(|c| c.filter += 1);
        if self.snapshot.faults.fail_filter {
            return Err(ModuleError::FilterFailed(format!("{:?}", filter)));
        }
        let kept: Vec<SnapshotModule> = match filter {
            ModuleFilter::Builtin => list.iter().filter(|m| !m.builtin).cloned().collect(),
        };
        if kept.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.new_list(kept)))
        }
    }

    fn list_len(&self, list: &Self::List) -> usize {
        list.len()
    }

    fn list_module(&self, list: &Self::List, index: usize) -> Option<SnapshotModule> {
        let module = list.get(index).cloned()?;
        self.modules.acquire();
        Some(module)
    }

    fn unref_list(&self, _list: &Self::List) {
        self.lists.release();
    }

    fn module_name(&self, module: &SnapshotModule) -> String {
        module.name.clone()
    }

    fn module_size(&self, _ctx: &SnapshotContext, module: &SnapshotModule) -> u64 {
        module.size
    }

    fn module_refcnt(&self, _ctx: &SnapshotContext, module: &SnapshotModule) -> u32 {
        module.use_count
    }

    fn holders(&self, _ctx: &SnapshotContext, module: &SnapshotModule) -> Option<Self::List> {
        if module.holders.is_empty() {
            return None;
        }
        let holders = module
            .holders
            .iter()
            .map(|name| {
                self.find(name)
                    .cloned()
                    .unwrap_or_else(|| SnapshotModule::available(name))
            })
            .collect();
        Some(self.new_list(holders))
    }

    fn unref_module(&self, _module: &SnapshotModule) {
        self.modules.release();
    }

    fn info(
        &self,
        _ctx: &SnapshotContext,
        module: &SnapshotModule,
    ) -> Result<Self::InfoList, ModuleError> {
        self.count(|c| c.info += 1);
        if let Some(detail) = &module.info_error {
            return Err(module.info_error_kind.replay(&module.name, detail));
        }
        self.infos.acquire();
        Ok(module.info.clone())
    }

    fn info_len(&self, info: &Self::InfoList) -> usize {
        info.len()
    }

    fn info_entry<'i>(&self, info: &'i Self::InfoList, index: usize) -> Option<(&'i str, &'i str)> {
        info.get(index).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn unref_info(&self, _info: &Self::InfoList) {
        self.infos.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Enumerator;

    const SNAPSHOT: &str = r#"{
        "loaded": [
            {"name": "foo", "size": 12288, "useCount": 2, "holders": ["bar"],
             "info": [["license", "GPL"], ["parm", "debug:enable verbose logs"]]},
            {"name": "bar", "size": 4096}
        ],
        "aliases": {"fooalias": ["foo"]}
    }"#;

    #[test]
    fn test_parse_snapshot() {
        let snap = Snapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snap.loaded.len(), 2);
        assert_eq!(snap.loaded[0].holders, vec!["bar"]);
        assert_eq!(
            snap.loaded[0].info[1],
            ("parm".to_string(), "debug:enable verbose logs".to_string())
        );
        assert_eq!(snap.loaded[1].use_count, 0);
        assert!(snap.faults.is_none());
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SNAPSHOT.as_bytes())?;
        let snap = Snapshot::load(file.path())?;
        assert_eq!(snap.loaded[0].name, "foo");
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = Snapshot::load(Path::new("/nonexistent/snapshot.json")).unwrap_err();
        assert!(matches!(err, AnalysisError::SnapshotError(_)));
    }

    #[test]
    fn test_lookup_by_alias() {
        let backend = SnapshotBackend::new(Snapshot::from_json(SNAPSHOT).unwrap());
        let ctx = backend.new_context().unwrap();
        let list = backend.new_from_lookup(&ctx, "fooalias").unwrap().unwrap();
        assert_eq!(list[0].name, "foo");
        backend.unref_list(&list);
        assert!(backend.new_from_lookup(&ctx, "missing").unwrap().is_none());
        backend.unref_context(&ctx);
        assert_eq!(backend.outstanding(), 0);
        assert_eq!(backend.calls().lookup, 2);
    }

    #[test]
    fn test_counters_track_leaks() {
        let backend = SnapshotBackend::new(Snapshot::from_json(SNAPSHOT).unwrap());
        let ctx = backend.new_context().unwrap();
        let list = backend.new_from_loaded(&ctx).unwrap();
        let module = backend.list_module(&list, 0).unwrap();
        assert_eq!(backend.outstanding(), 3);
        backend.unref_module(&module);
        backend.unref_list(&list);
        backend.unref_context(&ctx);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_capture_round_trips_enumeration() {
        let source = SnapshotBackend::new(Snapshot::from_json(SNAPSHOT).unwrap());
        let captured = Snapshot::capture(&source).unwrap();
        assert_eq!(source.outstanding(), 0);

        assert_eq!(captured.loaded.len(), 2);
        assert_eq!(captured.loaded[0].name, "foo");
        assert_eq!(captured.loaded[0].holders, vec!["bar"]);
        assert_eq!(captured.loaded[0].info.len(), 2);
        assert_eq!(captured.loaded[1].info_error, None);

        let json = serde_json::to_string(&captured).unwrap();
        assert_eq!(Snapshot::from_json(&json).unwrap(), captured);
    }

    #[test]
    fn test_capture_keeps_info_failures() {
        let mut snap = Snapshot::from_json(SNAPSHOT).unwrap();
        snap.loaded[1] = SnapshotModule::loaded("bar", 4096, 0).with_info_error("image missing");
        let source = SnapshotBackend::new(snap);
        let captured = Snapshot::capture(&source).unwrap();
        assert_eq!(captured.loaded[1].info_error.as_deref(), Some("image missing"));
        assert_eq!(captured.loaded[1].info_error_kind, FailureKind::InfoUnavailable);
        assert_eq!(source.outstanding(), 0);

        let replayed = SnapshotBackend::new(captured);
        let records = Enumerator::new(&replayed).enumerate(true).unwrap();
        assert_eq!(
            records[1].error,
            Some(ModuleError::InfoUnavailable {
                module: "bar".to_string(),
                reason: "image missing".to_string(),
            })
        );
    }

    #[test]
    fn test_capture_keeps_failure_kind() {
        let mut snap = Snapshot::from_json(SNAPSHOT).unwrap();
        snap.loaded.push(SnapshotModule {
            builtin: true,
            ..SnapshotModule::loaded("orphan", 1024, 0)
        });
        let source = SnapshotBackend::new(snap);
        let original = Enumerator::new(&source).enumerate(true).unwrap();
        assert_eq!(
            original[2].error,
            Some(ModuleError::ModuleNotFound("orphan".to_string()))
        );

        let captured = Snapshot::capture(&source).unwrap();
        assert_eq!(captured.loaded[2].info_error_kind, FailureKind::ModuleNotFound);
        let json = serde_json::to_string(&captured).unwrap();
        assert!(json.contains(r#""infoErrorKind":"moduleNotFound""#));

        let replayed = SnapshotBackend::new(Snapshot::from_json(&json).unwrap());
        let records = Enumerator::new(&replayed).enumerate(true).unwrap();
        assert_eq!(records[2].error, original[2].error);
        assert_eq!(records[2].error.as_ref().unwrap().kind(), "moduleNotFound");
        assert_eq!(replayed.outstanding(), 0);
    }

    #[test]
    fn test_replays_recorded_failure_kinds() {
        let snap = Snapshot {
            loaded: vec![
                SnapshotModule::loaded("a", 1, 0).with_failure(FailureKind::AliasNotFound, "a"),
                SnapshotModule::loaded("b", 1, 0).with_failure(FailureKind::FilterFailed, "b"),
            ],
            ..Snapshot::default()
        };
        let backend = SnapshotBackend::new(snap);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();
        assert_eq!(records[0].error, Some(ModuleError::AliasNotFound("a".to_string())));
        assert_eq!(records[1].error, Some(ModuleError::FilterFailed("b".to_string())));
    }
}
