//! Enumeration of loaded kernel modules
use log::{debug, warn};

use crate::backend::Backend;
use crate::error::ModuleError;
use crate::kernel::holders::holder_names;
use crate::kernel::normalize::normalize;
use crate::kernel::resolver::resolve;
use crate::kernel::session::{ModuleHandle, Session};
use crate::kernel::{ModuleMetadata, ModuleRecord};

/// Walks the loaded module set of a [`Backend`].
///
/// Every query opens its own session and closes it before returning.
pub struct Enumerator<'b, B: Backend> {
    backend: &'b B,
}

impl<'b, B: Backend> Enumerator<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Enumerator { backend }
    }

    /// One record per loaded module, in the order the subsystem lists them.
    ///
    /// With `include_metadata`, each record also carries its normalized
    /// `modinfo` data. A module whose metadata cannot be obtained keeps its
    /// record; the failure is stored in [`ModuleRecord::error`].
    pub fn enumerate(&self, include_metadata: bool) -> Result<Vec<ModuleRecord>, ModuleError> {
        let session = Session::open(self.backend)?;
        let loaded = session.loaded().map_err(|e| match e {
            ModuleError::EnumerationFailed(_) => e,
            other => ModuleError::EnumerationFailed(other.to_string()),
        })?;
        debug!("{} loaded module(s)", loaded.len());

        let mut records = Vec::with_capacity(loaded.len());
        for module in loaded.iter() {
            let mut record = ModuleRecord {
                name: module.name(),
                size: module.size(),
                use_count: module.use_count(),
                holders: Vec::new(),
                info: None,
                error: None,
            };

            if let Some(holders) = module.holders() {
                record.holders = holder_names(&holders);
            }

            if include_metadata {
                match lookup_metadata(&session, &record.name) {
                    Ok(metadata) => record.info = Some(metadata),
                    Err(e) => {
                        warn!("{}", e);
                        record.error = Some(e);
                    }
                }
            }

            records.push(record);
        }

        Ok(records)
    }

    /// Metadata for a single module name, alias or image path.
    pub fn module_info(&self, name: &str) -> Result<ModuleMetadata, ModuleError> {
        let session = Session::open(self.backend)?;
        lookup_metadata(&session, name)
    }
}

/// Resolve `name` and read the metadata of its candidates.
///
/// When several candidates remain after filtering, the last one wins: each
/// candidate's result, success or failure, replaces the previous one.
pub fn lookup_metadata<B: Backend>(
    session: &Session<'_, B>,
    name: &str,
) -> Result<ModuleMetadata, ModuleError> {
    let candidates = resolve(session, name)?;
    if candidates.len() > 1 {
        debug!(
            "{} matched {} modules, using the last one",
            name,
            candidates.len()
        );
    }

    let mut result = Err(ModuleError::ModuleNotFound(name.to_string()));
    for module in candidates {
        result = extract_metadata(&module);
    }
    result
}

fn extract_metadata<B: Backend>(module: &ModuleHandle<'_, B>) -> Result<ModuleMetadata, ModuleError> {
    let name = module.name();
    let info = module.info().map_err(|e| {
        if e.is_fatal() {
            ModuleError::info_unavailable(&name, e)
        } else {
            e
        }
    })?;
    Ok(normalize(&name, info.records()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::snapshot::{Snapshot, SnapshotBackend, SnapshotModule};
    use crate::kernel::ParamDescriptor;

    fn foo_bar() -> Snapshot {
        Snapshot {
            loaded: vec![
                SnapshotModule::loaded("foo", 12288, 2)
                    .with_holders(&["bar"])
                    .with_info(&[
                        ("description", "built-in networking driver"),
                        ("parm", "debug:enable verbose logs"),
                        ("parmtype", "debug:bool"),
                    ]),
                SnapshotModule::loaded("bar", 4096, 0),
            ],
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_enumerate_without_metadata() {
        let backend = SnapshotBackend::new(foo_bar());
        let records = Enumerator::new(&backend).enumerate(false).unwrap();

        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "foo", "size": 12288, "useCount": 2, "holders": ["bar"]},
                {"name": "bar", "size": 4096, "useCount": 0}
            ])
        );
        assert!(records[1].holders.is_empty());
        assert_eq!(backend.outstanding(), 0);
        assert_eq!(backend.sessions_opened(), 1);
    }

    #[test]
    fn test_no_metadata_path_never_resolves() {
        let backend = SnapshotBackend::new(foo_bar());
        Enumerator::new(&backend).enumerate(false).unwrap();
        let calls = backend.calls();
        assert_eq!(calls.lookup, 0);
        assert_eq!(calls.from_path, 0);
        assert_eq!(calls.filter, 0);
        assert_eq!(calls.info, 0);
    }

    #[test]
    fn test_enumerate_with_metadata() {
        let backend = SnapshotBackend::new(foo_bar());
        let records = Enumerator::new(&backend).enumerate(true).unwrap();
        assert_eq!(backend.outstanding(), 0);

        let info = records[0].info.as_ref().unwrap();
        assert_eq!(info.info.len(), 1);
        assert_eq!(
            info.info["description"],
            vec!["built-in networking driver"]
        );
        assert_eq!(
            info.params["debug"],
            ParamDescriptor {
                description: Some("enable verbose logs".to_string()),
                param_type: Some("bool".to_string()),
            }
        );
        assert!(records[0].error.is_none());

        // bar has no records at all
        assert!(records[1].info.as_ref().unwrap().is_empty());
        assert!(records[1].error.is_none());
    }

    #[test]
    fn test_preserves_subsystem_order() {
        let snap = Snapshot {
            loaded: ["zram", "af_packet", "loop", "bridge"]
                .iter()
                .map(|n| SnapshotModule::loaded(n, 1, 0))
                .collect(),
            ..Snapshot::default()
        };
        let backend = SnapshotBackend::new(snap);
        let names: Vec<String> = Enumerator::new(&backend)
            .enumerate(false)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["zram", "af_packet", "loop", "bridge"]);
    }

    #[test]
    fn test_per_module_failure_is_attached() {
        let mut snap = foo_bar();
        snap.loaded[1] = SnapshotModule::loaded("bar", 4096, 0).with_info_error("image missing");
        let backend = SnapshotBackend::new(snap);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].info.is_some());
        assert!(records[1].info.is_none());
        assert_eq!(
            records[1].error,
            Some(ModuleError::InfoUnavailable {
                module: "bar".to_string(),
                reason: "image missing".to_string(),
            })
        );
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_builtin_loaded_module_reports_not_found() {
        let mut snap = foo_bar();
        snap.loaded[1].builtin = true;
        let backend = SnapshotBackend::new(snap);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();
        assert_eq!(
            records[1].error,
            Some(ModuleError::ModuleNotFound("bar".to_string()))
        );
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_context_failure_is_fatal() {
        let mut snap = foo_bar();
        snap.faults.fail_context = true;
        let backend = SnapshotBackend::new(snap);
        let err = Enumerator::new(&backend).enumerate(true).unwrap_err();
        assert!(matches!(err, ModuleError::ContextUnavailable(_)));
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_list_failure_is_fatal() {
        let mut snap = foo_bar();
        snap.faults.fail_loaded = true;
        let backend = SnapshotBackend::new(snap);
        let err = Enumerator::new(&backend).enumerate(false).unwrap_err();
        assert!(matches!(err, ModuleError::EnumerationFailed(_)));
        assert!(err.is_fatal());
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_failing_lookups_release_everything() {
        let mut snap = foo_bar();
        snap.faults.fail_filter = true;
        let backend = SnapshotBackend::new(snap);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();
        for record in &records {
            assert_eq!(
                record.error,
                Some(ModuleError::FilterFailed(record.name.clone()))
            );
        }
        assert_eq!(backend.outstanding(), 0);

        let mut snap = foo_bar();
        snap.faults.fail_lookup = true;
        let backend = SnapshotBackend::new(snap);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();
        assert!(records
            .iter()
            .all(|r| matches!(r.error, Some(ModuleError::AliasNotFound(_)))));
        assert_eq!(backend.outstanding(), 0);
    }

    fn ambiguous(last_fails: bool) -> Snapshot {
        let mut second = SnapshotModule::available("snd_sof_pci")
            .with_info(&[("description", "SOF driver")]);
        if last_fails {
            second = second.with_info_error("image missing");
        }
        Snapshot {
            available: vec![
                SnapshotModule::available("snd_hda_intel")
                    .with_info(&[("description", "HDA driver")]),
                second,
            ],
            aliases: [(
                "pci:v00008086d0000A0C8".to_string(),
                vec!["snd_hda_intel".to_string(), "snd_sof_pci".to_string()],
            )]
            .into_iter()
            .collect(),
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_last_candidate_wins() {
        let backend = SnapshotBackend::new(ambiguous(false));
        let meta = Enumerator::new(&backend)
            .module_info("pci:v00008086d0000A0C8")
            .unwrap();
        assert_eq!(meta.info["description"], vec!["SOF driver"]);
        assert_eq!(backend.calls().info, 2);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_last_candidate_failure_wins() {
        let backend = SnapshotBackend::new(ambiguous(true));
        let err = Enumerator::new(&backend)
            .module_info("pci:v00008086d0000A0C8")
            .unwrap_err();
        assert_eq!(err.kind(), "infoUnavailable");
        assert!(err.to_string().contains("snd_sof_pci"));
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn test_module_info_unknown_name() {
        let backend = SnapshotBackend::new(foo_bar());
        let err = Enumerator::new(&backend).module_info("nope").unwrap_err();
        assert_eq!(err, ModuleError::AliasNotFound("nope".to_string()));
        assert_eq!(backend.outstanding(), 0);
    }
}
