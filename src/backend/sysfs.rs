//! Live module subsystem backed by procfs, sysfs and the module indexes
//!
//! Loaded modules come from `/proc/modules`; sizes, use counts and holders
//! from `/sys/module/<name>/`; name and alias resolution from the
//! `modules.dep`, `modules.alias` and `modules.builtin` indexes under
//! `/lib/modules/<release>/`; module info from the `.modinfo` section of the
//! module image. Every path is taken relative to a configurable root, so a
//! mounted image of another system can be inspected as well.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::backend::alias::{self, AliasEntry};
use crate::backend::image::{module_name_from_path, ModuleImage};
use crate::backend::{Backend, ModuleFilter};
use crate::error::ModuleError;

/// Where the live backend finds its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsConfig {
    /// Filesystem root holding `proc/`, `sys/` and `lib/modules/`.
    pub root: PathBuf,
    /// Kernel release; read from `proc/sys/kernel/osrelease` when unset.
    pub release: Option<String>,
    /// Module directory; `lib/modules/<release>` under the root when unset.
    pub modules_dir: Option<PathBuf>,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        SysfsConfig {
            root: PathBuf::from("/"),
            release: None,
            modules_dir: None,
        }
    }
}

/// Indexes loaded once per session.
#[derive(Debug)]
pub struct SysfsContext {
    release: String,
    modules_dir: PathBuf,
    deps: HashMap<String, PathBuf>,
    aliases: Vec<AliasEntry>,
    builtin: HashSet<String>,
}

impl SysfsContext {
    pub fn release(&self) -> &str {
        &self.release
    }

    fn module(&self, name: &str) -> SysfsModule {
        let path = self.deps.get(name).cloned();
        SysfsModule {
            name: name.to_string(),
            builtin: path.is_none() && self.builtin.contains(name),
            path,
            proc_size: None,
            proc_refcnt: None,
        }
    }
}

/// A module known to the live backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsModule {
    name: String,
    path: Option<PathBuf>,
    builtin: bool,
    proc_size: Option<u64>,
    proc_refcnt: Option<u32>,
}

/// [`Backend`] for the running system.
#[derive(Debug, Default)]
pub struct SysfsBackend {
    config: SysfsConfig,
}

impl SysfsBackend {
    pub fn new(config: SysfsConfig) -> Self {
        SysfsBackend { config }
    }

    fn rooted(&self, path: &str) -> PathBuf {
        self.config.root.join(path)
    }

    fn module_dir(&self, name: &str) -> PathBuf {
        self.rooted("sys/module").join(name)
    }

    fn kernel_release(&self) -> Result<String, ModuleError> {
        if let Some(release) = &self.config.release {
            return Ok(release.clone());
        }
        let path = self.rooted("proc/sys/kernel/osrelease");
        read_trimmed(&path).ok_or_else(|| {
            ModuleError::ContextUnavailable(format!(
                "kernel release unknown ({} unreadable)",
                path.display()
            ))
        })
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|content| content.trim().to_string())
}

fn read_index(modules_dir: &Path, name: &str) -> String {
    let path = modules_dir.join(name);
    match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!("index {} unavailable: {}", path.display(), e);
            String::new()
        }
    }
}

/// `modules.dep`: `kernel/path/mod.ko: dep.ko ...` lines, keyed by module name.
fn parse_deps(content: &str, modules_dir: &Path) -> HashMap<String, PathBuf> {
    content
        .lines()
        .filter_map(|line| {
            let (path, _) = line.split_once(':')?;
            let path = Path::new(path.trim());
            let name = module_name_from_path(path)?;
            Some((name, modules_dir.join(path)))
        })
        .collect()
}

/// `modules.builtin`: one image path per line.
fn parse_builtin(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| module_name_from_path(Path::new(line)))
        .collect()
}

/// One `/proc/modules` line: `name size refcnt deps state address`.
fn parse_proc_line(line: &str) -> Option<(String, Option<u64>, Option<u32>)> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?.to_string();
    let size = fields.next().and_then(|f| f.parse().ok());
    let refcnt = fields.next().and_then(|f| f.parse().ok());
    Some((name, size, refcnt))
}

impl Backend for SysfsBackend {
    type Context = SysfsContext;
    type Module = SysfsModule;
    type List = Vec<SysfsModule>;
    type InfoList = Vec<(String, String)>;

    fn new_context(&self) -> Result<SysfsContext, ModuleError> {
        let release = self.kernel_release()?;
        let modules_dir = self
            .config
            .modules_dir
            .clone()
            .unwrap_or_else(|| self.rooted("lib/modules").join(&release));
        if !modules_dir.is_dir() {
            warn!(
                "module directory {} missing, lookups will fail",
                modules_dir.display()
            );
        }

        let deps = parse_deps(&read_index(&modules_dir, "modules.dep"), &modules_dir);
        let aliases = alias::parse_aliases(&read_index(&modules_dir, "modules.alias"));
        let builtin = parse_builtin(&read_index(&modules_dir, "modules.builtin"));
        debug!(
            "kernel {}: {} modules, {} aliases, {} built-in",
            release,
            deps.len(),
            aliases.len(),
            builtin.len()
        );

        Ok(SysfsContext {
            release,
            modules_dir,
            deps,
            aliases,
            builtin,
        })
    }

    fn unref_context(&self, ctx: &SysfsContext) {
        debug!("releasing index data for {}", ctx.modules_dir.display());
    }

    fn new_from_loaded(&self, ctx: &SysfsContext) -> Result<Self::List, ModuleError> {
        let path = self.rooted("proc/modules");
        let content = fs::read_to_string(&path)
            .map_err(|e| ModuleError::EnumerationFailed(format!("{}: {}", path.display(), e)))?;

        Ok(content
            .lines()
            .filter_map(parse_proc_line)
            .map(|(name, size, refcnt)| SysfsModule {
                proc_size: size,
                proc_refcnt: refcnt,
                ..ctx.module(&name)
            })
            .collect())
    }

    fn new_from_lookup(
        &self,
        ctx: &SysfsContext,
        name: &str,
    ) -> Result<Option<Self::List>, ModuleError> {
        let name = alias::normalize_name(name);

        let candidates: Vec<SysfsModule> = if ctx.deps.contains_key(&name) {
            vec![ctx.module(&name)]
        } else {
            let matched = alias::lookup(&ctx.aliases, &name);
            if !matched.is_empty() {
                matched.into_iter().map(|m| ctx.module(m)).collect()
            } else if ctx.builtin.contains(&name) {
                vec![ctx.module(&name)]
            } else {
                Vec::new()
            }
        };
        debug!("lookup {} -> {} candidate(s)", name, candidates.len());

        Ok(if candidates.is_empty() {
            None
        } else {
            Some(candidates)
        })
    }

    fn new_from_path(&self, _ctx: &SysfsContext, path: &Path) -> Result<SysfsModule, ModuleError> {
        let not_found = || ModuleError::ModuleNotFound(path.display().to_string());
        let meta = fs::metadata(path).map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }
        let name = module_name_from_path(path).ok_or_else(not_found)?;
        Ok(SysfsModule {
            name,
            path: Some(path.to_path_buf()),
            builtin: false,
            proc_size: None,
            proc_refcnt: None,
        })
    }

    fn apply_filter(
        &self,
        _ctx: &SysfsContext,
        filter: ModuleFilter,
        list: &Self::List,
    ) -> Result<Option<Self::List>, ModuleError> {
        let kept: Vec<SysfsModule> = match filter {
            ModuleFilter::Builtin => list.iter().filter(|m| !m.builtin).cloned().collect(),
        };
        Ok(if kept.is_empty() { None } else { Some(kept) })
    }

    fn list_len(&self, list: &Self::List) -> usize {
        list.len()
    }

    fn list_module(&self, list: &Self::List, index: usize) -> Option<SysfsModule> {
        list.get(index).cloned()
    }

    fn unref_list(&self, _list: &Self::List) {}

    fn module_name(&self, module: &SysfsModule) -> String {
        module.name.clone()
    }

    fn module_size(&self, _ctx: &SysfsContext, module: &SysfsModule) -> u64 {
        read_trimmed(&self.module_dir(&module.name).join("coresize"))
            .and_then(|v| v.parse().ok())
            .or(module.proc_size)
            .unwrap_or(0)
    }

    fn module_refcnt(&self, _ctx: &SysfsContext, module: &SysfsModule) -> u32 {
        read_trimmed(&self.module_dir(&module.name).join("refcnt"))
            .and_then(|v| v.parse().ok())
            .or(module.proc_refcnt)
            .unwrap_or(0)
    }

    fn holders(&self, ctx: &SysfsContext, module: &SysfsModule) -> Option<Self::List> {
        let dir = self.module_dir(&module.name).join("holders");
        let entries = fs::read_dir(&dir).ok()?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        if names.is_empty() {
            return None;
        }
        names.sort();
        Some(names.iter().map(|name| ctx.module(name)).collect())
    }

    fn unref_module(&self, _module: &SysfsModule) {}

    fn info(&self, _ctx: &SysfsContext, module: &SysfsModule) -> Result<Self::InfoList, ModuleError> {
        if module.builtin {
            return Err(ModuleError::info_unavailable(&module.name, "module is built in"));
        }
        let path = module
            .path
            .as_deref()
            .ok_or_else(|| ModuleError::info_unavailable(&module.name, "no module image known"))?;
        ModuleImage::open(path)
            .and_then(|image| image.modinfo())
            .map_err(|reason| ModuleError::info_unavailable(&module.name, reason))
    }

    fn info_len(&self, info: &Self::InfoList) -> usize {
        info.len()
    }

    fn info_entry<'i>(&self, info: &'i Self::InfoList, index: usize) -> Option<(&'i str, &'i str)> {
        info.get(index).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn unref_info(&self, _info: &Self::InfoList) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::image::tests::{elf_with_modinfo, gzip};
    use crate::kernel::Enumerator;
    use tempfile::TempDir;

    const RELEASE: &str = "6.1.0-test";

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A fake root with `foo` (held by `bar`) and `bar` loaded.
    fn fake_root() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mods = format!("lib/modules/{}", RELEASE);

        write(root, "proc/sys/kernel/osrelease", format!("{}\n", RELEASE).as_bytes());
        write(
            root,
            "proc/modules",
            b"foo 12288 2 bar, Live 0xffffffffc0a00000\nbar 4096 0 - Live 0xffffffffc09f0000\n",
        );
        write(root, "sys/module/foo/refcnt", b"2\n");
        write(root, "sys/module/foo/coresize", b"12288\n");
        write(root, "sys/module/foo/holders/bar", b"");
        write(root, "sys/module/bar/refcnt", b"0\n");
        fs::create_dir_all(root.join("sys/module/bar/holders")).unwrap();

        write(
            root,
            &format!("{}/modules.dep", mods),
            b"kernel/drivers/net/foo.ko:\nkernel/drivers/net/bar.ko.gz: kernel/drivers/net/foo.ko\n",
        );
        write(
            root,
            &format!("{}/modules.alias", mods),
            b"alias pci:v0000ABCDd* foo\nalias crypto-crc32c crc32c_generic\n",
        );
        write(
            root,
            &format!("{}/modules.builtin", mods),
            b"kernel/crypto/crc32c_generic.ko\n",
        );
        write(
            root,
            &format!("{}/kernel/drivers/net/foo.ko", mods),
            &elf_with_modinfo(
                b"description=built-in networking driver\0parm=debug:enable verbose logs\0parmtype=debug:bool\0license=GPL\0",
            ),
        );
        write(
            root,
            &format!("{}/kernel/drivers/net/bar.ko.gz", mods),
            &gzip(&elf_with_modinfo(b"description=bridge helper\0license=GPL\0")),
        );
        dir
    }

    fn backend(dir: &TempDir) -> SysfsBackend {
        SysfsBackend::new(SysfsConfig {
            root: dir.path().to_path_buf(),
            ..SysfsConfig::default()
        })
    }

    #[test]
    fn test_parse_proc_line() {
        assert_eq!(
            parse_proc_line("snd_pcm 167936 3 snd_hda_intel,snd_hda_codec, Live 0x0"),
            Some(("snd_pcm".to_string(), Some(167936), Some(3)))
        );
        assert_eq!(parse_proc_line(""), None);
    }

    #[test]
    fn test_parse_deps() {
        let deps = parse_deps(
            "kernel/sound/snd-pcm.ko.zst: kernel/sound/snd.ko.zst\nbogus\n",
            Path::new("/lib/modules/x"),
        );
        assert_eq!(deps.len(), 1);
        assert_eq!(
            deps["snd_pcm"],
            PathBuf::from("/lib/modules/x/kernel/sound/snd-pcm.ko.zst")
        );
    }

    #[test]
    fn test_context_reads_release() {
        let dir = fake_root();
        let backend = backend(&dir);
        let ctx = backend.new_context().unwrap();
        assert_eq!(ctx.release(), RELEASE);
        assert_eq!(ctx.deps.len(), 2);
        assert!(ctx.builtin.contains("crc32c_generic"));
    }

    #[test]
    fn test_context_without_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SysfsBackend::new(SysfsConfig {
            root: dir.path().to_path_buf(),
            ..SysfsConfig::default()
        });
        let err = backend.new_context().unwrap_err();
        assert!(matches!(err, ModuleError::ContextUnavailable(_)));
    }

    #[test]
    fn test_release_override() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SysfsBackend::new(SysfsConfig {
            root: dir.path().to_path_buf(),
            release: Some("5.15.0".to_string()),
            modules_dir: None,
        });
        let ctx = backend.new_context().unwrap();
        assert_eq!(ctx.release(), "5.15.0");
        assert!(ctx.deps.is_empty());
    }

    #[test]
    fn test_enumerate_live_tree() {
        let dir = fake_root();
        let backend = backend(&dir);
        let records = Enumerator::new(&backend).enumerate(false).unwrap();
        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "foo", "size": 12288, "useCount": 2, "holders": ["bar"]},
                {"name": "bar", "size": 4096, "useCount": 0}
            ])
        );
    }

    #[test]
    fn test_enumerate_live_tree_with_metadata() {
        let dir = fake_root();
        let backend = backend(&dir);
        let records = Enumerator::new(&backend).enumerate(true).unwrap();

        let foo = records[0].info.as_ref().unwrap();
        assert_eq!(foo.info["description"], vec!["built-in networking driver"]);
        assert_eq!(foo.info["license"], vec!["GPL"]);
        assert_eq!(foo.params["debug"].description.as_deref(), Some("enable verbose logs"));
        assert_eq!(foo.params["debug"].param_type.as_deref(), Some("bool"));

        // bar's image is gzip compressed
        assert!(records[1].error.is_none());
        let bar = records[1].info.as_ref().unwrap();
        assert_eq!(bar.first("description"), Some("bridge helper"));
    }

    #[test]
    fn test_missing_image_is_per_module() {
        let dir = fake_root();
        fs::remove_file(
            dir.path()
                .join(format!("lib/modules/{}/kernel/drivers/net/bar.ko.gz", RELEASE)),
        )
        .unwrap();
        let records = Enumerator::new(&backend(&dir)).enumerate(true).unwrap();
        assert!(records[0].info.is_some());
        assert!(records[1].info.is_none());
        assert_eq!(records[1].error.as_ref().unwrap().kind(), "infoUnavailable");
    }

    #[test]
    fn test_missing_proc_modules_is_fatal() {
        let dir = fake_root();
        fs::remove_file(dir.path().join("proc/modules")).unwrap();
        let err = Enumerator::new(&backend(&dir)).enumerate(false).unwrap_err();
        assert!(matches!(err, ModuleError::EnumerationFailed(_)));
    }

    #[test]
    fn test_module_info_by_alias() {
        let dir = fake_root();
        let meta = Enumerator::new(&backend(&dir))
            .module_info("pci:v0000ABCDd00001234")
            .unwrap();
        assert_eq!(meta.first("license"), Some("GPL"));
    }

    #[test]
    fn test_module_info_by_path() {
        let dir = fake_root();
        let path = dir
            .path()
            .join(format!("lib/modules/{}/kernel/drivers/net/foo.ko", RELEASE));
        let meta = Enumerator::new(&backend(&dir))
            .module_info(path.to_str().unwrap())
            .unwrap();
        assert_eq!(meta.params["debug"].param_type.as_deref(), Some("bool"));
    }

    #[test]
    fn test_builtin_alias_is_filtered() {
        let dir = fake_root();
        let err = Enumerator::new(&backend(&dir))
            .module_info("crypto-crc32c")
            .unwrap_err();
        assert_eq!(err, ModuleError::ModuleNotFound("crypto-crc32c".to_string()));

        let err = Enumerator::new(&backend(&dir))
            .module_info("crc32c_generic")
            .unwrap_err();
        assert_eq!(err, ModuleError::ModuleNotFound("crc32c_generic".to_string()));
    }

    #[test]
    fn test_unknown_name() {
        let dir = fake_root();
        let err = Enumerator::new(&backend(&dir))
            .module_info("does-not-exist")
            .unwrap_err();
        assert_eq!(err, ModuleError::AliasNotFound("does-not-exist".to_string()));
    }

    #[test]
    fn test_size_falls_back_to_proc() {
        let dir = fake_root();
        let backend = backend(&dir);
        let ctx = backend.new_context().unwrap();
        let loaded = backend.new_from_loaded(&ctx).unwrap();
        // bar has no coresize file
        assert_eq!(backend.module_size(&ctx, &loaded[1]), 4096);
        assert_eq!(backend.module_refcnt(&ctx, &loaded[1]), 0);
        assert!(backend.holders(&ctx, &loaded[1]).is_none());
    }
}
