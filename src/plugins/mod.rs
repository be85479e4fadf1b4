//! Plugins for kmodinfo
pub mod capture;
pub mod lsmod;
pub mod modinfo;
pub mod plugin_trait;

pub use capture::CapturePlugin;
pub use lsmod::LsmodPlugin;
pub use modinfo::ModinfoPlugin;

/// Names and descriptions of every plugin, for `--list-plugins`.
pub fn list_plugins() -> Vec<(&'static str, &'static str)> {
    vec![
        ("lsmod", "List loaded kernel modules"),
        ("modinfo", "Show information about a kernel module"),
        ("capture", "Capture loaded modules as a JSON snapshot"),
    ]
}
