//! Command-line argument parsing for kmodinfo
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::backend::SysfsConfig;
use crate::formats::traits::OutputFormat;

#[derive(Parser)]
#[command(name = "kmodinfo")]
#[command(about = "Kernel module introspection tool", long_about = None)]
pub struct Cli {
    /// Plugin to run
    #[command(subcommand)]
    pub plugin: Option<PluginCommand>,

    /// Filesystem root holding proc/, sys/ and lib/modules/
    #[arg(long, value_name = "DIR", env = "KMODINFO_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Kernel release (default: read from proc/sys/kernel/osrelease)
    #[arg(long, value_name = "RELEASE", env = "KMODINFO_RELEASE")]
    pub release: Option<String>,

    /// Module directory (default: <ROOT>/lib/modules/<RELEASE>)
    #[arg(long, value_name = "DIR")]
    pub modules_dir: Option<PathBuf>,

    /// Read modules from a JSON snapshot instead of the running system
    #[arg(long, value_name = "FILE", conflicts_with_all = ["release", "modules_dir"])]
    pub snapshot: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormatArg,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Enable verbose output (warnings, status messages)
    #[arg(short, long)]
    pub verbose: bool,

    /// List available plugins
    #[arg(short, long)]
    pub list_plugins: bool,
}

impl Cli {
    /// Settings for the live backend.
    pub fn sysfs_config(&self) -> SysfsConfig {
        SysfsConfig {
            root: self.root.clone(),
            release: self.release.clone(),
            modules_dir: self.modules_dir.clone(),
        }
    }

    /// Log filter implied by `--debug` and `--verbose`.
    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else if self.verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        }
    }
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List loaded kernel modules
    Lsmod {
        /// Include module information (description, parameters, ...)
        #[arg(short, long)]
        info: bool,
    },

    /// Show information about a kernel module
    Modinfo {
        /// Module name, alias or path to a module image
        #[arg(value_name = "MODULE")]
        name: String,
    },

    /// Capture loaded modules as a JSON snapshot
    Capture,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormatArg {
    Text,
    Csv,
    Json,
    Jsonl,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Csv => OutputFormat::Csv,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}
