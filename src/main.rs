//! Main entry point for kmodinfo
use anyhow::Context;
use clap::Parser;
use log::debug;

use kmodinfo::backend::{ModuleSource, Snapshot, SnapshotBackend, SysfsBackend};
use kmodinfo::cli::args::{Cli, PluginCommand};
use kmodinfo::formats::traits::{OutputDestination, OutputWriter};
use kmodinfo::plugins::plugin_trait::{AnalysisContext, IntrospectionPlugin, PluginOutput};
use kmodinfo::plugins::{list_plugins, CapturePlugin, LsmodPlugin, ModinfoPlugin};

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    // Handle --list-plugins
    if cli.list_plugins {
        println!("Available plugins:");
        for (name, description) in list_plugins() {
            println!("  {} - {}", name, description);
        }
        return Ok(());
    }

    let source = match &cli.snapshot {
        Some(path) => {
            let snapshot = Snapshot::load(path)
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            debug!("{} loaded module(s) in snapshot", snapshot.loaded.len());
            ModuleSource::Snapshot(SnapshotBackend::new(snapshot))
        }
        None => ModuleSource::Live(SysfsBackend::new(cli.sysfs_config())),
    };

    let context = AnalysisContext { source: &source };

    let output_dest = match &cli.output {
        Some(path) => OutputDestination::File(path.clone()),
        None => OutputDestination::Stdout,
    };
    let output_writer = OutputWriter::new(cli.format.into(), output_dest);

    // Default: lsmod if no plugin specified
    let plugin: Box<dyn IntrospectionPlugin> = match &cli.plugin {
        Some(PluginCommand::Lsmod { info }) => Box::new(LsmodPlugin { with_info: *info }),
        Some(PluginCommand::Modinfo { name }) => Box::new(ModinfoPlugin {
            target: name.clone(),
        }),
        Some(PluginCommand::Capture) => Box::new(CapturePlugin),
        None => Box::new(LsmodPlugin { with_info: false }),
    };

    execute_plugin(plugin.as_ref(), &context, &output_writer)
        .with_context(|| format!("{} failed", plugin.name()))
}

/// Execute a plugin and handle its output
fn execute_plugin(
    plugin: &dyn IntrospectionPlugin,
    context: &AnalysisContext,
    output_writer: &OutputWriter,
) -> anyhow::Result<()> {
    debug!("running plugin {}: {}", plugin.name(), plugin.description());

    match plugin.run(context)? {
        PluginOutput::Modules(modules) => {
            if modules.is_empty() {
                eprintln!("No kernel modules loaded.");
            } else {
                output_writer.write_modules(&modules)?;
            }
        }
        PluginOutput::Metadata { name, metadata } => {
            output_writer.write_metadata(&name, &metadata)?;
        }
        PluginOutput::Snapshot(snapshot) => {
            // Snapshots are always JSON so they can be fed back with --snapshot.
            output_writer.write_raw(&serde_json::to_string_pretty(&snapshot)?)?;
        }
    }

    Ok(())
}
