//! PointVis command line driver.
//!
//! Builds a filter tree from a project file, reports tree diagnostics, and
//! runs refreshes on the background worker while printing progress.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pointvis_rs::config::{EngineConfig, LoggingConfig, ProjectFile};
use pointvis_rs::pipeline::{
    RefreshBridge, RefreshOutput, Severity, StreamType, TreeAnalyser, TreeDiagnostic,
    WorkerMessage,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often progress is printed while a refresh runs.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "pointvis", version, about = "Point cloud filter pipeline")]
struct Cli {
    /// Engine config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh the tree described by a project file
    Run {
        project: PathBuf,

        /// Refresh this many times; later runs are served from cache
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Print diagnostics and summaries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print tree diagnostics without refreshing
    Analyse {
        project: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::load_or_default(),
    };
    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Command::Run {
            project,
            repeat,
            json,
        } => run(&config, &project, repeat, json),
        Command::Analyse { project, json } => {
            let project = ProjectFile::load(&project)
                .with_context(|| format!("Failed to load project {}", project.display()))?;
            let (tree, _) = project.build_tree()?;
            let diags = TreeAnalyser::analyse(&tree);
            print_diagnostics(&diags, json)?;
            if diags.iter().any(|d| d.severity == Severity::Error) {
                bail!("tree has errors");
            }
            Ok(())
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pointvis.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn run(config: &EngineConfig, project: &Path, repeat: usize, json: bool) -> anyhow::Result<()> {
    let project = ProjectFile::load(project)
        .with_context(|| format!("Failed to load project {}", project.display()))?;
    let (tree, _) = project.build_tree()?;
    tracing::info!("Starting refresh of '{}'", project.name);

    print_diagnostics(&TreeAnalyser::analyse(&tree), json)?;

    let bridge = RefreshBridge::spawn(tree, config.scheduler(), config.history())
        .context("Failed to start refresh worker")?;

    for pass in 1..=repeat.max(1) {
        bridge.refresh();
        let output = wait_for_refresh(&bridge)?;
        print_summary(pass, &output, json)?;
    }
    bridge.shutdown();
    Ok(())
}

fn wait_for_refresh(bridge: &RefreshBridge) -> anyhow::Result<RefreshOutput> {
    loop {
        match bridge.recv_timeout(PROGRESS_INTERVAL) {
            Some(WorkerMessage::RefreshComplete(output)) => return Ok(output),
            Some(WorkerMessage::RefreshFailed(err)) => bail!("refresh failed: {err}"),
            Some(WorkerMessage::Shutdown) => bail!("refresh worker stopped"),
            Some(_) => {}
            None => {
                let progress = bridge.progress();
                if progress.filters_total > 0 {
                    eprintln!(
                        "[{:>3}%] {} {}%",
                        progress.total_percent(),
                        progress.filter_name,
                        progress.filter_percent
                    );
                }
            }
        }
    }
}

fn print_diagnostics(diags: &[TreeDiagnostic], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(diags)?);
        return Ok(());
    }
    for diag in diags {
        println!("{diag}");
        println!("    {}", diag.long);
    }
    Ok(())
}

fn print_summary(pass: usize, output: &RefreshOutput, json: bool) -> anyhow::Result<()> {
    let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    for object in &output.objects {
        *by_type.entry(object.stream_type().name()).or_default() += 1;
    }
    let points: usize = output
        .objects
        .iter()
        .filter(|o| o.stream_type() == StreamType::Points)
        .map(|o| o.point_count())
        .sum();
    let stats = &output.stats;

    if json {
        let summary = serde_json::json!({
            "pass": pass,
            "objects": by_type,
            "points": points,
            "seeds": stats.seeds,
            "filters_refreshed": stats.filters_refreshed,
            "filters_from_cache": stats.filters_from_cache,
            "filters_cached": stats.filters_cached,
            "released": stats.gc.released,
            "elapsed_ms": stats.elapsed.as_secs_f64() * 1000.0,
            "console": output
                .console
                .iter()
                .map(|m| format!("{}: {}", m.filter, m.message))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Pass {pass}: {} objects in {:?} ({} refreshed, {} from cache, {} seeds)",
        output.objects.len(),
        stats.elapsed,
        stats.filters_refreshed,
        stats.filters_from_cache,
        stats.seeds
    );
    for (name, count) in &by_type {
        println!("    {name}: {count}");
    }
    if points > 0 {
        println!("    {points} points reach the leaves");
    }
    for message in &output.console {
        println!("    [{}] {}", message.filter, message.message);
    }
    Ok(())
}
