//! Compilation driver: turns a `CliMode` into a sequence of orchestrator
//! calls, per spec.md §7 ("Propagation policy: per-file errors never
//! abort the run") and §4.6 (watch mode's watcher/dev-server wiring).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use versa_core::VersaCore;
use versa_core::config::{CliMode, LinterConfig, ResolvedConfig};
use versa_core::error::VersaError;

use crate::server;
use crate::watch::{Debouncer, EventRouter, RouterEvent, WatchFilter};

/// Outcome of one `all`/`prod`/`watch`-batch compilation pass.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub compiled: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, VersaError)>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

const COMPILE_EXTENSIONS: &[&str] = &["ts", "sfc", "js"];

/// Walk `source_root` for every compilable file, skipping `node_modules`
/// and declaration files (the orchestrator itself also skips `.d.ts`, but
/// filtering here avoids logging a spurious skip for every one of them).
fn discover_sources(source_root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(source_root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == "node_modules") {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        if !COMPILE_EXTENSIONS.contains(&ext) {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(".d.ts")) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();
    paths
}

/// Compile every source under `compiler_options.sourceRoot` exactly once.
/// Used by `all` and `prod`; per-file failures accumulate in the summary
/// rather than aborting the walk.
pub fn run_batch(core: &VersaCore) -> RunSummary {
    let sources = discover_sources(&core.config().compiler_options.source_root);
    let mut summary = RunSummary::default();
    for path in sources {
        let outcome = core.orchestrator().compile_file(&path);
        if outcome.skipped.is_some() {
            summary.skipped += 1;
        } else if let Some(err) = outcome.error {
            error!(file = %path.display(), error = %err, "compile failed");
            summary.failed.push((path, err));
        } else {
            summary.compiled += 1;
        }
    }
    info!(compiled = summary.compiled, skipped = summary.skipped, failed = summary.failed.len(), "batch run complete");
    summary
}

/// Remove the configured output directory, per spec.md §6's `clean` mode.
pub fn run_clean(config: &ResolvedConfig) -> std::io::Result<()> {
    let out_dir = &config.compiler_options.out_dir;
    if out_dir.exists() {
        std::fs::remove_dir_all(out_dir)?;
    }
    Ok(())
}

/// One linter invocation's result, per spec.md §6's `linter` array.
pub struct LintResult {
    pub name: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run every configured linter as an external subprocess, per spec.md §1
/// (linting is an external collaborator, not something VersaCompile
/// implements itself) and §6's `LinterConfig` shape.
pub fn run_lint(config: &ResolvedConfig) -> Vec<LintResult> {
    config
        .linter
        .iter()
        .map(run_one_linter)
        .collect()
}

fn run_one_linter(linter: &LinterConfig) -> LintResult {
    let mut command = Command::new(&linter.bin);
    if let Some(config_file) = &linter.config_file {
        command.arg("--config").arg(config_file);
    }
    if linter.fix {
        command.arg("--fix");
    }
    command.args(&linter.paths);

    match command.output() {
        Ok(output) => LintResult {
            name: linter.name.clone(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => LintResult { name: linter.name.clone(), success: false, stdout: String::new(), stderr: e.to_string() },
    }
}

/// Bridges a `notify` filesystem event into the async world via a
/// blocking watcher thread forwarding onto an unbounded channel, per
/// spec.md §4.6's Watcher stage.
fn spawn_fs_watcher(source_root: PathBuf, additional_watch: Vec<PathBuf>) -> notify::Result<(notify::RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>)> {
    use notify::{Event, EventKind, RecursiveMode, Watcher};

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let Ok(event) = res else { return };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
            return;
        }
        for path in event.paths {
            let _ = tx.send(path);
        }
    })?;

    watcher.watch(&source_root, RecursiveMode::Recursive)?;
    for extra in additional_watch {
        let _ = watcher.watch(&extra, RecursiveMode::Recursive);
    }
    Ok((watcher, rx))
}

/// Runs the watch-mode event loop: filesystem watcher, debouncer, event
/// router, and dev server all driven from one `tokio::select!`, per
/// spec.md §4.6's "Watcher -> Debouncer -> ... -> Dev Server" pipeline
/// and its `SIGINT` termination semantics.
pub async fn run_watch(core: Arc<VersaCore>) -> anyhow::Result<()> {
    run_batch(&core);

    let config = core.config().clone();
    let (_watcher, mut fs_events) = spawn_fs_watcher(config.compiler_options.source_root.clone(), config.additional_watch.iter().map(PathBuf::from).collect())?;

    let filter = WatchFilter::new(config.compiler_options.source_root.clone(), config.compiler_options.out_dir.clone(), &config.additional_watch);
    let mut debouncer = Debouncer::new(config.debounce());

    let (hmr_tx, _hmr_rx) = broadcast::channel(256);
    let router = EventRouter::new(&core, filter);

    let app = server::build_router(core.clone(), hmr_tx.clone(), config.proxy_config.proxy_url.clone(), config.proxy_config.assets_omit);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    info!(addr = %listener.local_addr()?, "dev server listening");
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "dev server exited");
        }
    });

    let debounce_interval = config.debounce();
    let mut removed: FxHashSet<PathBuf> = FxHashSet::default();

    loop {
        let tick = tokio::time::sleep(debounce_interval.min(Duration::from_millis(50)));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            path = fs_events.recv() => {
                let Some(path) = path else { break };
                if !path.exists() {
                    removed.insert(path.clone());
                }
                debouncer.record_at(Instant::now(), path);
            }
            _ = tick => {
                if let Some(batch) = debouncer.flush_ready(Instant::now()) {
                    for path in batch {
                        let events = if removed.remove(&path) { router.handle_unlink(&path) } else { router.handle_change(&path) };
                        for event in events {
                            match event {
                                RouterEvent::Hmr(hmr_event) => {
                                    let _ = hmr_tx.send(hmr_event);
                                }
                                RouterEvent::Deleted { path } => {
                                    warn!(path, "output removed");
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    server_handle.abort();
    Ok(())
}

#[cfg(test)]
#[path = "tests/driver_unit_tests.rs"]
mod tests;
