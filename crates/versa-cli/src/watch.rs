//! Watcher & Event Router, per spec.md §4.6: debounces filesystem events,
//! filters to `.ts`/`.sfc`/`.js` (plus `aditionalWatch` globs for
//! reload-only side effects), invalidates caches, reinvokes the
//! orchestrator, and forwards HMR payloads to the dev server.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashSet;
use versa_core::VersaCore;
use versa_core::hmr::HmrEvent;

/// Accumulates changed paths and releases them once no new event has
/// arrived for `interval` — a single quiet-period timer shared by the
/// whole pending batch, not one per path, so a burst of saves collapses
/// into one recompile round per spec.md §4.6 "debounces file events".
pub struct Debouncer {
    interval: Duration,
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, pending: FxHashSet::default(), last_event: None }
    }

    pub fn record_at(&mut self, now: Instant, path: PathBuf) {
        self.pending.insert(path);
        self.last_event = Some(now);
    }

    /// Returns the accumulated paths and resets the batch once the quiet
    /// period has elapsed since the most recent recorded event; `None`
    /// while events are still trickling in or nothing is pending.
    pub fn flush_ready(&mut self, now: Instant) -> Option<FxHashSet<PathBuf>> {
        let last = self.last_event?;
        if now.duration_since(last) < self.interval {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.pending))
    }
}

/// What watching a path that passed the filter should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Recompile through the orchestrator and HMR tracker.
    Compile,
    /// A side-effect-only path from `aditionalWatch` (e.g. a Tailwind
    /// input file); reload the browser but do not compile.
    ReloadOnly,
}

/// Decides which filesystem events the watcher should act on, per
/// spec.md §4.6 ("Filters to .ts, .sfc, .js") and §6 (`aditionalWatch`).
pub struct WatchFilter {
    source_root: PathBuf,
    out_dir: PathBuf,
    additional: GlobSet,
}

const COMPILE_EXTENSIONS: &[&str] = &["ts", "sfc", "js"];

impl WatchFilter {
    pub fn new(source_root: PathBuf, out_dir: PathBuf, additional_watch: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in additional_watch {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        Self { source_root, out_dir, additional: builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap()) }
    }

    /// Classify a changed path, or `None` if the watcher should ignore it
    /// entirely (build output, `node_modules`, anything uninteresting).
    pub fn classify(&self, path: &Path) -> Option<WatchKind> {
        if path.starts_with(&self.out_dir) {
            return None;
        }
        if path.components().any(|c| c.as_os_str() == "node_modules") {
            return None;
        }
        if path.starts_with(&self.source_root) {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if COMPILE_EXTENSIONS.contains(&ext) {
                    return Some(WatchKind::Compile);
                }
            }
        }
        if self.additional.is_match(path) {
            return Some(WatchKind::ReloadOnly);
        }
        None
    }

    pub fn should_record(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }
}

/// An HMR payload plus any filesystem-level event the dev server should
/// also know about (e.g. an output was deleted), per spec.md §4.6's
/// `delete` event and §6's wire protocol.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Hmr(HmrEvent),
    Deleted { path: String },
}

/// Ties a batch of debounced filesystem paths to the orchestrator and
/// HMR tracker, per spec.md §4.6's control flow: Watcher -> Orchestrator
/// -> HMR Tracker -> Dev Server.
pub struct EventRouter<'a> {
    core: &'a VersaCore,
    filter: WatchFilter,
}

impl<'a> EventRouter<'a> {
    pub fn new(core: &'a VersaCore, filter: WatchFilter) -> Self {
        Self { core, filter }
    }

    /// Process one `add`/`change` path: invalidate caches, recompile,
    /// then run the HMR cascade against the just-written output.
    pub fn handle_change(&self, path: &Path) -> Vec<RouterEvent> {
        match self.filter.classify(path) {
            Some(WatchKind::ReloadOnly) => vec![RouterEvent::Hmr(HmrEvent::CssReload)],
            Some(WatchKind::Compile) => {
                self.core.hmr().purge(path);
                let outcome = self.core.orchestrator().compile_file(path);
                if !outcome.is_success() {
                    tracing::warn!(path = %path.display(), error = ?outcome.error, "compile failed");
                    return Vec::new();
                }
                let config = self.core.config();
                self.core
                    .hmr()
                    .on_file_changed(path, &config.compiler_options.source_root, &config.compiler_options.out_dir, self.core.resolver())
                    .into_iter()
                    .map(RouterEvent::Hmr)
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Process an `unlink`: purge caches and remove the compiled output,
    /// per spec.md §4.6 ("On unlink, removes output and HMR caches,
    /// emits delete") and §4.5 ("On unlink of an SFC: purge its cache
    /// entry").
    pub fn handle_unlink(&self, path: &Path) -> Vec<RouterEvent> {
        if self.filter.classify(path) != Some(WatchKind::Compile) {
            return Vec::new();
        }
        self.core.hmr().purge(path);
        let config = self.core.config();
        let Some(relative) = path.strip_prefix(&config.compiler_options.source_root).ok() else {
            return Vec::new();
        };
        let dest = config.compiler_options.out_dir.join(relative).with_extension("js");
        let _ = std::fs::remove_file(&dest);
        vec![RouterEvent::Deleted { path: dest.to_string_lossy().to_string() }]
    }
}

/// A set of paths deduplicated across a debounce window, in whatever
/// order the underlying hash set iterates (order is not meaningful:
/// compiles of distinct files are independent, per spec.md §5 "Ordering
/// guarantees").
pub fn dedup_paths(paths: impl IntoIterator<Item = PathBuf>) -> HashSet<PathBuf> {
    paths.into_iter().collect()
}

#[cfg(test)]
#[path = "tests/watch_tests.rs"]
mod tests;
