//! HMR Dependency Tracker, per spec.md §4.5: remembers which compiled
//! SFCs embedded which HMR placeholders, and on a dependency's recompile
//! works out which cached SFC bytes need a fresh placeholder and which
//! HMR event to emit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::resolver::Resolver;

/// One SFC's cached, HMR-instrumented output, keyed by its source path.
#[derive(Debug, Clone)]
pub struct SfcCacheEntry {
    pub dest_path: PathBuf,
    pub code: String,
    /// `(original specifier, placeholder token)` pairs recorded by the
    /// `hmr-instrument` stage.
    pub hmr_deps: Vec<(String, String)>,
}

/// Events the dev server broadcasts over the HMR socket, per spec.md §6
/// "Dev-server wire protocol".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrEvent {
    CssReload,
    ModuleUpdate { path: String },
    SfcUpdate { path: String },
}

fn is_css(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("css")
}

fn translate_to_output(source_path: &Path, source_root: &Path, out_dir: &Path) -> Option<PathBuf> {
    let relative = source_path.strip_prefix(source_root).ok()?;
    Some(out_dir.join(relative).with_extension("js"))
}

/// Resolves one dependency specifier recorded by an `hmr-instrument`
/// placeholder against the SFC's own directory (relative specifiers) or
/// the resolver's alias/module tables (everything else).
fn resolve_dependency(specifier: &str, sfc_path: &Path, resolver: &Resolver) -> Option<PathBuf> {
    if specifier.starts_with("./") || specifier.starts_with("../") {
        let dir = sfc_path.parent()?;
        return Some(dir.join(specifier));
    }
    if let Some(output) = resolver.resolve_alias(specifier) {
        return Some(PathBuf::from(output));
    }
    resolver.resolve_module(specifier, Some(sfc_path))
}

/// Process-wide SFC cache, per spec.md §3/§9 "Global singletons".
pub struct HmrTracker {
    entries: RwLock<HashMap<PathBuf, SfcCacheEntry>>,
}

impl Default for HmrTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HmrTracker {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn store(&self, sfc_path: PathBuf, entry: SfcCacheEntry) {
        self.entries.write().unwrap().insert(sfc_path, entry);
    }

    /// Remove a cache entry on `unlink`, or before recompiling a directly
    /// modified SFC so stale placeholders never get served (spec.md §4.5).
    pub fn purge(&self, sfc_path: &Path) {
        self.entries.write().unwrap().remove(sfc_path);
    }

    pub fn get(&self, sfc_path: &Path) -> Option<SfcCacheEntry> {
        self.entries.read().unwrap().get(sfc_path).cloned()
    }

    /// Look up the cached entry whose *output* path matches an incoming
    /// dev-server request, per spec.md §4.5 "Dev server interception".
    pub fn find_by_dest(&self, dest_path: &Path) -> Option<SfcCacheEntry> {
        self.entries.read().unwrap().values().find(|e| e.dest_path == dest_path).cloned()
    }

    /// Run the cascade for a just-recompiled file `f`, per spec.md §4.5.
    /// Splices fresh placeholder tokens into every cached SFC that
    /// depends on `f`, and returns the events to broadcast.
    pub fn on_file_changed(&self, changed_source: &Path, source_root: &Path, out_dir: &Path, resolver: &Resolver) -> Vec<HmrEvent> {
        let Some(changed_dest) = translate_to_output(changed_source, source_root, out_dir) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut entries = self.entries.write().unwrap();
        for (sfc_path, entry) in entries.iter_mut() {
            let mut spliced = false;
            for (specifier, placeholder) in &entry.hmr_deps {
                let Some(resolved_source) = resolve_dependency(specifier, sfc_path, resolver) else { continue };
                if !resolved_source.starts_with(source_root) {
                    continue;
                }
                let Some(expected_output) = translate_to_output(&resolved_source, source_root, out_dir) else { continue };
                if expected_output != changed_dest {
                    continue;
                }
                // `placeholder` is the token the `hmr-instrument` stage
                // embedded; splice in a fresh timestamp so the served
                // import reads `./util.js?<millis>` (spec.md §4.5 step 2).
                let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
                let replacement = millis.to_string();
                if entry.code.contains(placeholder.as_str()) {
                    entry.code = entry.code.replace(placeholder.as_str(), &replacement);
                    spliced = true;
                }
            }
            if spliced {
                events.push(HmrEvent::SfcUpdate { path: entry.dest_path.to_string_lossy().to_string() });
            }
        }
        drop(entries);

        if is_css(changed_source) {
            events.push(HmrEvent::CssReload);
        } else if events.is_empty() {
            events.push(HmrEvent::ModuleUpdate { path: changed_dest.to_string_lossy().to_string() });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildProfile, ResolverConfig};
    use tempfile::tempdir;

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig::default(), PathBuf::from("/tmp/nonexistent"), "dist".into(), &Default::default(), BuildProfile::Development)
    }

    #[test]
    fn cascades_to_dependent_sfc_on_import_change() {
        let dir = tempdir().unwrap();
        let src_root = dir.path().join("src");
        std::fs::create_dir_all(&src_root).unwrap();
        let out_dir = dir.path().join("dist");

        let sfc_path = src_root.join("App.sfc");
        let dep_path = src_root.join("util.ts");

        let before = "export const a = 1; // ./util.ts?__hmr_placeholder_abc123".to_string();
        let tracker = HmrTracker::new();
        tracker.store(
            sfc_path.clone(),
            SfcCacheEntry {
                dest_path: out_dir.join("App.js"),
                code: before.clone(),
                hmr_deps: vec![("./util.ts".to_string(), "__hmr_placeholder_abc123".to_string())],
            },
        );

        let events = tracker.on_file_changed(&dep_path, &src_root, &out_dir, &resolver());
        assert_eq!(events, vec![HmrEvent::SfcUpdate { path: out_dir.join("App.js").to_string_lossy().to_string() }]);

        let updated = tracker.get(&sfc_path).unwrap();
        assert_ne!(updated.code, before);
        assert!(!updated.code.contains("__hmr_placeholder_"));
        let spliced = updated.code.rsplit('?').next().unwrap();
        assert!(!spliced.is_empty() && spliced.chars().all(|c| c.is_ascii_digit()), "expected a fresh timestamp, got {spliced:?}");
    }

    #[test]
    fn emits_module_update_when_nothing_depends_on_changed_file() {
        let dir = tempdir().unwrap();
        let src_root = dir.path().join("src");
        std::fs::create_dir_all(&src_root).unwrap();
        let out_dir = dir.path().join("dist");
        let changed = src_root.join("standalone.ts");

        let tracker = HmrTracker::new();
        let events = tracker.on_file_changed(&changed, &src_root, &out_dir, &resolver());
        assert_eq!(events, vec![HmrEvent::ModuleUpdate { path: out_dir.join("standalone.js").to_string_lossy().to_string() }]);
    }

    #[test]
    fn emits_css_reload_for_css_changes() {
        let dir = tempdir().unwrap();
        let src_root = dir.path().join("src");
        std::fs::create_dir_all(&src_root).unwrap();
        let out_dir = dir.path().join("dist");
        let changed = src_root.join("styles.css");

        let tracker = HmrTracker::new();
        let events = tracker.on_file_changed(&changed, &src_root, &out_dir, &resolver());
        assert!(events.contains(&HmrEvent::CssReload));
    }

    #[test]
    fn purge_removes_entry() {
        let tracker = HmrTracker::new();
        let path = PathBuf::from("/src/App.sfc");
        tracker.store(path.clone(), SfcCacheEntry { dest_path: PathBuf::from("/dist/App.js"), code: String::new(), hmr_deps: Vec::new() });
        tracker.purge(&path);
        assert!(tracker.get(&path).is_none());
    }
}
