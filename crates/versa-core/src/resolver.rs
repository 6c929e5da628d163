//! Module & alias resolution index, per spec.md §4.1.
//!
//! Two public queries: [`Resolver::resolve_module`] answers "what file
//! backs this bare import specifier?" against an indexed package store;
//! [`Resolver::resolve_alias`] rewrites a project path alias to its
//! compiled output path without touching the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{BuildProfile, ResolverConfig};

/// One installed package's essential facts, per spec.md §3 `ModuleIndexEntry`.
#[derive(Debug, Clone)]
pub struct ModuleIndexEntry {
    pub package_name: String,
    pub root_dir: PathBuf,
    pub entry_path: PathBuf,
    pub is_esm: bool,
    pub has_exports: bool,
    pub optimised_entry: Option<PathBuf>,
    pub manifest_mtime_ms: u64,
    /// The manifest's raw `exports` field, kept so subpath resolution
    /// (spec.md §4.1 "Subpath handling") can consult `exports["./"+subpath]`
    /// without re-reading `package.json` on every lookup.
    exports: Option<serde_json::Value>,
}

/// A user-defined prefix-to-path rewrite rule, per spec.md §4.1 "Alias index".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasRule {
    pub pattern: String,
    pub targets: Vec<String>,
}

impl AliasRule {
    fn is_prefix(&self) -> bool {
        self.pattern.ends_with("/*")
    }

    fn prefix(&self) -> &str {
        self.pattern.strip_suffix("/*").unwrap_or(&self.pattern)
    }

    fn priority(&self) -> usize {
        self.pattern.len()
    }

    /// Returns the matched remainder (text after the prefix) on a hit.
    fn matches<'s>(&self, specifier: &'s str) -> Option<&'s str> {
        if self.is_prefix() {
            let prefix = self.prefix();
            if specifier == prefix {
                Some("")
            } else if let Some(rest) = specifier.strip_prefix(prefix) {
                rest.strip_prefix('/').map(|r| r)
            } else {
                None
            }
        } else if specifier == self.pattern {
            Some("")
        } else {
            None
        }
    }
}

/// Sorted (most-specific-first) index of [`AliasRule`]s.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    rules: Vec<AliasRule>,
}

impl AliasIndex {
    pub fn new(mut rules: Vec<AliasRule>) -> Self {
        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { rules }
    }

    pub fn from_map(map: &HashMap<String, Vec<String>>) -> Self {
        let rules = map.iter().map(|(pattern, targets)| AliasRule { pattern: pattern.clone(), targets: targets.clone() }).collect();
        Self::new(rules)
    }

    fn find(&self, specifier: &str) -> Option<(&AliasRule, &str)> {
        for rule in &self.rules {
            if let Some(rest) = rule.matches(specifier) {
                return Some((rule, rest));
            }
        }
        None
    }
}

fn strip_leading_dot_slash(s: &str) -> &str {
    s.strip_prefix("./").unwrap_or(s)
}

fn join_url(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if out.is_empty() {
            out.push_str(part);
        } else {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(part.trim_start_matches('/'));
        }
    }
    out
}

/// Resolve an alias match to its distribution output path, per spec.md
/// §4.1 "Alias resolution to output path".
fn resolve_alias_output(rule: &AliasRule, relative: &str, dist_root: &str, well_known_roots: &[String]) -> Option<String> {
    let target = rule.targets.first()?;

    if !rule.is_prefix() && !target.contains('*') {
        let cleaned = strip_leading_dot_slash(target);
        let cleaned = cleaned.strip_prefix("src/").unwrap_or(cleaned);
        return Some(join_url(&["/", dist_root, cleaned]));
    }

    if let Some(stripped) = target.strip_prefix('/') {
        let _ = stripped;
        return Some(join_url(&["/", dist_root, relative]));
    }

    let clean_target = target.strip_prefix("./").unwrap_or(target);
    let clean_target = clean_target.strip_suffix("/*").unwrap_or(clean_target);
    let clean_target = clean_target.strip_suffix('*').unwrap_or(clean_target);
    let clean_target = clean_target.trim_end_matches('/');

    if clean_target == dist_root {
        return Some(join_url(&["/", dist_root, relative]));
    }
    if let Some(rest) = clean_target.strip_prefix(&format!("{dist_root}/")) {
        return Some(join_url(&["/", dist_root, rest, relative]));
    }
    if let Some(rest) = clean_target.strip_prefix("src/") {
        return Some(join_url(&["/", dist_root, rest, relative]));
    }
    if well_known_roots.iter().any(|root| root == clean_target) {
        return Some(join_url(&["/", dist_root, relative]));
    }
    Some(join_url(&["/", dist_root, clean_target, relative]))
}

/// A package manifest's raw `exports`/`main`/`module`/`browser` fields,
/// as read from `package.json`. Kept as `serde_json::Value` because the
/// `exports` field's shape is a union the npm ecosystem never settled on
/// a single schema for.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    browser: Option<serde_json::Value>,
    #[serde(default)]
    exports: Option<serde_json::Value>,
    #[serde(default)]
    r#type: Option<String>,
}

fn exports_condition<'a>(value: &'a serde_json::Value, conditions: &[&str]) -> Option<&'a str> {
    match value {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Object(map) => {
            for cond in conditions {
                if let Some(v) = map.get(*cond) {
                    if let Some(s) = exports_condition(v, conditions) {
                        return Some(s);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn select_entry(manifest: &RawManifest) -> Option<String> {
    if let Some(m) = &manifest.module {
        return Some(m.clone());
    }
    if let Some(exports) = &manifest.exports {
        let root = match exports {
            serde_json::Value::Object(map) if map.contains_key(".") => map.get(".").cloned(),
            other @ serde_json::Value::String(_) => Some(other.clone()),
            _ => None,
        };
        if let Some(root) = root {
            if let Some(s) = exports_condition(&root, &["import", "browser", "default"]) {
                return Some(s.to_string());
            }
        }
    }
    if let Some(browser) = &manifest.browser {
        if let serde_json::Value::String(s) = browser {
            return Some(s.clone());
        }
    }
    if let Some(main) = &manifest.main {
        return Some(main.clone());
    }
    Some("index.js".to_string())
}

/// Development-bias post-resolution rule (spec.md §4.1).
fn apply_development_bias(entry: &str, manifest: &RawManifest, probe_exists: &dyn Fn(&str) -> bool) -> String {
    let filename_min_or_prod = entry.contains(".min.") || entry.contains(".prod.");
    if !filename_min_or_prod {
        return entry.to_string();
    }
    if let Some(exports) = &manifest.exports {
        let root = match exports {
            serde_json::Value::Object(map) if map.contains_key(".") => map.get("."),
            other @ serde_json::Value::String(_) => Some(other),
            _ => None,
        };
        if let Some(root) = root {
            if let Some(s) = exports_condition(root, &["development", "import", "browser", "default"]) {
                if s != entry {
                    return s.to_string();
                }
            }
        }
    }
    for (from, to) in [(".min.", "."), (".prod.", ".")] {
        if entry.contains(from) {
            let candidate = entry.replacen(from, to, 1);
            if probe_exists(&candidate) {
                return candidate;
            }
        }
    }
    entry.to_string()
}

/// Browser-bias post-resolution rule (spec.md §4.1).
fn apply_browser_bias(entry: &str, probe_exists: &dyn Fn(&str) -> bool) -> String {
    if !entry.contains("runtime") || entry.contains("browser") {
        return entry.to_string();
    }
    let dir = entry.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    for candidate_suffix in ["esm-browser", "browser", "esm"] {
        let candidate = format!("{dir}/{candidate_suffix}.js");
        if probe_exists(&candidate) {
            return candidate;
        }
    }
    entry.to_string()
}

/// Subpath export/file resolution, per spec.md §4.1 "Subpath handling".
fn resolve_subpath(entry_dir: &Path, subpath: &str, exports: Option<&serde_json::Value>, probe_exists: &dyn Fn(&Path) -> bool) -> Option<PathBuf> {
    if let Some(exports) = exports {
        if let serde_json::Value::Object(map) = exports {
            let key = format!("./{subpath}");
            if let Some(value) = map.get(&key) {
                if let Some(s) = exports_condition(value, &["import", "default"]) {
                    return Some(entry_dir.join(s));
                }
            }
        }
        return None;
    }
    for candidate in [subpath.to_string(), format!("{subpath}.mjs"), format!("{subpath}.js"), format!("{subpath}.cjs")] {
        let path = entry_dir.join(&candidate);
        if probe_exists(&path) {
            return Some(path);
        }
    }
    None
}

/// An LRU+TTL-bounded resolution result cache, per spec.md §3
/// `ResolutionCacheEntry` and §4.1 "Caching".
struct ResolutionCache {
    entries: DashMap<String, CacheSlot>,
    order: RwLock<Vec<String>>,
    capacity: usize,
    ttl: Duration,
}

struct CacheSlot {
    result: Option<PathBuf>,
    created_at: Instant,
    hit_count: u64,
}

impl ResolutionCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self { entries: DashMap::new(), order: RwLock::new(Vec::new()), capacity, ttl }
    }

    fn key(specifier: &str, from_file: Option<&Path>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(specifier.as_bytes());
        hasher.update(b"\xE2\x80\xA3");
        if let Some(f) = from_file {
            hasher.update(f.to_string_lossy().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn get(&self, key: &str) -> Option<Option<PathBuf>> {
        let mut expired = false;
        let result = {
            let mut slot = self.entries.get_mut(key)?;
            if slot.created_at.elapsed() > self.ttl {
                expired = true;
                None
            } else {
                slot.hit_count += 1;
                Some(slot.result.clone())
            }
        };
        if expired {
            self.entries.remove(key);
            self.touch_remove(key);
            return None;
        }
        if result.is_some() {
            self.touch(key);
        }
        result
    }

    fn touch(&self, key: &str) {
        let mut order = self.order.write().unwrap();
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos);
            order.push(k);
        }
    }

    fn touch_remove(&self, key: &str) {
        let mut order = self.order.write().unwrap();
        order.retain(|k| k != key);
    }

    fn put(&self, key: String, result: Option<PathBuf>) {
        self.entries.insert(key.clone(), CacheSlot { result, created_at: Instant::now(), hit_count: 0 });
        let mut order = self.order.write().unwrap();
        order.retain(|k| k != &key);
        order.push(key);
        while order.len() > self.capacity {
            let evicted = order.remove(0);
            drop(order);
            self.entries.remove(&evicted);
            order = self.order.write().unwrap();
        }
    }
}

/// Resolver metrics, per spec.md §4.1 "Metrics".
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    pub total_resolutions: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub fs_accesses: AtomicU64,
    pub index_lookups: AtomicU64,
    pub alias_matches: AtomicU64,
    total_resolve_nanos: AtomicU64,
}

impl ResolverMetrics {
    fn record_resolve(&self, elapsed: Duration) {
        self.total_resolutions.fetch_add(1, Ordering::Relaxed);
        self.total_resolve_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn average_resolve_time(&self) -> Duration {
        let total = self.total_resolutions.load(Ordering::Relaxed);
        if total == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_resolve_nanos.load(Ordering::Relaxed) / total)
    }
}

/// The module & alias resolution index. One instance is owned process-wide
/// (spec.md §3 "Ownership", §9 "Global singletons").
pub struct Resolver {
    config: ResolverConfig,
    package_store_root: PathBuf,
    dist_root: String,
    module_index: DashMap<String, ModuleIndexEntry>,
    alias_index: RwLock<AliasIndex>,
    cache: ResolutionCache,
    metrics: ResolverMetrics,
    last_index_build: RwLock<Option<Instant>>,
    build_profile: BuildProfile,
}

impl Resolver {
    pub fn new(config: ResolverConfig, package_store_root: PathBuf, dist_root: String, aliases: &HashMap<String, Vec<String>>, build_profile: BuildProfile) -> Self {
        let cache = ResolutionCache::new(config.resolution_cache_capacity, config.resolution_cache_ttl());
        Self {
            alias_index: RwLock::new(AliasIndex::from_map(aliases)),
            config,
            package_store_root,
            dist_root,
            module_index: DashMap::new(),
            cache,
            metrics: ResolverMetrics::default(),
            last_index_build: RwLock::new(None),
            build_profile,
        }
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    pub fn set_alias_rules(&self, aliases: &HashMap<String, Vec<String>>) {
        *self.alias_index.write().unwrap() = AliasIndex::from_map(aliases);
    }

    /// Rebuild the module index if it has never been built, or if the
    /// configured refresh interval has elapsed. Returns true if rebuilt.
    pub fn maybe_refresh_index(&self) -> bool {
        let due = {
            let last = self.last_index_build.read().unwrap();
            match *last {
                None => true,
                Some(t) => t.elapsed() >= self.config.index_refresh_interval(),
            }
        };
        if due {
            self.force_refresh_index();
        }
        due
    }

    pub fn force_refresh_index(&self) {
        self.module_index.clear();
        if let Ok(entries) = std::fs::read_dir(&self.package_store_root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(scope) = name.strip_prefix('@') {
                    let _ = scope;
                    if let Ok(scoped) = std::fs::read_dir(&path) {
                        for sub in scoped.flatten() {
                            let sub_path = sub.path();
                            if sub_path.is_dir() {
                                let pkg_name = format!("{name}/{}", sub.file_name().to_string_lossy());
                                self.index_package(&pkg_name, &sub_path);
                            }
                        }
                    }
                    continue;
                }
                self.index_package(&name, &path);
            }
        }
        *self.last_index_build.write().unwrap() = Some(Instant::now());
    }

    fn index_package(&self, name: &str, root: &Path) {
        if self.config.excluded_packages.iter().any(|p| p == name) {
            return;
        }
        let manifest_path = root.join("package.json");
        let Ok(bytes) = std::fs::read(&manifest_path) else { return };
        let Ok(manifest) = serde_json::from_slice::<RawManifest>(&bytes) else { return };
        let mtime_ms = std::fs::metadata(&manifest_path).and_then(|m| m.modified()).ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_millis() as u64).unwrap_or(0);

        let Some(mut entry) = select_entry(&manifest) else { return };
        let probe = |candidate: &str| root.join(candidate).exists();
        if matches!(self.build_profile, BuildProfile::Development) {
            entry = apply_development_bias(&entry, &manifest, &probe);
        }
        entry = apply_browser_bias(&entry, &probe);

        let has_exports = manifest.exports.is_some();
        let is_esm = manifest.module.is_some() || manifest.r#type.as_deref() == Some("module");
        let optimised_entry = if matches!(self.build_profile, BuildProfile::Production) {
            let prod_entry = apply_development_bias(&select_entry(&manifest).unwrap_or_default(), &manifest, &|_| false);
            (prod_entry != entry).then(|| root.join(prod_entry))
        } else {
            None
        };

        self.module_index.insert(
            name.to_string(),
            ModuleIndexEntry {
                package_name: name.to_string(),
                root_dir: root.to_path_buf(),
                entry_path: root.join(&entry),
                is_esm,
                has_exports,
                optimised_entry,
                manifest_mtime_ms: mtime_ms,
                exports: manifest.exports.clone(),
            },
        );
    }

    /// `resolveModule(specifier, fromFile?) -> path | null`, per spec.md §4.1.
    pub fn resolve_module(&self, specifier: &str, from_file: Option<&Path>) -> Option<PathBuf> {
        let start = Instant::now();
        let cache_key = ResolutionCache::key(specifier, from_file);
        if let Some(hit) = self.cache.get(&cache_key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_resolve(start.elapsed());
            return hit;
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        self.maybe_refresh_index();

        let (package_name, subpath) = match specifier.split_once('/') {
            Some((pkg, sub)) if !pkg.starts_with('@') => (pkg.to_string(), Some(sub.to_string())),
            Some((scope, rest)) if specifier.starts_with('@') => {
                if let Some((pkg, sub)) = rest.split_once('/') {
                    (format!("{scope}/{pkg}"), Some(sub.to_string()))
                } else {
                    (specifier.to_string(), None)
                }
            }
            _ => (specifier.to_string(), None),
        };

        self.metrics.index_lookups.fetch_add(1, Ordering::Relaxed);
        let result = self.module_index.get(&package_name).and_then(|entry| {
            if self.config.excluded_packages.iter().any(|p| p == &package_name) {
                return None;
            }
            match &subpath {
                None => Some(entry.entry_path.clone()),
                Some(sub) => {
                    self.metrics.fs_accesses.fetch_add(1, Ordering::Relaxed);
                    let entry_dir = entry.root_dir.clone();
                    let exports = entry.exports.clone();
                    resolve_subpath(&entry_dir, sub, exports.as_ref(), &|p| p.exists())
                }
            }
        });

        self.cache.put(cache_key, result.clone());
        self.metrics.record_resolve(start.elapsed());
        result
    }

    /// `resolveAlias(specifier) -> output-path | null`, per spec.md §4.1.
    pub fn resolve_alias(&self, specifier: &str) -> Option<String> {
        let index = self.alias_index.read().unwrap();
        let (rule, relative) = index.find(specifier)?;
        self.metrics.alias_matches.fetch_add(1, Ordering::Relaxed);
        resolve_alias_output(rule, relative, &self.dist_root, &self.config.well_known_roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver_with_aliases(aliases: HashMap<String, Vec<String>>) -> Resolver {
        Resolver::new(ResolverConfig::default(), PathBuf::from("/tmp/nonexistent"), "dist".to_string(), &aliases, BuildProfile::Development)
    }

    #[test]
    fn alias_prefix_scenario() {
        let mut aliases = HashMap::new();
        aliases.insert("@/*".to_string(), vec!["/src/*".to_string()]);
        let resolver = resolver_with_aliases(aliases);

        assert_eq!(resolver.resolve_alias("@/components/Button.vue"), Some("/dist/components/Button.vue".to_string()));
        assert_eq!(resolver.resolve_alias("@/utils/helpers.ts"), Some("/dist/utils/helpers.ts".to_string()));
        assert_eq!(resolver.resolve_alias("./relative/path.js"), None);
    }

    #[test]
    fn alias_exact_scenario() {
        let mut aliases = HashMap::new();
        aliases.insert("#config".to_string(), vec!["config/index.js".to_string()]);
        let resolver = resolver_with_aliases(aliases);

        assert_eq!(resolver.resolve_alias("#config"), Some("/dist/config/index.js".to_string()));
    }

    #[test]
    fn alias_well_known_root_drops_duplicate_segment() {
        let mut aliases = HashMap::new();
        aliases.insert("@app/*".to_string(), vec!["./app/*".to_string()]);
        let resolver = resolver_with_aliases(aliases);
        assert_eq!(resolver.resolve_alias("@app/widgets/list.ts"), Some("/dist/widgets/list.ts".to_string()));
    }

    #[test]
    fn alias_priority_prefers_more_specific_pattern() {
        let mut aliases = HashMap::new();
        aliases.insert("@/*".to_string(), vec!["/src/*".to_string()]);
        aliases.insert("@/special/*".to_string(), vec!["/special-src/*".to_string()]);
        let resolver = resolver_with_aliases(aliases);
        assert_eq!(resolver.resolve_alias("@/special/thing.ts"), Some("/dist/thing.ts".to_string()));
    }

    #[test]
    fn select_entry_prefers_module_field() {
        let manifest = RawManifest { module: Some("esm/index.js".into()), main: Some("index.js".into()), ..Default::default() };
        assert_eq!(select_entry(&manifest), Some("esm/index.js".to_string()));
    }

    #[test]
    fn select_entry_falls_back_to_index_js() {
        let manifest = RawManifest::default();
        assert_eq!(select_entry(&manifest), Some("index.js".to_string()));
    }

    #[test]
    fn development_bias_prefers_development_export() {
        let manifest = RawManifest {
            exports: Some(serde_json::json!({".": {"development": "dist/vue.js", "production": "dist/vue.prod.js"}})),
            ..Default::default()
        };
        let resolved = apply_development_bias("dist/vue.prod.js", &manifest, &|_| false);
        assert_eq!(resolved, "dist/vue.js");
    }

    #[test]
    fn development_bias_substitutes_min_when_no_export_hint() {
        let manifest = RawManifest::default();
        let resolved = apply_development_bias("dist/lib.min.js", &manifest, &|c| c == "dist/lib.js");
        assert_eq!(resolved, "dist/lib.js");
    }

    #[test]
    fn browser_bias_prefers_esm_browser_sibling() {
        let resolved = apply_browser_bias("dist/runtime-core.js", &|c| c == "dist/esm-browser.js");
        assert_eq!(resolved, "dist/esm-browser.js");
    }

    #[test]
    fn browser_bias_no_op_when_already_browser() {
        let resolved = apply_browser_bias("dist/runtime-browser.js", &|_| true);
        assert_eq!(resolved, "dist/runtime-browser.js");
    }

    #[test]
    fn resolution_cache_hits_after_first_miss() {
        let mut aliases = HashMap::new();
        aliases.insert("@/*".to_string(), vec!["/src/*".to_string()]);
        let resolver = resolver_with_aliases(aliases);
        let _ = resolver.resolve_module("does-not-exist", None);
        let _ = resolver.resolve_module("does-not-exist", None);
        assert_eq!(resolver.metrics().cache_hits.load(Ordering::Relaxed), 1);
        assert_eq!(resolver.metrics().cache_misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn subpath_resolution_consults_exports_map_over_bare_fs_probe() {
        let store = tempfile::tempdir().unwrap();
        let pkg_dir = store.path().join("some-lib");
        std::fs::create_dir_all(pkg_dir.join("esm")).unwrap();
        std::fs::write(
            pkg_dir.join("package.json"),
            serde_json::json!({
                "name": "some-lib",
                "main": "index.js",
                "exports": { ".": "index.js", "./feature": { "import": "./esm/feature.js" } }
            })
            .to_string(),
        )
        .unwrap();
        // No file matches the bare `feature{,.mjs,.js,.cjs}` probe; only the
        // exports-mapped `esm/feature.js` exists.
        std::fs::write(pkg_dir.join("esm/feature.js"), b"export const feature = 1;\n").unwrap();

        let resolver = Resolver::new(ResolverConfig::default(), store.path().to_path_buf(), "dist".to_string(), &Default::default(), BuildProfile::Development);
        let resolved = resolver.resolve_module("some-lib/feature", None);
        assert_eq!(resolved, Some(pkg_dir.join("esm/feature.js")));
    }
}
