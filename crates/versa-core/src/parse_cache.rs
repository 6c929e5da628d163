//! Parse cache: memoises AST parses keyed by (path, mtime, content-hash),
//! per spec.md §3 `ParseCacheEntry` and §4.2's reliance on a pre-parsed AST
//! for stages that need one (`sfc-compile`, `type-strip`).
//!
//! `versa-core` does not ship a real TS/SFC parser (that is an external
//! collaborator, spec.md §1); the cached "AST handle" is therefore an
//! opaque, cheaply-cloned value produced by whatever parses the source.

use std::path::PathBuf;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::config::ParseCacheConfig;
use crate::lru::LruOrder;

/// Opaque parse result. Real parsers would stash a rope-backed AST arena
/// handle here; we keep the raw text since `versa-core`'s bundled
/// transforms work directly on source text (see `transform::stages`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstHandle(pub String);

#[derive(Debug, Clone)]
struct ParseCacheEntry {
    mtime_ms: u64,
    content_hash: String,
    ast: AstHandle,
}

/// Process-wide parse cache, bounded by entry count with LRU eviction.
pub struct ParseCache {
    entries: Mutex<FxHashMap<PathBuf, ParseCacheEntry>>,
    order: Mutex<LruOrder<PathBuf>>,
    max_entries: usize,
}

impl ParseCache {
    pub fn new(config: &ParseCacheConfig) -> Self {
        Self { entries: Mutex::new(FxHashMap::default()), order: Mutex::new(LruOrder::new()), max_entries: config.max_entries }
    }

    /// Return the cached AST for `path` if present and still valid
    /// (matching mtime and content hash), per spec.md §3's invariant
    /// "AST invalidated if mtime or hash changes".
    pub fn get(&self, path: &PathBuf, mtime_ms: u64, content_hash: &str) -> Option<AstHandle> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(path) else { return None };
        if entry.mtime_ms != mtime_ms || entry.content_hash != content_hash {
            entries.remove(path);
            self.order.lock().unwrap().remove(path);
            return None;
        }
        let ast = entry.ast.clone();
        drop(entries);
        self.order.lock().unwrap().touch(path);
        Some(ast)
    }

    pub fn put(&self, path: PathBuf, mtime_ms: u64, content_hash: String, ast: AstHandle) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(path.clone(), ParseCacheEntry { mtime_ms, content_hash, ast });
        }
        let mut order = self.order.lock().unwrap();
        order.touch(&path);
        while order.len() > self.max_entries {
            if let Some(evicted) = order.pop_lru() {
                self.entries.lock().unwrap().remove(&evicted);
            } else {
                break;
            }
        }
    }

    /// Invalidate a single path, e.g. on an `unlink`/`change` watcher event.
    pub fn invalidate(&self, path: &PathBuf) {
        self.entries.lock().unwrap().remove(path);
        self.order.lock().unwrap().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
