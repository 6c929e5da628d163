//! The transform pipeline's result cache, per spec.md §4.2 "Caching":
//! LRU by entry count and by total byte footprint, whichever is hit
//! first; hits return a deep clone to prevent aliasing.

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::lru::LruOrder;

use super::PipelineResult;

fn approx_size(result: &PipelineResult) -> u64 {
    let mut size = result.code.len() as u64;
    if let Some(map) = &result.source_map {
        size += map.stage_names.iter().map(|s| s.len() as u64).sum::<u64>();
    }
    size += result.deps.iter().map(|d| d.len() as u64).sum::<u64>();
    size
}

struct Inner {
    entries: FxHashMap<String, PipelineResult>,
    order: LruOrder<String>,
    total_bytes: u64,
}

pub struct TransformCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: u64,
}

impl TransformCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self { inner: Mutex::new(Inner { entries: FxHashMap::default(), order: LruOrder::new(), total_bytes: 0 }), max_entries, max_bytes }
    }

    pub fn get(&self, key: &str) -> Option<PipelineResult> {
        let mut inner = self.inner.lock().unwrap();
        let result = inner.entries.get(key).cloned();
        if result.is_some() {
            let key = key.to_string();
            inner.order.touch(&key);
        }
        result
    }

    pub fn put(&self, key: String, result: PipelineResult) {
        let size = approx_size(&result);
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.entries.insert(key.clone(), result) {
            inner.total_bytes = inner.total_bytes.saturating_sub(approx_size(&old));
        }
        inner.total_bytes += size;
        inner.order.touch(&key);

        while (inner.order.len() > self.max_entries || inner.total_bytes > self.max_bytes) && inner.order.len() > 0 {
            let Some(evicted) = inner.order.pop_lru() else { break };
            if let Some(removed) = inner.entries.remove(&evicted) {
                inner.total_bytes = inner.total_bytes.saturating_sub(approx_size(&removed));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
        while inner.order.pop_lru().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(code: &str) -> PipelineResult {
        PipelineResult { code: code.to_string(), source_map: None, deps: Vec::new(), hmr_deps: Vec::new() }
    }

    #[test]
    fn hit_returns_deep_clone() {
        let cache = TransformCache::new(10, 1024 * 1024);
        cache.put("k1".into(), dummy("abc"));
        let hit = cache.get("k1").unwrap();
        assert_eq!(hit.code, "abc");
    }

    #[test]
    fn evicts_lru_beyond_entry_cap() {
        let cache = TransformCache::new(2, 1024 * 1024);
        cache.put("a".into(), dummy("1"));
        cache.put("b".into(), dummy("2"));
        cache.get("a");
        cache.put("c".into(), dummy("3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn evicts_lru_beyond_byte_cap() {
        let cache = TransformCache::new(100, 10);
        cache.put("a".into(), dummy("12345"));
        cache.put("b".into(), dummy("67890"));
        // total is already at 10 bytes; inserting another evicts "a"
        cache.put("c".into(), dummy("xxxxx"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }
}
