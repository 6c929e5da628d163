//! Benchmarks for module and alias resolution.
//!
//! Run with: cargo bench --bench resolver_bench
//!
//! Tracks alias-rule matching against an index with many rules (worst
//! case for the priority-sorted linear scan) and the resolution cache's
//! hit path.

use std::collections::HashMap;
use std::path::PathBuf;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use versa_core::config::{BuildProfile, ResolverConfig};
use versa_core::resolver::Resolver;

fn many_aliases(n: usize) -> HashMap<String, Vec<String>> {
    let mut aliases = HashMap::new();
    for i in 0..n {
        aliases.insert(format!("@pkg{i}/*"), vec![format!("/src/pkg{i}/*")]);
    }
    aliases.insert("@/*".to_string(), vec!["/src/*".to_string()]);
    aliases
}

fn bench_alias_resolution(c: &mut Criterion) {
    let aliases = many_aliases(200);
    let resolver = Resolver::new(ResolverConfig::default(), PathBuf::from("/tmp/nonexistent"), "dist".into(), &aliases, BuildProfile::Development);

    c.bench_function("alias_resolve_least_specific_match", |b| {
        b.iter(|| black_box(resolver.resolve_alias("@/components/Button.sfc")));
    });

    c.bench_function("alias_resolve_miss", |b| {
        b.iter(|| black_box(resolver.resolve_alias("not-an-alias/thing.ts")));
    });
}

fn bench_resolution_cache(c: &mut Criterion) {
    let resolver = Resolver::new(ResolverConfig::default(), PathBuf::from("/tmp/nonexistent"), "dist".into(), &Default::default(), BuildProfile::Development);
    // Prime the cache.
    let _ = resolver.resolve_module("some-package", None);

    c.bench_function("resolve_module_cache_hit", |b| {
        b.iter(|| black_box(resolver.resolve_module("some-package", None)));
    });
}

criterion_group!(benches, bench_alias_resolution, bench_resolution_cache);
criterion_main!(benches);
