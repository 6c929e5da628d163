//! Engineering-dense subsystems of VersaCompile, per spec.md §2: the
//! resolver, the multi-level cache system, the transform pipeline, the
//! type-check worker pool, the compile orchestrator, and the HMR
//! dependency tracker.
//!
//! No process entry points live here. Everything is a library type with
//! explicit construction and an explicit [`VersaCore::shutdown`]; the
//! filesystem watcher, dev server, argument parsing, and configuration
//! file loading are `versa-cli`'s job (spec.md §1 "Deliberately out of
//! scope").

pub mod config;
pub mod error;
pub mod hmr;
pub mod lru;
pub mod orchestrator;
pub mod parse_cache;
pub mod resolver;
pub mod transform;
pub mod typecheck;
pub mod workerpool;

use std::path::PathBuf;
use std::sync::Arc;

use config::{BuildProfile, CliMode, ResolvedConfig};
use hmr::HmrTracker;
use orchestrator::Orchestrator;
use resolver::Resolver;
use typecheck::{NullTypeChecker, TypeChecker};
use workerpool::WorkerPool;

/// Bundles the process-wide singletons spec.md §9 calls out (worker pool,
/// resolver, transform cache) behind one handle, constructed by
/// [`VersaCore::init`] and torn down by [`VersaCore::shutdown`] rather
/// than looked up ambiently. `versa-cli`'s watcher, dev server, and
/// orchestrator invocations all go through this handle.
pub struct VersaCore {
    config: ResolvedConfig,
    resolver: Arc<Resolver>,
    worker_pool: Arc<WorkerPool>,
    hmr: Arc<HmrTracker>,
    orchestrator: Orchestrator,
}

impl VersaCore {
    /// Construct every component for one run, per spec.md §6
    /// configuration and §4.3 sizing. `package_store_root` is the
    /// directory the resolver indexes (a project's `node_modules`
    /// equivalent); `checker` is the type-checker seam (spec.md §1 names
    /// real type-checking as an external collaborator).
    pub fn init(config: ResolvedConfig, mode: CliMode, package_store_root: PathBuf, checker: Arc<dyn TypeChecker>) -> Self {
        let build_profile = BuildProfile::from(mode);
        let dist_root = config.compiler_options.out_dir.file_name().and_then(|n| n.to_str()).unwrap_or("dist").to_string();
        let resolver = Arc::new(Resolver::new(config.resolver.clone(), package_store_root, dist_root, &config.compiler_options.paths_alias, build_profile));
        let worker_pool = Arc::new(WorkerPool::new(config.worker_pool.clone(), mode, checker));
        let hmr = Arc::new(HmrTracker::new());
        let orchestrator = Orchestrator::new(config.clone(), resolver.clone(), worker_pool.clone(), hmr.clone(), matches!(build_profile, BuildProfile::Production));
        Self { config, resolver, worker_pool, hmr, orchestrator }
    }

    /// Construct with the bundled reference type-checker (spec.md §1's
    /// "not a production-grade TS compiler" stance) rather than a caller
    /// supplied one.
    pub fn init_default(config: ResolvedConfig, mode: CliMode, package_store_root: PathBuf) -> Self {
        Self::init(config, mode, package_store_root, Arc::new(NullTypeChecker))
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.worker_pool
    }

    pub fn hmr(&self) -> &Arc<HmrTracker> {
        &self.hmr
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Tear down the worker pool's threads, per spec.md §4.3 "Termination
    /// semantics". The caches and resolver index are process memory and
    /// simply drop with `self`.
    pub fn shutdown(self) {
        match Arc::try_unwrap(self.worker_pool) {
            Ok(pool) => pool.shutdown(),
            Err(_) => tracing::warn!("worker pool still has outstanding references at shutdown"),
        }
    }
}
