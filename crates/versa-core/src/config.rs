//! `versa.config.json` schema and defaults, per spec.md §6.
//!
//! Loading the document off disk (JSON/JSON5) is the CLI layer's job
//! (`versa-cli::config_loader`); this module owns the resolved, validated
//! shape every `versa-core` component is built against.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VersaError;

/// Build mode, per spec.md §6's CLI surface: `{ mode, verbose }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliMode {
    Watch,
    All,
    Prod,
    Clean,
    LintOnly,
}

/// Whether the resolver should bias towards production or development
/// package entry points (spec.md §4.1, "Development bias" / "Production
/// bias scenario" in §8). Only `CliMode::Prod` is a production build;
/// every other mode (including `watch`) is development, matching the
/// teacher's `tsz-cli::driver` convention of treating anything that isn't
/// an explicit release build as a dev build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    Development,
    Production,
}

impl From<CliMode> for BuildProfile {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Prod => BuildProfile::Production,
            _ => BuildProfile::Development,
        }
    }
}

/// `compilerOptions` in `versa.config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerOptions {
    pub source_root: PathBuf,
    pub out_dir: PathBuf,
    pub paths_alias: HashMap<String, Vec<String>>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { source_root: PathBuf::from("./src"), out_dir: PathBuf::from("./dist"), paths_alias: HashMap::new() }
    }
}

/// `proxyConfig` in `versa.config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub proxy_url: Option<String>,
    pub assets_omit: bool,
}

/// `tailwindConfig` in `versa.config.json`; absence disables the pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailwindConfig {
    pub bin: String,
    pub input: String,
    pub output: String,
}

/// One entry of `linter` in `versa.config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinterConfig {
    pub name: String,
    pub bin: String,
    pub config_file: Option<String>,
    #[serde(default)]
    pub fix: bool,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// One entry of `bundlers` in `versa.config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerConfig {
    pub name: String,
    pub file_input: String,
    pub file_output: String,
}

/// Resolver tuning, exposing spec.md §9 open question (b): the "well-known
/// root directories" list is configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    pub well_known_roots: Vec<String>,
    pub excluded_packages: Vec<String>,
    pub resolution_cache_capacity: usize,
    pub resolution_cache_ttl_secs: u64,
    pub index_refresh_interval_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            well_known_roots: vec!["examples".into(), "src".into(), "app".into(), "lib".into()],
            excluded_packages: vec![
                "vite".into(),
                "esbuild".into(),
                "rollup".into(),
                "webpack".into(),
                "typescript".into(),
            ],
            resolution_cache_capacity: 2048,
            resolution_cache_ttl_secs: 300,
            index_refresh_interval_secs: 600,
        }
    }
}

impl ResolverConfig {
    pub fn resolution_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolution_cache_ttl_secs)
    }

    pub fn index_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.index_refresh_interval_secs)
    }
}

/// Worker pool tuning, per spec.md §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerPoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub init_timeout_ms: u64,
    pub dispatch_concurrency_cap: usize,
    pub memory_limit_bytes: u64,
    pub ttl_secs: u64,
    pub max_tasks_per_worker: u32,
    pub idle_timeout_secs: u64,
    pub max_consecutive_timeouts: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_size: 4,
            max_size: 16,
            init_timeout_ms: 3_000,
            dispatch_concurrency_cap: 5,
            memory_limit_bytes: 100 * 1024 * 1024,
            ttl_secs: 30 * 60,
            max_tasks_per_worker: 200,
            idle_timeout_secs: 5 * 60,
            max_consecutive_timeouts: 3,
        }
    }
}

impl WorkerPoolConfig {
    /// Per-mode ceiling override from spec.md §4.3 ("Modes batch / watch /
    /// individual adjust the ceiling (20 / 12 / 8 respectively)").
    pub fn ceiling_for_mode(&self, mode: CliMode) -> usize {
        match mode {
            CliMode::All | CliMode::Prod => 20,
            CliMode::Watch => 12,
            CliMode::LintOnly | CliMode::Clean => 8,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

/// Transform pipeline cache tuning, per spec.md §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformCacheConfig {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for TransformCacheConfig {
    fn default() -> Self {
        Self { max_entries: 200, max_bytes: 50 * 1024 * 1024 }
    }
}

/// Parse cache tuning, per spec.md §3 `ParseCacheEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseCacheConfig {
    pub max_entries: usize,
}

impl Default for ParseCacheConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

/// The fully resolved, validated configuration document, assembled from
/// `versa.config.json` merged with CLI overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub compiler_options: CompilerOptions,
    pub proxy_config: ProxyConfig,
    #[serde(rename = "aditionalWatch")]
    pub additional_watch: Vec<String>,
    pub tailwind_config: Option<TailwindConfig>,
    pub linter: Vec<LinterConfig>,
    pub bundlers: Vec<BundlerConfig>,
    pub resolver: ResolverConfig,
    pub worker_pool: WorkerPoolConfig,
    pub transform_cache: TransformCacheConfig,
    pub parse_cache: ParseCacheConfig,
    /// Decided open question (a): type errors block emit by default.
    pub type_errors_are_warnings: bool,
    pub debounce_ms: u64,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            compiler_options: CompilerOptions::default(),
            proxy_config: ProxyConfig::default(),
            additional_watch: Vec::new(),
            tailwind_config: None,
            linter: Vec::new(),
            bundlers: Vec::new(),
            resolver: ResolverConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            transform_cache: TransformCacheConfig::default(),
            parse_cache: ParseCacheConfig::default(),
            type_errors_are_warnings: false,
            debounce_ms: 500,
        }
    }
}

impl ResolvedConfig {
    /// Parse from an already-read JSON/JSON5 document (the CLI layer does
    /// the file I/O and JSON5-vs-JSON dispatch; this just validates shape).
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, VersaError> {
        serde_json::from_value(value).map_err(|e| VersaError::ConfigInvalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), VersaError> {
        if self.compiler_options.source_root.as_os_str().is_empty() {
            return Err(VersaError::ConfigInvalid("compilerOptions.sourceRoot must not be empty".into()));
        }
        if self.compiler_options.out_dir.as_os_str().is_empty() {
            return Err(VersaError::ConfigInvalid("compilerOptions.outDir must not be empty".into()));
        }
        if self.worker_pool.min_size == 0 || self.worker_pool.min_size > self.worker_pool.max_size {
            return Err(VersaError::ConfigInvalid("worker pool min_size must be > 0 and <= max_size".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
