//! Compile Orchestrator, per spec.md §4.4: turns one source path into one
//! compiled output, exactly once, deterministically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::error::{VersaError, VersaResult};
use crate::hmr::{HmrTracker, SfcCacheEntry};
use crate::parse_cache::{AstHandle, ParseCache};
use crate::resolver::Resolver;
use crate::transform::{stage_order, sha256_hex, PipelineResult, SourceKind, TransformOptions, TransformPipeline};
use crate::typecheck::{TypeCheckOptions, TypeChecker};
use crate::workerpool::WorkerPool;

/// Why a compile was skipped rather than run, per spec.md §4.4 steps 1/3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DeclarationFile,
    EmptySource,
}

/// Result of one `compileFile` call.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub source_path: PathBuf,
    pub dest_path: Option<PathBuf>,
    pub content_written: bool,
    pub skipped: Option<SkipReason>,
    pub error: Option<VersaError>,
    pub deps: Vec<String>,
    pub hmr_deps: Vec<(String, String)>,
}

impl CompileOutcome {
    fn skip(source_path: PathBuf, reason: SkipReason) -> Self {
        Self { source_path, dest_path: None, content_written: false, skipped: Some(reason), error: None, deps: Vec::new(), hmr_deps: Vec::new() }
    }

    fn failed(source_path: PathBuf, dest_path: Option<PathBuf>, error: VersaError) -> Self {
        Self { source_path, dest_path, content_written: false, skipped: None, error: Some(error), deps: Vec::new(), hmr_deps: Vec::new() }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.skipped.is_none()
    }
}

fn script_lang_is_ts(sfc_source: &str) -> bool {
    sfc_source.contains("lang=\"ts\"") || sfc_source.contains("lang='ts'")
}

fn destination_path(source_path: &Path, source_root: &Path, out_dir: &Path) -> Option<PathBuf> {
    let relative = source_path.strip_prefix(source_root).ok()?;
    Some(out_dir.join(relative).with_extension("js"))
}

/// Turns one source file into one compiled output, per spec.md §4.4.
/// Guarantees: exactly one write per successful compile, byte-identical
/// output for identical (bytes, options), no overwrite on partial failure.
pub struct Orchestrator {
    config: ResolvedConfig,
    resolver: Arc<Resolver>,
    pipeline: TransformPipeline,
    parse_cache: ParseCache,
    worker_pool: Arc<WorkerPool>,
    hmr: Arc<HmrTracker>,
    build_profile_is_production: bool,
}

impl Orchestrator {
    pub fn new(config: ResolvedConfig, resolver: Arc<Resolver>, worker_pool: Arc<WorkerPool>, hmr: Arc<HmrTracker>, build_profile_is_production: bool) -> Self {
        let pipeline = TransformPipeline::new(&config.transform_cache, resolver.clone());
        let parse_cache = ParseCache::new(&config.parse_cache);
        Self { config, resolver, pipeline, parse_cache, worker_pool, hmr, build_profile_is_production }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// `compileFile(path) -> CompileResult`, per spec.md §4.4.
    pub fn compile_file(&self, path: &Path) -> CompileOutcome {
        let source_path = path.to_path_buf();

        // Step 1: `.d.ts` files are not compilable.
        if source_path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(".d.ts")) {
            return CompileOutcome::skip(source_path, SkipReason::DeclarationFile);
        }

        // Step 2: destination path.
        let dest_path = destination_path(&source_path, &self.config.compiler_options.source_root, &self.config.compiler_options.out_dir);

        // Step 3: read source.
        let source = match std::fs::read_to_string(&source_path) {
            Ok(s) => s,
            Err(e) => {
                return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::SourceReadFailed { path: source_path, message: e.to_string() });
            }
        };
        if source.trim().is_empty() {
            return CompileOutcome::skip(source_path, SkipReason::EmptySource);
        }

        let Some(extension) = source_path.extension().and_then(|e| e.to_str()) else {
            return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::SyntaxError { file: source_path, line: 0, column: 0, message: "unrecognised extension".into() });
        };
        let Some(kind) = SourceKind::from_extension(extension) else {
            return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::SyntaxError { file: source_path, line: 0, column: 0, message: format!("unsupported extension `{extension}`") });
        };

        self.remember_parse(&source_path, &source);

        let is_ts_script = match kind {
            SourceKind::Ts => true,
            SourceKind::Sfc => script_lang_is_ts(&source),
            SourceKind::Js => false,
        };

        // Step 4: select the transform list.
        let stages = stage_order(kind, !self.build_profile_is_production, self.build_profile_is_production, is_ts_script);
        let mut options = TransformOptions::new(if self.build_profile_is_production { crate::config::BuildProfile::Production } else { crate::config::BuildProfile::Development });
        options.script_lang_is_ts = is_ts_script;

        // Step 5: type-check on the worker pool.
        if options.type_check_enabled && is_ts_script {
            let tc_options = TypeCheckOptions::scan(&source);
            match self.worker_pool.type_check(&source_path, &source, &tc_options) {
                Ok(diagnostics) if !diagnostics.is_empty() => {
                    if self.config.type_errors_are_warnings {
                        for d in &diagnostics {
                            warn!(file = %d.file.display(), line = d.line, column = d.column, "{}", d.message);
                        }
                    } else {
                        return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::TypeCheckError { file: source_path, diagnostics });
                    }
                }
                Ok(_) => {}
                Err(e) => return CompileOutcome::failed(source_path.clone(), dest_path, e),
            }
        }

        // Step 6: run the transform pipeline.
        let result: PipelineResult = match self.pipeline.run(&source, &source_path, &stages, &options) {
            Ok(r) => r,
            Err(e) => return CompileOutcome::failed(source_path.clone(), dest_path, e),
        };

        // Step 7: empty output from non-empty input is a failure.
        if result.code.trim().is_empty() {
            return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::empty_output(source_path));
        }

        // Step 8: stash an SFC cache entry if HMR placeholders exist.
        if kind == SourceKind::Sfc && !result.hmr_deps.is_empty() {
            let Some(dest) = dest_path.clone() else {
                return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::SyntaxError { file: source_path, line: 0, column: 0, message: "SFC source is outside the configured source root".into() });
            };
            self.hmr.store(source_path.clone(), SfcCacheEntry { dest_path: dest, code: result.code.clone(), hmr_deps: result.hmr_deps.clone() });
        }

        let Some(dest) = dest_path.clone() else {
            return CompileOutcome::failed(source_path.clone(), dest_path, VersaError::SyntaxError { file: source_path, line: 0, column: 0, message: "source is outside the configured source root".into() });
        };

        // Steps 9-10: create the destination directory and write atomically.
        if let Err(e) = write_atomic(&dest, result.code.as_bytes()) {
            return CompileOutcome::failed(source_path.clone(), Some(dest), VersaError::SourceReadFailed { path: source_path, message: e.to_string() });
        }

        info!(source = %source_path.display(), dest = %dest.display(), "compiled");
        CompileOutcome { source_path, dest_path: Some(dest), content_written: true, skipped: None, error: None, deps: result.deps, hmr_deps: result.hmr_deps }
    }

    fn remember_parse(&self, path: &Path, source: &str) {
        let mtime_ms = std::fs::metadata(path).and_then(|m| m.modified()).ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_millis() as u64).unwrap_or(0);
        let hash = sha256_hex(source.as_bytes());
        if self.parse_cache.get(&path.to_path_buf(), mtime_ms, &hash).is_none() {
            self.parse_cache.put(path.to_path_buf(), mtime_ms, hash, AstHandle(source.to_string()));
        }
    }
}

/// Write-then-rename so a reader never observes a partially written file,
/// per spec.md §4.4's "exactly one output write" guarantee.
fn write_atomic(dest: &Path, bytes: &[u8]) -> VersaResult<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VersaError::SourceReadFailed { path: parent.to_path_buf(), message: e.to_string() })?;
    }
    let tmp = dest.with_extension(format!("{}.tmp", dest.extension().and_then(|e| e.to_str()).unwrap_or("js")));
    std::fs::write(&tmp, bytes).map_err(|e| VersaError::SourceReadFailed { path: tmp.clone(), message: e.to_string() })?;
    std::fs::rename(&tmp, dest).map_err(|e| VersaError::SourceReadFailed { path: dest.to_path_buf(), message: e.to_string() })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildProfile as CfgBuildProfile, CliMode, ResolverConfig};
    use crate::typecheck::{BalancedBracketsChecker, NullTypeChecker};
    use std::sync::Arc as StdArc;
    use tempfile::tempdir;

    fn orchestrator(dir: &Path, checker: Arc<dyn TypeChecker>) -> Orchestrator {
        let mut config = ResolvedConfig::default();
        config.compiler_options.source_root = dir.join("src");
        config.compiler_options.out_dir = dir.join("dist");
        let resolver = StdArc::new(Resolver::new(ResolverConfig::default(), dir.join("node_modules"), "dist".into(), &Default::default(), CfgBuildProfile::Development));
        let worker_pool = StdArc::new(WorkerPool::new(config.worker_pool.clone(), CliMode::Watch, checker));
        let hmr = StdArc::new(HmrTracker::new());
        Orchestrator::new(config, resolver, worker_pool, hmr, false)
    }

    #[test]
    fn skips_declaration_files() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), StdArc::new(NullTypeChecker));
        let outcome = orch.compile_file(Path::new("foo.d.ts"));
        assert_eq!(outcome.skipped, Some(SkipReason::DeclarationFile));
    }

    #[test]
    fn compiles_ts_file_and_writes_output() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let src = dir.path().join("src/a.ts");
        std::fs::write(&src, "const x: number = 1;\nexport { x };\n").unwrap();

        let orch = orchestrator(dir.path(), StdArc::new(NullTypeChecker));
        let outcome = orch.compile_file(&src);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert!(outcome.content_written);
        let dest = outcome.dest_path.unwrap();
        assert!(dest.exists());
        let written = std::fs::read_to_string(&dest).unwrap();
        assert!(!written.contains(": number"));
    }

    #[test]
    fn fails_on_type_errors_by_default() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let src = dir.path().join("src/broken.ts");
        std::fs::write(&src, "const x = [1, 2;\n").unwrap();

        let orch = orchestrator(dir.path(), StdArc::new(BalancedBracketsChecker));
        let outcome = orch.compile_file(&src);
        assert!(!outcome.is_success());
        assert!(matches!(outcome.error, Some(VersaError::TypeCheckError { .. })));
    }

    #[test]
    fn deterministic_output_for_identical_input() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let src = dir.path().join("src/a.ts");
        std::fs::write(&src, "const x: number = 1;\n").unwrap();

        let orch = orchestrator(dir.path(), StdArc::new(NullTypeChecker));
        let first = orch.compile_file(&src);
        let dest = first.dest_path.clone().unwrap();
        let first_bytes = std::fs::read(&dest).unwrap();
        let second = orch.compile_file(&src);
        let second_bytes = std::fs::read(&second.dest_path.unwrap()).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }
}
