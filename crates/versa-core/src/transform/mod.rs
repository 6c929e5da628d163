//! The transform pipeline: an ordered list of named, cacheable stages
//! that turn one source file's bytes into browser-ready JS, per
//! spec.md §4.2.

mod cache;
pub mod stages;

pub use cache::TransformCache;

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{BuildProfile, TransformCacheConfig};
use crate::error::VersaError;
use crate::resolver::Resolver;

/// Source file extensions the orchestrator recognises, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Ts,
    Sfc,
    Js,
}

impl SourceKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" => Some(SourceKind::Ts),
            "sfc" => Some(SourceKind::Sfc),
            "js" => Some(SourceKind::Js),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Ts => "ts",
            SourceKind::Sfc => "sfc",
            SourceKind::Js => "js",
        }
    }
}

/// Options threaded through every stage invocation. Cached results are
/// keyed partly on a canonical JSON rendering of this struct, per
/// spec.md §4.2 "Caching".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOptions {
    pub build_profile_is_production: bool,
    pub script_lang_is_ts: bool,
    pub type_check_enabled: bool,
}

impl TransformOptions {
    pub fn new(build_profile: BuildProfile) -> Self {
        Self {
            build_profile_is_production: matches!(build_profile, BuildProfile::Production),
            script_lang_is_ts: false,
            type_check_enabled: true,
        }
    }

    fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Input given to a single stage.
pub struct StageInput<'a> {
    pub code: String,
    pub filename: &'a Path,
    pub options: &'a TransformOptions,
    pub resolver: Option<&'a Resolver>,
}

/// Output produced by a single stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub code: String,
    /// Opaque per-stage source map fragment; spec.md §9(c): metadata-only,
    /// never position-accurate.
    pub map: Option<String>,
    /// Import specifiers this stage observed, deduplicated by the pipeline.
    pub deps: Vec<String>,
    /// `(original-specifier -> placeholder-token)`, populated only by
    /// `hmr-instrument`.
    pub hmr_deps: Vec<(String, String)>,
}

impl StageOutput {
    pub fn unchanged(code: String) -> Self {
        Self { code, map: None, deps: Vec::new(), hmr_deps: Vec::new() }
    }
}

pub type StageResult = Result<StageOutput, String>;

/// A single named transform, per spec.md §4.2 "Recognised stages".
pub trait TransformStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: StageInput<'_>) -> StageResult;
}

/// Pick the stage order for a source extension, per spec.md §4.2
/// "Order selection".
pub fn stage_order(kind: SourceKind, non_production: bool, production: bool, script_lang_is_ts: bool) -> Vec<Box<dyn TransformStage>> {
    let hmr = non_production;
    let minify = production;
    match kind {
        SourceKind::Ts => {
            let mut v: Vec<Box<dyn TransformStage>> = vec![Box::new(stages::TypeStrip)];
            if hmr {
                v.push(Box::new(stages::HmrInstrument));
            }
            v.push(Box::new(stages::AliasRewrite));
            if minify {
                v.push(Box::new(stages::Minify));
            }
            v
        }
        SourceKind::Sfc => {
            let mut v: Vec<Box<dyn TransformStage>> = vec![Box::new(stages::SfcCompile)];
            if script_lang_is_ts {
                v.push(Box::new(stages::TypeStrip));
            }
            if hmr {
                v.push(Box::new(stages::HmrInstrument));
            }
            v.push(Box::new(stages::StripTemplateTag));
            v.push(Box::new(stages::RemovePreserveComments));
            v.push(Box::new(stages::AliasRewrite));
            if minify {
                v.push(Box::new(stages::Minify));
            }
            v
        }
        SourceKind::Js => {
            let mut v: Vec<Box<dyn TransformStage>> = Vec::new();
            if hmr {
                v.push(Box::new(stages::HmrInstrument));
            }
            v.push(Box::new(stages::AliasRewrite));
            if minify {
                v.push(Box::new(stages::Minify));
            }
            v
        }
    }
}

/// A composed, chain-preserving source map, per spec.md §4.2
/// "Source-map chain". Records chain length and per-stage names only;
/// exact position remapping is explicitly out of scope (spec.md §9(c)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapChain {
    pub chain_length: usize,
    pub stage_names: Vec<String>,
}

impl SourceMapChain {
    pub fn to_data_url(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        format!("data:application/json;charset=utf-8;base64,{encoded}")
    }
}

/// The result of running the full pipeline over one file.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub code: String,
    pub source_map: Option<SourceMapChain>,
    pub deps: Vec<String>,
    pub hmr_deps: Vec<(String, String)>,
}

/// Applies an ordered list of stages with per-invocation caching, per
/// spec.md §4.2.
pub struct TransformPipeline {
    cache: TransformCache,
    resolver: Arc<Resolver>,
}

impl TransformPipeline {
    pub fn new(config: &TransformCacheConfig, resolver: Arc<Resolver>) -> Self {
        Self { cache: TransformCache::new(config.max_entries, config.max_bytes), resolver }
    }

    fn cache_key(code: &str, stage_names: &[&str], options: &TransformOptions, filename: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hasher.update(stage_names.join(",").as_bytes());
        hasher.update(options.canonical_json().as_bytes());
        hasher.update(filename.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Run `stages` in order over `code`, per spec.md §4.2 and §5
    /// "Ordering guarantees": stages of one compile always run in the
    /// declared order.
    pub fn run(&self, code: &str, filename: &Path, stages: &[Box<dyn TransformStage>], options: &TransformOptions) -> Result<PipelineResult, VersaError> {
        let stage_names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        let key = Self::cache_key(code, &stage_names, options, filename);

        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let mut current = code.to_string();
        let mut maps = Vec::new();
        let mut deps: Vec<String> = Vec::new();
        let mut hmr_deps: Vec<(String, String)> = Vec::new();

        for stage in stages {
            let input = StageInput { code: current, filename, options, resolver: Some(&self.resolver) };
            let output = stage.apply(input).map_err(|message| VersaError::TransformFailure {
                stage: stage.name().to_string(),
                file: filename.to_path_buf(),
                message,
            })?;
            current = output.code;
            if let Some(map) = output.map {
                maps.push(map);
            }
            for dep in output.deps {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            hmr_deps.extend(output.hmr_deps);
        }

        let source_map = if maps.is_empty() {
            None
        } else {
            Some(SourceMapChain { chain_length: maps.len(), stage_names: stage_names.iter().map(|s| s.to_string()).collect() })
        };

        let result = PipelineResult { code: current, source_map, deps, hmr_deps };
        self.cache.put(key, result.clone());
        Ok(result)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use std::path::PathBuf;

    fn test_resolver() -> Arc<Resolver> {
        Arc::new(Resolver::new(ResolverConfig::default(), PathBuf::from("/tmp/nope"), "dist".into(), &Default::default(), BuildProfile::Development))
    }

    #[test]
    fn ts_order_includes_hmr_in_development() {
        let stages = stage_order(SourceKind::Ts, true, false, false);
        let names: Vec<_> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["type-strip", "hmr-instrument", "alias-rewrite"]);
    }

    #[test]
    fn ts_order_includes_minify_in_production_without_hmr() {
        let stages = stage_order(SourceKind::Ts, false, true, false);
        let names: Vec<_> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["type-strip", "alias-rewrite", "minify"]);
    }

    #[test]
    fn sfc_order_matches_spec() {
        let stages = stage_order(SourceKind::Sfc, true, false, true);
        let names: Vec<_> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["sfc-compile", "type-strip", "hmr-instrument", "strip-template-tag", "remove-preserve-comments", "alias-rewrite"]);
    }

    #[test]
    fn pipeline_is_deterministic() {
        let resolver = test_resolver();
        let pipeline = TransformPipeline::new(&TransformCacheConfig::default(), resolver);
        let stages = stage_order(SourceKind::Js, false, false, false);
        let options = TransformOptions::new(BuildProfile::Development);
        let filename = PathBuf::from("a.js");
        let code = "const x = 1;\n";

        let first = pipeline.run(code, &filename, &stages, &options).unwrap();
        let second = pipeline.run(code, &filename, &stages, &options).unwrap();
        assert_eq!(first.code, second.code);
    }
}
