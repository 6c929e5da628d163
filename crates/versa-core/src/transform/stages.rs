//! The six concrete transform stages named in spec.md §4.2. These are
//! deliberately reference-grade: a real TS/SFC/minifier engine is an
//! external collaborator (spec.md §1), so these stages implement just
//! enough text-level transformation to be deterministic and exercise the
//! pipeline's caching, ordering, and dependency-collection machinery.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use super::{StageInput, StageOutput, StageResult, TransformStage};

static IMPORT_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^(?P<prefix>\s*(?:export\s+)?import\s+(?:type\s+)?[^'"]*?from\s*)(?P<quote>['"])(?P<spec>[^'"]+)['"]"#).unwrap());

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?P<prefix>\bimport\s*\()\s*(?P<quote>['"])(?P<spec>[^'"]+)['"]"#).unwrap());

static RE_EXPORT_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^(?P<prefix>\s*export\s+(?:\*|\{[^}]*\})\s*from\s*)(?P<quote>['"])(?P<spec>[^'"]+)['"]"#).unwrap());

fn collect_import_specs(code: &str) -> Vec<String> {
    let mut specs = Vec::new();
    for re in [&*IMPORT_STMT, &*DYNAMIC_IMPORT, &*RE_EXPORT_FROM] {
        for caps in re.captures_iter(code) {
            let spec = caps["spec"].to_string();
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
    }
    specs
}

fn is_in_project_specifier(spec: &str) -> bool {
    spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('@') || spec.starts_with('#')
}

/// `type-strip`: remove TypeScript-only syntax, producing plain JS.
///
/// Known limitation: the stripper works on raw text rather than a real
/// AST, so it can mis-handle type annotations inside string/template
/// literals. Acceptable for a reference implementation whose job is to
/// exercise the pipeline, not to be a TypeScript compiler.
pub struct TypeStrip;

static IMPORT_TYPE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+type\s+[^\n]*?;\s*$\n?"#).unwrap());
static INLINE_TYPE_ANNOTATION: Lazy<Regex> = Lazy::new(|| Regex::new(r#":\s*[^,;=(){}\n]+"#).unwrap());
static AS_CAST: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\s+as\s+(const|[A-Za-z_][\w.\[\]<>]*)"#).unwrap());
static NON_NULL_ASSERTION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w)\]])!(\s*[;,)\].\n])"#).unwrap());
static PARAM_MODIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\b(public|private|protected|readonly)\s+"#).unwrap());
static OPTIONAL_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w)\?:"#).unwrap());

fn remove_brace_blocks(code: &str, keyword: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let bytes = code.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let preceded_by_boundary = code[..i].chars().last().map(|c| !c.is_alphanumeric() && c != '_').unwrap_or(true);
        let followed_by_boundary = code[i + keyword.len()..].chars().next().map(|c| !c.is_alphanumeric() && c != '_').unwrap_or(true);
        if code[i..].starts_with(keyword) && preceded_by_boundary && followed_by_boundary {
            if let Some(brace_rel) = code[i..].find('{') {
                let semicolon_rel = code[i..i + brace_rel].find(';');
                if semicolon_rel.is_none() {
                    let brace_start = i + brace_rel;
                    let mut depth = 0i32;
                    let mut found_end = None;
                    for (offset, ch) in code[brace_start..].char_indices() {
                        match ch {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    found_end = Some(brace_start + offset + 1);
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if let Some(end) = found_end {
                        i = end;
                        continue;
                    }
                }
            }
        }
        let ch = code[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn remove_type_alias_statements(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    while i < code.len() {
        let rest = &code[i..];
        let starts_boundary = code[..i].chars().last().map(|c| !c.is_alphanumeric() && c != '_').unwrap_or(true);
        if starts_boundary && (rest.starts_with("type ") || rest.starts_with("export type ")) {
            if let Some(semi_rel) = rest.find(';') {
                let segment = &rest[..semi_rel];
                // heuristic: a type alias statement contains '=' before the semicolon
                // and no unmatched opening brace (blocks are skipped separately).
                if segment.contains('=') {
                    i += semi_rel + 1;
                    if code[i..].starts_with('\n') {
                        i += 1;
                    }
                    continue;
                }
            }
        }
        let ch = rest.chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

impl TransformStage for TypeStrip {
    fn name(&self) -> &'static str {
        "type-strip"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let mut code = input.code;
        code = IMPORT_TYPE_LINE.replace_all(&code, "").into_owned();
        code = remove_brace_blocks(&code, "interface");
        code = remove_type_alias_statements(&code);
        code = AS_CAST.replace_all(&code, "").into_owned();
        code = NON_NULL_ASSERTION.replace_all(&code, "$1$2").into_owned();
        code = PARAM_MODIFIER.replace_all(&code, "").into_owned();
        code = OPTIONAL_MARKER.replace_all(&code, "$1:").into_owned();
        code = INLINE_TYPE_ANNOTATION.replace_all(&code, "").into_owned();
        Ok(StageOutput::unchanged(code))
    }
}

/// `sfc-compile`: parse `<template>`/`<script>`/`<style>` blocks and
/// compile them into a single JS module with a default-exported
/// component descriptor, per spec.md §4.2.
pub struct SfcCompile;

static TEMPLATE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<template[^>]*>(.*?)</template>").unwrap());
static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)<script(?P<attrs>[^>]*)>(?P<body>.*?)</script>"#).unwrap());

impl TransformStage for SfcCompile {
    fn name(&self) -> &'static str {
        "sfc-compile"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let source = input.code;
        let template = TEMPLATE_BLOCK.captures(&source).map(|c| c[1].trim().to_string()).unwrap_or_default();
        let script = SCRIPT_BLOCK.captures(&source).map(|c| c["body"].trim().to_string()).unwrap_or_default();

        let deps = collect_import_specs(&script);

        let template_literal = template.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${");
        let mut out = String::new();
        out.push_str(&script);
        out.push_str("\n\nexport const __versa_template__ = `");
        out.push_str(&template_literal);
        out.push_str("`;\n");
        out.push_str("if (typeof __versa_default__ !== \"undefined\") { __versa_default__.template = __versa_template__; }\n");

        Ok(StageOutput { code: out, map: Some("sfc-compile".to_string()), deps, hmr_deps: Vec::new() })
    }
}

/// `alias-rewrite`: rewrite import specifiers via the resolver's alias
/// and module tables; normalise extensions for local imports.
pub struct AliasRewrite;

impl TransformStage for AliasRewrite {
    fn name(&self) -> &'static str {
        "alias-rewrite"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let resolver = input.resolver;
        let deps = collect_import_specs(&input.code);

        let rewrite_spec = |spec: &str| -> String {
            if let Some(resolver) = resolver {
                if let Some(out) = resolver.resolve_alias(spec) {
                    return out;
                }
            }
            if spec.starts_with("./") || spec.starts_with("../") {
                if spec.ends_with(".ts") {
                    return format!("{}.js", &spec[..spec.len() - 3]);
                }
                if spec.ends_with(".sfc") {
                    return format!("{}.js", &spec[..spec.len() - 4]);
                }
                if !spec.rsplit('/').next().unwrap_or("").contains('.') {
                    return format!("{spec}.js");
                }
            }
            spec.to_string()
        };

        let mut code = input.code;
        for re in [&*IMPORT_STMT, &*RE_EXPORT_FROM] {
            code = re
                .replace_all(&code, |caps: &regex::Captures| {
                    let spec = &caps["spec"];
                    format!("{}{}{}{}", &caps["prefix"], &caps["quote"], rewrite_spec(spec), &caps["quote"])
                })
                .into_owned();
        }
        code = DYNAMIC_IMPORT
            .replace_all(&code, |caps: &regex::Captures| format!("{}{}{}{}", &caps["prefix"], &caps["quote"], rewrite_spec(&caps["spec"]), &caps["quote"]))
            .into_owned();

        Ok(StageOutput { code, map: None, deps, hmr_deps: Vec::new() })
    }
}

/// `hmr-instrument` (non-production only): for each in-project import,
/// append a unique placeholder query token and record the mapping for
/// the HMR tracker, per spec.md §4.2 and §4.5.
pub struct HmrInstrument;

impl TransformStage for HmrInstrument {
    fn name(&self) -> &'static str {
        "hmr-instrument"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let mut hmr_deps = Vec::new();
        let mut code = input.code;

        for re in [&*IMPORT_STMT, &*RE_EXPORT_FROM] {
            code = re
                .replace_all(&code, |caps: &regex::Captures| {
                    let spec = caps["spec"].to_string();
                    if is_in_project_specifier(&spec) {
                        let token = format!("__hmr_placeholder_{}", Uuid::new_v4().simple());
                        hmr_deps.push((spec.clone(), token.clone()));
                        format!("{}{}{}?{}{}", &caps["prefix"], &caps["quote"], spec, token, &caps["quote"])
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned();
        }

        Ok(StageOutput { code, map: None, deps: Vec::new(), hmr_deps })
    }
}

/// `strip-template-tag`: remove a no-op tagged-template DSL marker
/// (`html`/`css`/`gql`) used purely for editor syntax highlighting.
pub struct StripTemplateTag;

static TEMPLATE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(html|css|gql)(`)").unwrap());

impl TransformStage for StripTemplateTag {
    fn name(&self) -> &'static str {
        "strip-template-tag"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let code = TEMPLATE_TAG.replace_all(&input.code, "$2").into_owned();
        Ok(StageOutput::unchanged(code))
    }
}

/// `remove-preserve-comments`: strip `@preserve` annotations left by
/// upstream passes.
pub struct RemovePreserveComments;

static PRESERVE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*[^*]*@preserve[^*]*\*+(?:[^/*][^*]*\*+)*/").unwrap());

impl TransformStage for RemovePreserveComments {
    fn name(&self) -> &'static str {
        "remove-preserve-comments"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let code = PRESERVE_COMMENT.replace_all(&input.code, "").into_owned();
        Ok(StageOutput::unchanged(code))
    }
}

/// `minify` (production only): strip comments and collapse whitespace.
/// No identifier mangling: a real minifier's mangling pass is an
/// external collaborator (spec.md §1).
pub struct Minify;

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(^|[^:])//[^\n]*$").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static EXTRA_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

impl TransformStage for Minify {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, input: StageInput<'_>) -> StageResult {
        let mut code = BLOCK_COMMENT.replace_all(&input.code, "").into_owned();
        code = LINE_COMMENT.replace_all(&code, "$1").into_owned();
        code = code.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
        code = EXTRA_WHITESPACE.replace_all(&code, " ").into_owned();
        code = BLANK_LINES.replace_all(&code, "\n").into_owned();
        let trimmed = code.trim().to_string();

        // Empty output from non-empty input is classified by the
        // orchestrator as `VersaError::empty_output`, not here.
        Ok(StageOutput { code: trimmed, map: Some("minify".to_string()), deps: Vec::new(), hmr_deps: Vec::new() })
    }
}
