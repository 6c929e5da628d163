//! The type-checker seam. A real TS type checker is an external
//! collaborator (spec.md §1); `versa-core` drives it through this trait
//! and ships a syntactic reference implementation good enough to make
//! the worker pool's dispatch, timeout, and recycling logic testable.

use std::path::Path;

use versa_common::position::LineMap;

use crate::error::Diagnostic;

/// Per-file options that both size the per-task timeout (spec.md §4.3)
/// and get forwarded to the checker.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TypeCheckOptions {
    pub strict: bool,
    pub no_implicit_any: bool,
    pub import_count: u32,
    pub type_alias_count: u32,
    pub interface_count: u32,
    pub generic_count: u32,
}

impl TypeCheckOptions {
    /// Cheap syntactic scan used both to populate these counts for real
    /// callers and, doubling as the structural-count input to the
    /// timeout formula in spec.md §4.3.
    pub fn scan(source: &str) -> Self {
        Self {
            strict: false,
            no_implicit_any: false,
            import_count: source.matches("import ").count() as u32,
            type_alias_count: source.matches("type ").count() as u32,
            interface_count: source.matches("interface ").count() as u32,
            generic_count: source.matches('<').count() as u32,
        }
    }

    pub fn structural_count(&self) -> f64 {
        self.import_count as f64 + self.type_alias_count as f64 + self.interface_count as f64 + 0.5 * self.generic_count as f64
    }
}

/// Drives an out-of-process (or, here, in-thread) type checker.
pub trait TypeChecker: Send + Sync {
    fn check(&self, filename: &Path, source: &str, options: &TypeCheckOptions) -> Vec<Diagnostic>;
}

/// Never reports an error; used as a fallback when no real checker is
/// configured and as a baseline in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTypeChecker;

impl TypeChecker for NullTypeChecker {
    fn check(&self, _filename: &Path, _source: &str, _options: &TypeCheckOptions) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// A syntactic sanity checker: flags unbalanced brackets. Good enough to
/// exercise the "intentionally broken" throughput scenario in spec.md §8
/// without depending on a real TS grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalancedBracketsChecker;

impl TypeChecker for BalancedBracketsChecker {
    fn check(&self, filename: &Path, source: &str, _options: &TypeCheckOptions) -> Vec<Diagnostic> {
        // Track byte offsets during the scan and only convert to
        // line/column (via `versa_common`'s `LineMap`, the same
        // offset<->position conversion a real incremental checker would
        // use for LSP-facing diagnostics) once a bracket actually fails
        // to match, rather than maintaining a running line/column pair.
        let line_map = LineMap::build(source);
        let mut stack: Vec<(char, u32)> = Vec::new();
        let mut offset = 0u32;
        for ch in source.chars() {
            match ch {
                '(' | '[' | '{' => stack.push((ch, offset)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            let pos = line_map.offset_to_position(offset, source);
                            return vec![Diagnostic::new(filename, pos.line, pos.character, format!("unexpected closing `{ch}`"))];
                        }
                    }
                }
                _ => {}
            }
            offset += ch.len_utf8() as u32;
        }
        if let Some((open, offset)) = stack.pop() {
            let pos = line_map.offset_to_position(offset, source);
            return vec![Diagnostic::new(filename, pos.line, pos.character, format!("unclosed `{open}`"))];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn balanced_brackets_pass() {
        let checker = BalancedBracketsChecker;
        let diags = checker.check(&PathBuf::from("a.ts"), "function f() { return [1, 2]; }", &TypeCheckOptions::default());
        assert!(diags.is_empty());
    }

    #[test]
    fn unbalanced_brackets_fail() {
        let checker = BalancedBracketsChecker;
        let diags = checker.check(&PathBuf::from("a.ts"), "function f() { return [1, 2; }", &TypeCheckOptions::default());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn structural_count_weighs_generics_by_half() {
        let options = TypeCheckOptions { import_count: 0, type_alias_count: 0, interface_count: 0, generic_count: 4, strict: false, no_implicit_any: false };
        assert_eq!(options.structural_count(), 2.0);
    }
}
