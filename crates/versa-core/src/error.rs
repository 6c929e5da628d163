//! Error kinds the core must distinguish, per spec §7.
//!
//! `ResolverMiss` is deliberately absent here: a resolver miss is not an
//! error, it is `Ok(None)` (see [`crate::resolver::Resolver::resolve_module`]).

use std::path::PathBuf;

use thiserror::Error;

/// A single diagnostic location, used by `SyntaxError` and `TypeCheckError`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self { file: file.into(), line, column, message: message.into() }
    }
}

/// Every error kind the core distinguishes, per spec.md §7.
#[derive(Debug, Clone, Error)]
pub enum VersaError {
    /// Config file missing or malformed. Aborts startup (exit code 2).
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    /// I/O error reading a source file. Reported per file; that file's
    /// compile fails, the run continues.
    #[error("failed to read {path}: {message}")]
    SourceReadFailed { path: PathBuf, message: String },

    /// Parse or type-strip failure, with precise location.
    #[error("{file}:{line}:{column}: {message}", file = file.display())]
    SyntaxError { file: PathBuf, line: u32, column: u32, message: String },

    /// Diagnostics from the type-check worker pool.
    #[error("type errors in {file}: {}", .diagnostics.len())]
    TypeCheckError { file: PathBuf, diagnostics: Vec<Diagnostic> },

    /// A transform pipeline stage returned an error.
    #[error("transform stage `{stage}` failed on {file}: {message}", file = file.display())]
    TransformFailure { stage: String, file: PathBuf, message: String },

    /// A worker did not respond within its computed per-task timeout.
    /// Recoverable: the dispatcher retries once on the in-process fallback.
    #[error("worker timed out after {elapsed_ms}ms checking {file}", file = file.display())]
    WorkerTimeout { file: PathBuf, elapsed_ms: u64 },

    /// A worker exited unexpectedly. Its pending tasks reject with this
    /// kind; the pool replaces the worker and the orchestrator may retry.
    #[error("worker {worker_id} crashed: {message}")]
    WorkerCrash { worker_id: u32, message: String },
}

impl VersaError {
    /// Treat a non-empty input that minified to nothing as a syntax error,
    /// per spec.md §7 ("EmptyOutput ... treated as SyntaxError").
    pub fn empty_output(file: PathBuf) -> Self {
        VersaError::SyntaxError {
            file,
            line: 0,
            column: 0,
            message: "non-empty input produced empty output after minification".to_string(),
        }
    }

    /// The source file this error is about, if any (process-wide errors
    /// such as `ConfigInvalid` have none).
    pub fn file(&self) -> Option<&std::path::Path> {
        match self {
            VersaError::SourceReadFailed { path, .. } => Some(path),
            VersaError::SyntaxError { file, .. } => Some(file),
            VersaError::TypeCheckError { file, .. } => Some(file),
            VersaError::TransformFailure { file, .. } => Some(file),
            VersaError::WorkerTimeout { file, .. } => Some(file),
            VersaError::ConfigInvalid(_) | VersaError::WorkerCrash { .. } => None,
        }
    }

    /// Whether this error should abort the whole process rather than just
    /// fail one file's compile. Only `ConfigInvalid` does today; watcher
    /// death is handled separately by the CLI layer.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, VersaError::ConfigInvalid(_))
    }

    /// Process exit code per spec.md §6: 0 success, 1 compile errors
    /// present, 2 configuration invalid.
    pub fn exit_code(&self) -> i32 {
        if self.is_process_fatal() { 2 } else { 1 }
    }
}

pub type VersaResult<T> = Result<T, VersaError>;
