//! Command-line surface, per spec.md §6: the core only ever sees the
//! parsed struct `{ mode, verbose }`; everything else (config file path,
//! project root) is a convenience the CLI layer adds on top.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use versa_core::config::CliMode;

/// Build mode, mirroring spec.md §6's `{ mode, verbose }` struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Mode {
    /// Watch the source tree and run the dev server with HMR.
    Watch,
    /// Compile every source file once.
    All,
    /// Compile every source file once, with minification enabled.
    Prod,
    /// Remove the output directory.
    Clean,
    /// Run configured linters only; do not compile.
    LintOnly,
}

impl From<Mode> for CliMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Watch => CliMode::Watch,
            Mode::All => CliMode::All,
            Mode::Prod => CliMode::Prod,
            Mode::Clean => CliMode::Clean,
            Mode::LintOnly => CliMode::LintOnly,
        }
    }
}

/// CLI arguments for the `versa` binary.
#[derive(Parser, Debug)]
#[command(name = "versa", version, about = "Build and serve TS/SFC projects with HMR")]
pub struct CliArgs {
    /// What to do this run.
    #[arg(value_enum, default_value = "all")]
    pub mode: Mode,

    /// Raise the tracing filter to debug-level output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to `versa.config.json` (or `.json5`/`.jsonc`). Defaults to
    /// `versa.config.json` in the current directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Project root used to resolve `compilerOptions.sourceRoot` /
    /// `outDir` when they are relative. Defaults to the current directory.
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

#[cfg(test)]
#[path = "tests/args_tests.rs"]
mod tests;
