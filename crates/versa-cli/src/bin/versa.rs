//! `versa`: the main CLI entry point, per spec.md §6's CLI surface.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use versa_cli::args::{CliArgs, Mode};
use versa_cli::config_loader;
use versa_cli::driver;
use versa_core::VersaCore;
use versa_core::config::CliMode;

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("VERSA_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = Registry::default().with(filter).with(tracing_tree::HierarchicalLayer::new(2).with_indent_lines(true).with_targets(true));
    let _ = subscriber.try_init();
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(args.verbose);

    let project_root = args.project_root.clone().unwrap_or_else(|| std::env::current_dir().expect("current directory must be readable"));

    let config = match config_loader::load(&project_root, &args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let mode: CliMode = args.mode.into();

    if matches!(args.mode, Mode::Clean) {
        if let Err(e) = driver::run_clean(&config) {
            tracing::error!(error = %e, "failed to remove output directory");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    if matches!(args.mode, Mode::LintOnly) {
        let results = driver::run_lint(&config);
        let mut all_ok = true;
        for result in &results {
            if !result.success {
                all_ok = false;
                println!("{} {}", "fail".red().bold(), result.name);
                tracing::error!(linter = %result.name, stderr = %result.stderr, "lint failed");
            } else {
                println!("{} {}", "pass".green().bold(), result.name);
                tracing::info!(linter = %result.name, "lint passed");
            }
        }
        return if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    let package_store_root = project_root.join("node_modules");
    let core = VersaCore::init_default(config, mode, package_store_root);

    if matches!(args.mode, Mode::Watch) {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "failed to start async runtime");
                return ExitCode::FAILURE;
            }
        };
        let core = Arc::new(core);
        let result = runtime.block_on(driver::run_watch(core.clone()));
        match Arc::try_unwrap(core) {
            Ok(core) => core.shutdown(),
            Err(_) => tracing::warn!("core still referenced at shutdown"),
        }
        return match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "watch mode failed");
                ExitCode::FAILURE
            }
        };
    }

    let summary = driver::run_batch(&core);
    core.shutdown();

    if summary.is_clean() {
        println!("{} {} file(s) compiled", "ok".green().bold(), summary.compiled);
        ExitCode::SUCCESS
    } else {
        println!(
            "{} {} file(s) compiled, {} {}",
            "error".red().bold(),
            summary.compiled,
            summary.failed.len(),
            "failed".red()
        );
        for (path, err) in &summary.failed {
            println!("  {} {}: {}", "-".dimmed(), path.display(), err);
        }
        ExitCode::from(1)
    }
}
