//! `versa-server`: a thin wrapper around `versa` that always runs in
//! watch mode, for deployments that only ever want the dev server (no
//! CLI mode switch to remember).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use versa_cli::args::CliArgs;
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
    let mut args = CliArgs::parse();
    args.mode = versa_cli::args::Mode::Watch;
    init_tracing(args.verbose);

    let project_root = args.project_root.clone().unwrap_or_else(|| std::env::current_dir().expect("current directory must be readable"));

    let config = match config_loader::load(&project_root, &args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let package_store_root = project_root.join("node_modules");
    let core = Arc::new(VersaCore::init_default(config, CliMode::Watch, package_store_root));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(driver::run_watch(core.clone()));
    match Arc::try_unwrap(core) {
        Ok(core) => core.shutdown(),
        Err(_) => tracing::warn!("core still referenced at shutdown"),
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "dev server failed");
            ExitCode::FAILURE
        }
    }
}
