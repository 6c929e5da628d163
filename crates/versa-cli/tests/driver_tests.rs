use std::sync::Arc;

use tempfile::tempdir;

use versa_cli::driver::run_batch;
use versa_core::VersaCore;
use versa_core::config::{CliMode, ResolvedConfig};
use versa_core::typecheck::BalancedBracketsChecker;

fn core_for(dir: &std::path::Path) -> VersaCore {
    let mut config = ResolvedConfig::default();
    config.compiler_options.source_root = dir.join("src");
    config.compiler_options.out_dir = dir.join("dist");
    VersaCore::init(config, CliMode::All, dir.join("node_modules"), Arc::new(BalancedBracketsChecker))
}

/// 150 mixed sources, 10% intentionally broken: a single `all` run
/// produces 135 successful outputs and 15 reported errors, with no
/// output for any broken input.
#[test]
fn throughput_run_reports_every_failure_without_aborting() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();

    for i in 0..135 {
        std::fs::write(src.join(format!("ok_{i}.ts")), format!("export const v{i}: number = {i};\n")).unwrap();
    }
    for i in 0..15 {
        std::fs::write(src.join(format!("broken_{i}.ts")), "const x = [1, 2;\n").unwrap();
    }

    let core = core_for(dir.path());
    let summary = run_batch(&core);

    assert_eq!(summary.compiled, 135);
    assert_eq!(summary.failed.len(), 15);
    for (path, _) in &summary.failed {
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("broken_"));
        let dest = dir.path().join("dist").join(path.file_name().unwrap()).with_extension("js");
        assert!(!dest.exists(), "broken input must not produce output: {}", dest.display());
    }
    for i in 0..135 {
        assert!(dir.path().join(format!("dist/ok_{i}.js")).exists());
    }
}

#[test]
fn clean_run_removes_previously_compiled_output() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "export const a = 1;\n").unwrap();

    let core = core_for(dir.path());
    run_batch(&core);
    assert!(dir.path().join("dist/a.js").exists());

    let mut config = ResolvedConfig::default();
    config.compiler_options.out_dir = dir.path().join("dist");
    versa_cli::driver::run_clean(&config).unwrap();
    assert!(!dir.path().join("dist").exists());
}
