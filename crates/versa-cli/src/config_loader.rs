//! Loads `versa.config.json` (or `.json5`/`.jsonc`) off disk and merges
//! CLI overrides, per spec.md §6 and SPEC_FULL.md's configuration
//! section. Reading the file and picking a parser is the CLI's job;
//! `versa_core::config::ResolvedConfig` owns validation.

use std::path::{Path, PathBuf};

use versa_core::config::ResolvedConfig;
use versa_core::error::VersaError;

use crate::args::CliArgs;

const DEFAULT_CONFIG_NAMES: &[&str] = &["versa.config.json", "versa.config.json5", "versa.config.jsonc"];

/// Find the config file to load: an explicit `--config` path, or the
/// first of [`DEFAULT_CONFIG_NAMES`] that exists under `project_root`.
fn locate_config(project_root: &Path, explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(if path.is_absolute() { path.clone() } else { project_root.join(path) });
    }
    DEFAULT_CONFIG_NAMES.iter().map(|name| project_root.join(name)).find(|p| p.exists())
}

/// Load and validate the resolved configuration for this run. Absence of
/// any config file is not an error (every field has a spec-mandated
/// default, per spec.md §6 "all fields optional unless noted"); a
/// present-but-malformed file is `ConfigInvalid`, aborting startup with
/// exit code 2.
pub fn load(project_root: &Path, args: &CliArgs) -> Result<ResolvedConfig, VersaError> {
    let mut config = match locate_config(project_root, args.config.as_ref()) {
        None => ResolvedConfig::default(),
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| VersaError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
            let value: serde_json::Value = json5::from_str(&text).map_err(|e| VersaError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?;
            ResolvedConfig::from_json_value(value)?
        }
    };

    if config.compiler_options.source_root.is_relative() {
        config.compiler_options.source_root = project_root.join(&config.compiler_options.source_root);
    }
    if config.compiler_options.out_dir.is_relative() {
        config.compiler_options.out_dir = project_root.join(&config.compiler_options.out_dir);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args_with_config(path: Option<PathBuf>) -> CliArgs {
        use crate::args::Mode;
        CliArgs { mode: Mode::All, verbose: false, config: path, project_root: None }
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load(dir.path(), &args_with_config(None)).unwrap();
        assert_eq!(config.compiler_options.source_root, dir.path().join("src"));
    }

    #[test]
    fn loads_json5_with_comments() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("versa.config.json5"),
            r#"{
                // trailing commas and comments are fine in json5
                compilerOptions: { sourceRoot: "./app", outDir: "./build" },
            }"#,
        )
        .unwrap();
        let config = load(dir.path(), &args_with_config(None)).unwrap();
        assert_eq!(config.compiler_options.source_root, dir.path().join("app"));
        assert_eq!(config.compiler_options.out_dir, dir.path().join("build"));
    }

    #[test]
    fn malformed_config_is_config_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("versa.config.json"), "{ not json5 either :::").unwrap();
        let err = load(dir.path(), &args_with_config(None)).unwrap_err();
        assert!(matches!(err, VersaError::ConfigInvalid(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn explicit_config_path_is_honored_relative_to_project_root() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("custom.json"), r#"{ "debounceMs": 250 }"#).unwrap();
        let config = load(dir.path(), &args_with_config(Some(PathBuf::from("custom.json")))).unwrap();
        assert_eq!(config.debounce_ms, 250);
    }
}
