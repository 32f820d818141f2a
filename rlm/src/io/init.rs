//! Initialization helpers for `.rlm/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{RlmConfig, config_path, write_config};
use super::trace_log::traces_dir;

/// Canonical paths within `.rlm/` for a project root.
#[derive(Debug, Clone)]
pub struct RlmPaths {
    pub root: PathBuf,
    pub rlm_dir: PathBuf,
    pub config_path: PathBuf,
    pub traces_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl RlmPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let rlm_dir = root.join(".rlm");
        Self {
            config_path: config_path(&root),
            traces_dir: traces_dir(&root),
            gitignore_path: rlm_dir.join(".gitignore"),
            rlm_dir,
            root,
        }
    }
}

/// Options for `init_rlm`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Create `.rlm/` with a default config in `root`.
///
/// Fails if the config already exists unless `options.force` is set. Stored
/// traces are never touched.
pub fn init_rlm(root: &Path, options: &InitOptions) -> Result<RlmPaths> {
    let paths = RlmPaths::new(root);
    if paths.rlm_dir.exists() && !paths.rlm_dir.is_dir() {
        return Err(anyhow!("rlm init: .rlm exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "rlm init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.traces_dir)
        .with_context(|| format!("create directory {}", paths.traces_dir.display()))?;
    write_config(&paths.config_path, &RlmConfig::default())?;
    fs::write(&paths.gitignore_path, RLM_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    Ok(paths)
}

const RLM_GITIGNORE: &str = "traces/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_rlm(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.rlm_dir.is_dir());
        assert!(paths.traces_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            RLM_GITIGNORE
        );
        assert_eq!(load_config(&paths.config_path).expect("load"), RlmConfig::default());
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_rlm(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_rlm(temp.path(), &InitOptions { force: false }).expect_err("second init");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_defaults_and_keeps_traces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_rlm(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_iterations = 2\n").expect("customize");
        let kept = paths.traces_dir.join("rlm-keep");
        fs::create_dir_all(&kept).expect("trace dir");

        init_rlm(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(load_config(&paths.config_path).expect("load").max_iterations, 10);
        assert!(kept.is_dir());
    }
}
