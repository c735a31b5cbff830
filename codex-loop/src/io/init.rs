//! `codex-loop init`: scaffold a workspace with a plan and default config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DEFAULT_CONFIG_PATH, LoopConfig, write_config};
use super::paths::LoopPaths;
use super::plan::write_plan_template;

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing plan and config.
    pub force: bool,
}

/// Files written by `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
    pub memory_dir: PathBuf,
}

/// Create the plan template, default config and memory directory in `root`.
///
/// Fails if the config or plan already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<InitReport> {
    if !root.is_dir() {
        return Err(anyhow!("init: workspace {} is not a directory", root.display()));
    }
    let config_path = root.join(DEFAULT_CONFIG_PATH);
    let cfg = LoopConfig::default();
    let paths = LoopPaths::new(root, &cfg);

    if !options.force {
        for existing in [&config_path, &paths.plan] {
            if existing.exists() {
                return Err(anyhow!(
                    "init: {} already exists (use --force to overwrite)",
                    existing.display()
                ));
            }
        }
    }

    write_config(&config_path, &cfg)?;
    write_plan_template(&paths.plan)?;
    fs::create_dir_all(&paths.memory_dir)
        .with_context(|| format!("create directory {}", paths.memory_dir.display()))?;

    Ok(InitReport {
        config_path,
        plan_path: paths.plan,
        memory_dir: paths.memory_dir,
    })
}
