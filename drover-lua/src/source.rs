//! Lua script trees as job sources
//!
//! Every `*.lua` file below the root is evaluated in the sandbox; each
//! `jobs.register{...}` call in it registers one job. The group of a job is
//! the file's path relative to the root without extension, `/` replaced by
//! `.`, prefixed with the source's base for git repositories.

use anyhow::{Context, Result};
use drover_core::domain::job::SourceKind;
use drover_jobs::{Job, JobFactory, JobSource, RegistrationError, Registrar};
use mlua::{HookTriggers, VmState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::job::{LuaJob, LuaScript};
use crate::parser::parse_job;
use crate::sandbox::{create_sandbox, registered_jobs};

/// Instruction budget for evaluating a script during discovery, in
/// thousands of instructions
const DISCOVERY_BUDGET: u32 = 10_000;

pub struct LuaScriptSource {
    kind: SourceKind,
    name: String,
    root: PathBuf,
    base: Option<String>,
}

impl LuaScriptSource {
    /// Jobs kept in a local directory
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::Local,
            name: "local".to_string(),
            root: root.into(),
            base: None,
        }
    }

    /// Jobs in the `jobs/` directory of a synced repository
    pub fn git(repo_dir: impl AsRef<Path>) -> Self {
        let repo_dir = repo_dir.as_ref();
        let slug = repo_slug(repo_dir);
        Self {
            kind: SourceKind::Git,
            name: slug.clone(),
            root: repo_dir.join("jobs"),
            base: Some(slug),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_script(&self, registrar: &mut Registrar, path: &Path, module: &str) -> Result<()> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let script = Arc::new(LuaScript {
            chunk_name: format!("@{}", path.display()),
            source,
        });

        let lua = create_sandbox().context("Failed to create Lua sandbox")?;
        let ticks = AtomicU32::new(0);
        let _ = lua.set_hook(
            HookTriggers::new().every_nth_instruction(1000),
            move |_lua, _debug| {
                if ticks.fetch_add(1, Ordering::Relaxed) >= DISCOVERY_BUDGET {
                    Err(mlua::Error::RuntimeError(
                        "script did not finish evaluating".to_string(),
                    ))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        lua.load(script.source.as_str())
            .set_name(script.chunk_name.as_str())
            .exec()
            .context("Failed to evaluate script")?;

        for (index, table) in registered_jobs(&lua)?.iter().enumerate() {
            let parsed = match parse_job(&lua, table) {
                Ok(parsed) => parsed,
                Err(e) => {
                    registrar.report(RegistrationError::Script {
                        path: path.display().to_string(),
                        message: format!("job #{}: {:#}", index + 1, e),
                    });
                    continue;
                }
            };

            let hooks = parsed.hooks;
            let script = script.clone();
            let factory: JobFactory =
                Arc::new(move || -> Box<dyn Job> { Box::new(LuaJob::new(script.clone(), index, hooks)) });

            if let Some(identity) = registrar.register_with(
                module,
                &parsed.class_name,
                parsed.meta,
                parsed.variables,
                factory,
            ) {
                debug!("Registered {} from {}", identity, path.display());
            }
        }

        Ok(())
    }
}

impl JobSource for LuaScriptSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn group_base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    fn load(&self, registrar: &mut Registrar) -> Result<()> {
        if !self.root.is_dir() {
            warn!("Job directory {} does not exist", self.root.display());
            return Ok(());
        }

        let mut files = Vec::new();
        collect_scripts(&self.root, &mut files)?;
        files.sort();

        for path in files {
            let module = module_name(&self.root, &path);
            if let Err(e) = self.load_script(registrar, &path, &module) {
                registrar.report(RegistrationError::Script {
                    path: path.display().to_string(),
                    message: format!("{:#}", e),
                });
            }
        }

        Ok(())
    }
}

fn collect_scripts(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_scripts(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "lua") {
            files.push(path);
        }
    }
    Ok(())
}

/// `network/backup.lua` under the root becomes `network.backup`
fn module_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

fn repo_slug(repo_dir: &Path) -> String {
    repo_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One source per repository directory below `git_root`
pub fn git_sources(git_root: &Path) -> Result<Vec<LuaScriptSource>> {
    if !git_root.is_dir() {
        warn!("Git root {} does not exist", git_root.display());
        return Ok(Vec::new());
    }

    let mut repos = Vec::new();
    for entry in std::fs::read_dir(git_root)
        .with_context(|| format!("Failed to list {}", git_root.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            repos.push(path);
        }
    }
    repos.sort();

    Ok(repos.into_iter().map(LuaScriptSource::git).collect())
}
