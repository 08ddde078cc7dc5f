//! Building a new service executable from the source checkout
//!
//! The build shells out to an obfuscating wrapper around the compiler
//! (`garble` over `go` by default). Each build gets a UUID and lands in the
//! install directory as `<build_id><exe_suffix>`, with the build id, build
//! time and source commit embedded as link-time constants so the resulting
//! binary can report its version without a repository.
//!
//! Intermediate files go to `<repo>/build/tmp`, which is created fresh and
//! removed when the build finishes, successfully or not. Tool variables
//! (`GOGARBLE`, `GOCACHE`, `GOTMPDIR`) are set on the child process only.

pub mod assets;

pub use assets::{StagedAssets, stage_assets};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{BuildVars, UpdaterConfig};
use crate::core::UpdaterError;
use crate::git::GitRepo;
use crate::repo::RepositoryContext;
use crate::status::ProgressSink;
use crate::utils::{command_exists, ensure_dir, exe_suffix};

const COMPILER_HINT: &str = "Install Go from https://go.dev/dl/ and make sure it is on PATH";

/// A finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub executable: PathBuf,
    pub build_id: String,
    pub build_time: String,
    /// Full source commit, when the checkout had one
    pub commit: Option<String>,
}

/// Removes the scratch directory when dropped.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to clear {}", path.display()))?;
        }
        ensure_dir(&path)?;
        Ok(Self {
            path,
        })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove build directory {}: {}", self.path.display(), e);
        }
    }
}

/// Runs `<tool> version` and returns its trimmed output.
///
/// # Errors
///
/// [`UpdaterError::ToolNotFound`] when the tool is not on PATH or its version
/// check fails.
pub async fn tool_version(tool: &str, hint: &str) -> Result<String> {
    let not_found = || UpdaterError::ToolNotFound {
        tool: tool.to_string(),
        hint: hint.to_string(),
    };

    if !command_exists(tool) {
        return Err(not_found().into());
    }

    let output = Command::new(tool)
        .arg("version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|_| not_found())?;
    if !output.status.success() {
        return Err(not_found().into());
    }

    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    }
    Ok(text)
}

/// Full `HEAD` hash and its strict ISO 8601 committer date. Either may be
/// empty when the checkout cannot answer.
async fn commit_identity(repo_dir: &Path) -> (String, String) {
    let repo = GitRepo::new(repo_dir);
    let Ok(Some(hash)) = repo.try_rev_parse("HEAD").await else {
        return (String::new(), String::new());
    };
    let time = repo.commit_time(&hash).await.unwrap_or_default();
    (hash, time)
}

/// Builds a new executable and stages runtime assets beside it.
///
/// # Errors
///
/// - [`UpdaterError::ToolNotFound`] when the compiler or obfuscator is missing
/// - [`UpdaterError::BuildFailed`] when the build exits non-zero
/// - an error when the build reports success but produced no file
/// - asset errors for non-optional entries
pub async fn build(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    progress: &dyn ProgressSink,
) -> Result<BuildArtifact> {
    let build_config = &config.build;

    progress.step(10, &format!("Checking {} installation...", build_config.compiler));
    let compiler_version = tool_version(&build_config.compiler, COMPILER_HINT).await?;
    progress.log(&format!("{} version: {}", build_config.compiler, compiler_version));

    progress.step(15, &format!("Checking {} installation...", build_config.obfuscator));
    let obfuscator_version =
        tool_version(&build_config.obfuscator, &build_config.obfuscator_hint).await?;
    progress.log(&format!("{} version: {}", build_config.obfuscator, obfuscator_version));

    ensure_dir(&ctx.install_dir)?;
    let build_id = uuid::Uuid::new_v4().to_string();
    let build_time = Utc::now().to_rfc3339();
    let executable = ctx.install_dir.join(format!("{build_id}{}", exe_suffix()));
    let (commit, commit_time) = commit_identity(&ctx.repo_dir).await;

    progress.step(25, &format!("Starting {} build...", build_config.obfuscator));
    progress.log(&format!("Build ID: {build_id}"));

    let scratch = ScratchDir::create(ctx.repo_dir.join("build").join("tmp"))?;
    progress.log(&format!("Using build folder: {}", scratch.path.display()));

    let output_arg = executable.to_string_lossy();
    let args = build_config.render_args(&BuildVars {
        build_id: &build_id,
        build_time: &build_time,
        commit: &commit,
        commit_time: &commit_time,
        output: &output_arg,
    });
    debug!("{} {}", build_config.obfuscator, args.join(" "));

    progress.step(40, "Compiling...");
    let output = Command::new(&build_config.obfuscator)
        .args(&args)
        .current_dir(&ctx.repo_dir)
        .env(&build_config.obfuscation_env, &build_config.obfuscation_scope)
        .env("GOCACHE", scratch.path.join("gocache"))
        .env("GOTMPDIR", &scratch.path)
        .env("REFORGE_BUILD_ID", &build_id)
        .env("REFORGE_BUILD_TIME", &build_time)
        .env("REFORGE_BUILD_COMMIT", &commit)
        .env("REFORGE_BUILD_COMMIT_TIME", &commit_time)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to run {}", build_config.obfuscator))?;
    drop(scratch);

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        progress.log(&format!("Build failed: {}", combined.trim()));
        return Err(UpdaterError::BuildFailed {
            output: combined,
        }
        .into());
    }

    if !executable.is_file() {
        anyhow::bail!("Executable was not created at {}", executable.display());
    }
    progress.step(80, &format!("Build successful: {build_id}{}", exe_suffix()));

    progress.step(85, "Copying configuration files...");
    stage_assets(&ctx.repo_dir, &ctx.install_dir, &config.assets.entries, progress)?;

    progress.step(95, "Build process completed successfully!");
    Ok(BuildArtifact {
        executable,
        build_id,
        build_time,
        commit: (!commit.is_empty()).then_some(commit),
    })
}
