//! Spawns the external dependency-extraction and build tools, capturing
//! their output to the `deps/`/`logs/` trees with atomic rename-on-finish
//! so a crash mid-write never leaves a half-written cache file mistaken
//! for a complete one.
//!
//! Jobs are described by owned [`DepExtractJob`]/[`BuildJob`] values
//! rather than borrowing the `Scheduler` directly, so a dispatcher can
//! hand them to a `JoinSet` without the scheduler's lifetime leaking
//! into spawned tasks.

use std::process::Stdio;

use camino::Utf8PathBuf;
use tokio::process::Command;

use crate::error::{BulkError, IoResultExt, Result};

/// Whether a spawned tool run finished cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

async fn rename(from: &Utf8PathBuf, to: &Utf8PathBuf) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| BulkError::Rename {
            from: from.clone(),
            to: to.clone(),
            source,
        })
}

fn tmp_path(path: &Utf8PathBuf) -> Utf8PathBuf {
    path.with_extension(format!("{}.tmp", path.extension().unwrap_or_default()))
}

async fn create(path: &Utf8PathBuf) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.with_path(parent)?;
    }
    Ok(tokio::fs::File::create(path)
        .await
        .with_path(path)?
        .into_std()
        .await)
}

/// Everything needed to extract one package's dependencies, independent
/// of the scheduler arena.
#[derive(Debug, Clone)]
pub struct DepExtractJob {
    pub name: String,
    pub tool: String,
    pub tool_args: Vec<String>,
    pub dep_path: Utf8PathBuf,
    pub err_path: Utf8PathBuf,
}

/// Everything needed to build one package.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub name: String,
    pub tool: String,
    pub tool_args: Vec<String>,
    pub log_path: Utf8PathBuf,
    pub err_path: Utf8PathBuf,
}

/// Runs `<tool> [-a <arch>] dbulk-dump <name>` to extract dependencies,
/// writing stdout to `deps/<name>.dep` and stderr to `deps/<name>.err`.
/// On success the stale `.err` is removed; on failure the stale `.dep`
/// is removed, matching the original's `gendepstart`/`gendepdone` pair.
pub async fn run_depextract(job: &DepExtractJob) -> Result<RunOutcome> {
    let dep_tmp = tmp_path(&job.dep_path);
    let err_tmp = tmp_path(&job.err_path);

    let mut cmd = Command::new(&job.tool);
    cmd.args(&job.tool_args).arg("dbulk-dump").arg(&job.name);
    cmd.stdout(Stdio::from(create(&dep_tmp).await?));
    cmd.stderr(Stdio::from(create(&err_tmp).await?));

    tracing::debug!(target: "bulk::explain", "{}: spawning {cmd:?}", job.name);
    let child = cmd.spawn().map_err(|source| BulkError::Spawn {
        tool: job.tool.clone(),
        source,
    })?;
    let output = child.wait_with_output().await.map_err(|source| BulkError::Spawn {
        tool: job.tool.clone(),
        source,
    })?;

    if output.status.success() {
        rename(&dep_tmp, &job.dep_path).await?;
        let _ = tokio::fs::remove_file(&job.err_path).await;
        let _ = tokio::fs::remove_file(&err_tmp).await;
        Ok(RunOutcome::Success)
    } else {
        rename(&err_tmp, &job.err_path).await?;
        let _ = tokio::fs::remove_file(&dep_tmp).await;
        Ok(RunOutcome::Failure)
    }
}

/// Runs `<tool> [-a <arch>] -1Et -j 4 pkg <name>` to build a package,
/// writing the combined stdout+stderr to a single temp file that is
/// renamed to `logs/<name>-<version>_<revision>.log` on success or
/// `.err` on failure, matching the original's single combined-output log.
pub async fn run_build(job: &BuildJob) -> Result<RunOutcome> {
    let tmp = tmp_path(&job.log_path);

    let mut cmd = Command::new(&job.tool);
    cmd.args(&job.tool_args)
        .args(["-1Et", "-j", "4", "pkg"])
        .arg(&job.name);
    let out_file = create(&tmp).await?;
    cmd.stdout(Stdio::from(out_file.try_clone().with_path(&tmp)?));
    cmd.stderr(Stdio::from(out_file));

    tracing::info!(target: "bulk::explain", "{}: spawning {cmd:?}", job.name);
    let child = cmd.spawn().map_err(|source| BulkError::Spawn {
        tool: job.tool.clone(),
        source,
    })?;
    let output = child.wait_with_output().await.map_err(|source| BulkError::Spawn {
        tool: job.tool.clone(),
        source,
    })?;

    if output.status.success() {
        rename(&tmp, &job.log_path).await?;
        let _ = tokio::fs::remove_file(&job.err_path).await;
        Ok(RunOutcome::Success)
    } else {
        rename(&tmp, &job.err_path).await?;
        let _ = tokio::fs::remove_file(&job.log_path).await;
        Ok(RunOutcome::Failure)
    }
}
