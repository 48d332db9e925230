//! The job pool: pulls ready builds off the scheduler's work queue,
//! runs dependency extraction or the real build as a bounded number of
//! concurrent subprocesses, and feeds completions back into the graph
//! so newly-unblocked dependents get queued in turn.
//!
//! This replaces the original tool's blocking `waitpid(-1, ...)` reap
//! loop with a `tokio::task::JoinSet`, the natural async analogue: the
//! dispatcher awaits whichever job finishes first instead of polling
//! process IDs.

use std::collections::HashSet;

use tokio::task::JoinSet;

use crate::error::Result;
use crate::graph::{reenroll_after_depextract, EnrollOutcome};
use crate::model::Scheduler;
use crate::subprocess::{run_build, run_depextract, BuildJob, DepExtractJob, RunOutcome};
use crate::types::BuildId;

pub struct DispatchConfig {
    pub tool: String,
    pub maxjobs: usize,
    pub maxfail: usize,
    pub dry_run: bool,
}

type JobHandle = (BuildId, JobKind, Result<RunOutcome>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum JobKind {
    DepExtract,
    Build,
}

/// Runs every queued build to completion (or until `maxfail` is
/// reached), returning whether the whole run was clean.
pub async fn dispatch(scheduler: &mut Scheduler, config: &DispatchConfig) -> Result<bool> {
    let mut inflight: JoinSet<JobHandle> = JoinSet::new();
    let mut stop_dispatching = false;

    loop {
        while !stop_dispatching && inflight.len() < config.maxjobs.max(1) {
            let Some(id) = scheduler.pop_work() else {
                break;
            };
            if config.dry_run {
                simulate_success(scheduler, id)?;
                continue;
            }
            spawn_job(scheduler, &mut inflight, id, config);
        }

        if inflight.is_empty() {
            break;
        }

        let joined = inflight
            .join_next()
            .await
            .expect("inflight is non-empty so join_next cannot return None");
        let (id, kind, outcome) = joined.expect("job task panicked");

        match (kind, outcome) {
            (JobKind::DepExtract, Ok(RunOutcome::Success)) => {
                if let EnrollOutcome::Cycle(trace) = reenroll_after_depextract(scheduler, &id)? {
                    tracing::warn!("dependency cycle: {}", trace.join(" <- "));
                }
            }
            (JobKind::Build, Ok(RunOutcome::Success)) => {
                scheduler.numfinished += 1;
                pkg_done(scheduler, &id);
            }
            (_, Ok(RunOutcome::Failure)) | (_, Err(_)) => {
                let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();
                tracing::error!("{name} ({}) failed", id.builder);
                scheduler.numfail += 1;
                if scheduler.numfail >= config.maxfail {
                    tracing::warn!("maxfail ({}) reached, draining in-flight jobs", config.maxfail);
                    stop_dispatching = true;
                }
            }
        }
    }

    Ok(scheduler.numfail == 0)
}

/// Whether `id` still needs its dependencies extracted before it can be
/// built, shared between the dry-run stand-in and the real spawn path so
/// the two never disagree about which phase a build is in.
fn needs_depextract(scheduler: &Scheduler, id: &BuildId) -> bool {
    !scheduler
        .build(id.source, &id.builder)
        .map(|b| b.flags.deps)
        .unwrap_or(false)
}

/// Dry-run stand-in for a popped build: logs what would have happened
/// and marks it successful, per spec §4.4 ("mark s successful, propagate
/// completion") — so dependents blocked on this build are unblocked and
/// queued exactly as in a real run.
fn simulate_success(scheduler: &mut Scheduler, id: BuildId) -> Result<()> {
    let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();
    let phase = if needs_depextract(scheduler, &id) { "extract deps for" } else { "build" };
    tracing::info!("(dry run) would {phase} {name} ({})", id.builder);

    scheduler.numfinished += 1;
    pkg_done(scheduler, &id);
    Ok(())
}

fn spawn_job(
    scheduler: &Scheduler,
    inflight: &mut JoinSet<JobHandle>,
    id: BuildId,
    config: &DispatchConfig,
) {
    let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();

    if needs_depextract(scheduler, &id) {
        let job = DepExtractJob {
            name: name.clone(),
            tool: config.tool.clone(),
            tool_args: id.builder.tool_args(),
            dep_path: scheduler.deps_path(&id.builder, &name, "dep"),
            err_path: scheduler.deps_path(&id.builder, &name, "err"),
        };
        let id_for_task = id.clone();
        inflight.spawn(async move {
            let outcome = run_depextract(&job).await;
            (id_for_task, JobKind::DepExtract, outcome)
        });
    } else {
        let source = scheduler.source(id.source);
        let version = source.version.clone().unwrap_or_default();
        let revision = source.revision.clone().unwrap_or_default();
        let job = BuildJob {
            name: name.clone(),
            tool: config.tool.clone(),
            tool_args: id.builder.tool_args(),
            log_path: scheduler.log_path(&id.builder, &name, &version, &revision, "log"),
            err_path: scheduler.log_path(&id.builder, &name, &version, &revision, "err"),
        };
        let id_for_task = id.clone();
        inflight.spawn(async move {
            let outcome = run_build(&job).await;
            (id_for_task, JobKind::Build, outcome)
        });
    }
}

/// A build finished successfully: unblock every dependent that counted
/// it (or one of its subpackages) as a blocker.
fn pkg_done(scheduler: &mut Scheduler, id: &BuildId) {
    let owner_name = scheduler.source(id.source).owner_name;
    let mut affected = scheduler.source(id.source).subpkgs.clone();
    affected.push(owner_name);

    let mut dependents = HashSet::new();
    for name in &affected {
        dependents.extend(scheduler.name(*name).uses.iter().cloned());
    }

    for dependent in dependents {
        let build = scheduler.build_mut(dependent.source, &dependent.builder);
        build.nblock = build.nblock.saturating_sub(1);
        if build.nblock == 0 && build.flags.dirty && !build.flags.skip {
            scheduler.queue(dependent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depcache::render_deps;
    use crate::fs_probe::scan;
    use crate::graph::enroll_root;
    use crate::types::Builder;
    use camino::Utf8PathBuf;
    use std::fs;

    fn utf8(p: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p.to_path_buf()).unwrap()
    }

    fn make_executable(path: &std::path::Path, script: &str) {
        fs::write(path, script).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    #[tokio::test]
    async fn singleton_build_runs_depextract_then_build() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("srcpkgs/foo")).unwrap();
        fs::write(tmp.path().join("srcpkgs/foo/template"), b"pkgname=foo\n").unwrap();
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();

        let tool = tmp.path().join("fake-tool.sh");
        make_executable(
            &tool,
            "#!/bin/sh\nif [ \"$1\" = \"dbulk-dump\" ]; then echo 'version: 1.0'; echo 'revision: 1'; else exit 0; fi\n",
        );

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let foo = scheduler.find_name("foo").unwrap();
        enroll_root(&mut scheduler, foo, &Builder::Native).unwrap();

        let config = DispatchConfig {
            tool: tool.to_str().unwrap().into(),
            maxjobs: 2,
            maxfail: 1,
            dry_run: false,
        };
        let clean = dispatch(&mut scheduler, &config).await.unwrap();

        assert!(clean);
        assert_eq!(scheduler.numfinished, 1);
        assert_eq!(scheduler.numfail, 0);
        assert!(tmp.path().join("deps/foo.dep").exists());
        assert!(tmp.path().join("logs/foo-1.0_1.log").exists());
    }

    #[tokio::test]
    async fn dependency_failure_stops_dependent_from_building() {
        let tmp = tempfile::tempdir().unwrap();
        for pkg in ["foo", "bar"] {
            fs::create_dir_all(tmp.path().join("srcpkgs").join(pkg)).unwrap();
            fs::write(tmp.path().join("srcpkgs").join(pkg).join("template"), b"x\n").unwrap();
        }
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();
        fs::write(
            tmp.path().join("deps/foo.dep"),
            render_deps(&crate::depcache::DepRecord {
                version: Some("1".into()),
                revision: Some("1".into()),
                targetdeps: vec!["bar".into()],
                ..Default::default()
            }),
        )
        .unwrap();
        let foo_dep = tmp.path().join("deps/foo.dep");
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::open(&foo_dep).unwrap().set_modified(future).unwrap();

        let tool = tmp.path().join("fake-tool.sh");
        make_executable(
            &tool,
            "#!/bin/sh\nif [ \"$1\" = \"dbulk-dump\" ]; then echo 'version: 1.0'; echo 'revision: 1'; elif [ \"$5\" = \"bar\" ]; then exit 1; else exit 0; fi\n",
        );

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let foo = scheduler.find_name("foo").unwrap();
        enroll_root(&mut scheduler, foo, &Builder::Native).unwrap();

        let config = DispatchConfig {
            tool: tool.to_str().unwrap().into(),
            maxjobs: 2,
            maxfail: 99,
            dry_run: false,
        };
        let clean = dispatch(&mut scheduler, &config).await.unwrap();

        assert!(!clean);
        assert_eq!(scheduler.numfail, 1);
        // foo never builds because bar (its dependency) failed and never
        // unblocked it.
        assert!(!tmp.path().join("logs/foo-1.0_1.log").exists());
    }
}
