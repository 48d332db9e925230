//! Recursive enrollment: the heart of the scheduler. Walks the
//! dependency graph lazily, computing freshness and queueing ready
//! builds, with cycle detection via a flag held for the duration of a
//! node's presence on the recursion stack.

use crate::depcache::{load_deps, stat_deps, stat_log};
use crate::error::Result;
use crate::fs_probe::stat_package;
use crate::model::Scheduler;
use crate::types::{BuildId, Builder, NameId};

/// Outcome of enrolling one `(name, builder)` pair. `Cycle` carries the
/// trace of names visited while unwinding back to the call that
/// first detects the repeat, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Ok,
    Cycle(Vec<String>),
    Missing,
}

fn explain(scheduler: &Scheduler, name: &str, message: impl std::fmt::Display) {
    if scheduler.explain {
        tracing::debug!(target: "bulk::explain", "{name}: {message}");
    }
}

/// Ensures the source for `name` is fully considered under `builder`.
/// See the design's numbered semantics; this function implements them
/// step for step.
pub fn enroll(scheduler: &mut Scheduler, name: NameId, builder: &Builder) -> Result<EnrollOutcome> {
    // 1. Probe the name if this is the first reference.
    if scheduler.name(name).mtime.is_unknown() {
        stat_package(scheduler, name)?;
    }

    // 2. No owning source: synthesize a placeholder to carry SKIP|DIRTY
    // bookkeeping (see the design note on the original's null-dereference
    // bug in this branch) and report MISSING.
    let Some(owner) = scheduler.name(name).owner else {
        let owner = scheduler.mksrcpkg(name);
        let build = scheduler.build_mut(owner, builder);
        build.flags.work = true;
        build.flags.skip = true;
        build.flags.dirty = true;
        scheduler.name_mut(name).dirty = true;
        explain(scheduler, &scheduler.name(name).name.clone(), "skipping, no template to build package");
        return Ok(EnrollOutcome::Missing);
    };

    let owner_name = scheduler.source(owner).owner_name;
    if scheduler.name(owner_name).mtime.is_unknown() {
        stat_package(scheduler, owner_name)?;
    }
    let subpkgs_snapshot = scheduler.source(owner).subpkgs.clone();
    for sub in &subpkgs_snapshot {
        if scheduler.name(*sub).mtime.is_unknown() {
            stat_package(scheduler, *sub)?;
        }
    }

    let id = BuildId {
        source: owner,
        builder: builder.clone(),
    };

    // 4/5/6.
    {
        let build = scheduler.build_mut(owner, builder);
        if build.flags.cycle {
            build.flags.skip = true;
            build.flags.dirty = true;
            return Ok(EnrollOutcome::Cycle(vec![scheduler.name(name).name.clone()]));
        }
        if build.flags.work {
            return Ok(EnrollOutcome::Ok);
        }
        build.flags.work = true;
        build.flags.cycle = true;
        build.flags.dirty = false;
        build.flags.skip = false;
        build.nblock = 0;
    }

    // 7.
    if scheduler.build(owner, builder).unwrap().dep_mtime.is_unknown() {
        stat_deps(scheduler, &id)?;
    }

    let name_str = scheduler.name(name).name.clone();
    let template_mtime = scheduler.name(owner_name).mtime;
    let dep_mtime = scheduler.build(owner, builder).unwrap().dep_mtime;
    let dep_err_mtime = scheduler.build(owner, builder).unwrap().dep_err_mtime;

    let mut outcome = EnrollOutcome::Ok;

    // 8.
    if dep_mtime < template_mtime {
        if dep_err_mtime < template_mtime {
            explain(
                scheduler,
                &name_str,
                if dep_mtime.is_missing() {
                    "dependency file missing".to_string()
                } else {
                    format!("dependency file ({dep_mtime}) older than template ({template_mtime})")
                },
            );
            let build = scheduler.build_mut(owner, builder);
            build.flags.dirty = true;
            build.nblock = 0;
        } else {
            explain(scheduler, &name_str, "skipping, template unchanged since previous error");
            let build = scheduler.build_mut(owner, builder);
            build.flags.skip = true;
            build.flags.dirty = true;
        }
    } else {
        // 9. Dep cache is fresh.
        if !scheduler.build(owner, builder).unwrap().flags.deps {
            load_deps(scheduler, &id)?;
        }

        // 10. Log freshness.
        stat_log(scheduler, &id)?;
        let log_mtime = scheduler.build(owner, builder).unwrap().log_mtime;
        let log_err_mtime = scheduler.build(owner, builder).unwrap().log_err_mtime;

        if log_mtime.is_missing() {
            if log_err_mtime.is_missing() {
                explain(scheduler, &name_str, "missing");
                scheduler.build_mut(owner, builder).flags.dirty = true;
            } else if log_err_mtime < template_mtime {
                explain(scheduler, &name_str, "reattempt, template changed since previous error");
                scheduler.build_mut(owner, builder).flags.dirty = true;
            } else {
                explain(scheduler, &name_str, "skipping, template unchanged since previous error");
                let build = scheduler.build_mut(owner, builder);
                build.flags.skip = true;
                build.flags.dirty = true;
            }
        }

        if !scheduler.build(owner, builder).unwrap().flags.skip {
            let hostdeps = scheduler.source(owner).hostdeps.clone();
            let targetdeps = scheduler.source(owner).targetdeps.clone();
            let host_builder = builder.host_builder();

            // Two dependency names can resolve to the same prerequisite
            // source (e.g. a package and one of its own subpackages, or a
            // source listed in both host and target deps): `nblock` must
            // count distinct prerequisite sources, not dependency names,
            // so track which ones have already been counted.
            let mut blocked_on = std::collections::HashSet::new();
            'recurse: for (dep, dep_builder) in hostdeps
                .iter()
                .map(|d| (*d, host_builder.clone()))
                .chain(targetdeps.iter().map(|d| (*d, builder.clone())))
            {
                match enroll(scheduler, dep, &dep_builder)? {
                    EnrollOutcome::Cycle(mut trace) => {
                        let build = scheduler.build_mut(owner, builder);
                        build.flags.skip = true;
                        build.flags.dirty = true;
                        trace.push(name_str.clone());
                        outcome = EnrollOutcome::Cycle(trace);
                        break 'recurse;
                    }
                    EnrollOutcome::Ok | EnrollOutcome::Missing => {
                        if scheduler.name(dep).dirty {
                            scheduler.name_mut(dep).uses.insert(id.clone());
                            if let Some(dep_owner) = scheduler.name(dep).owner {
                                let dep_id = BuildId {
                                    source: dep_owner,
                                    builder: dep_builder.clone(),
                                };
                                if blocked_on.insert(dep_id) {
                                    scheduler.build_mut(owner, builder).nblock += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    // 11.
    scheduler.build_mut(owner, builder).flags.cycle = false;

    // 12.
    if scheduler.build(owner, builder).unwrap().flags.dirty {
        if !scheduler.build(owner, builder).unwrap().flags.counted {
            scheduler.build_mut(owner, builder).flags.counted = true;
            scheduler.numtotal += 1;
        }
        scheduler.name_mut(owner_name).dirty = true;
        // `name` may be an alias distinct from `owner_name` (spec.md §8
        // S2: enrolling `foo-dbg` must mark both `foo` and `foo-dbg`
        // dirty), so mark it too rather than relying on it being the
        // same id.
        scheduler.name_mut(name).dirty = true;
        for sub in &subpkgs_snapshot {
            scheduler.name_mut(*sub).dirty = true;
        }
        let snapshot = scheduler.build(owner, builder).unwrap().clone();
        if !snapshot.flags.skip && snapshot.nblock == 0 {
            scheduler.queue(id.clone());
        }
    }

    Ok(outcome)
}

/// Top-level enrollment entry point used by the CLI: enrolls `name` and
/// logs a cycle trace if one was found, matching the original's
/// `buildadd` wrapper around the recursive `_buildadd`.
pub fn enroll_root(scheduler: &mut Scheduler, name: NameId, builder: &Builder) -> Result<()> {
    if let EnrollOutcome::Cycle(trace) = enroll(scheduler, name, builder)? {
        tracing::warn!("dependency cycle: {}", trace.join(" <- "));
    }
    Ok(())
}

/// Re-enters `enroll` for a build whose dependency extraction just
/// finished: forces the dep cache to be re-stat'd and the build's
/// `work` flag cleared so the normal "fresh dep cache" path runs,
/// loading the newly written `.dep` file and recursing into the
/// dependencies it names. Used by the dispatcher between the
/// dependency-extraction and build phases of one package.
pub fn reenroll_after_depextract(scheduler: &mut Scheduler, id: &BuildId) -> Result<EnrollOutcome> {
    {
        let build = scheduler.build_mut(id.source, &id.builder);
        build.flags.work = false;
        build.dep_mtime = crate::types::Mtime::Unknown;
        build.dep_err_mtime = crate::types::Mtime::Unknown;
    }
    let owner_name = scheduler.source(id.source).owner_name;
    enroll(scheduler, owner_name, &id.builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depcache::render_deps;
    use crate::fs_probe::scan;
    use crate::model::Scheduler;
    use crate::types::Builder;
    use camino::Utf8PathBuf;
    use std::fs;

    fn write_template(distdir: &std::path::Path, name: &str) {
        let dir = distdir.join("srcpkgs").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("template"), b"pkgname=placeholder\n").unwrap();
    }

    fn utf8(p: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p.to_path_buf()).unwrap()
    }

    #[test]
    fn singleton_with_no_cache_is_dirty_and_enqueued() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "foo");
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let foo = scheduler.find_name("foo").unwrap();

        enroll_root(&mut scheduler, foo, &Builder::Native).unwrap();

        assert!(scheduler.name(foo).dirty);
        assert_eq!(scheduler.numtotal, 1);
        assert_eq!(scheduler.work.len(), 1);
        let build = scheduler.build(scheduler.name(foo).owner.unwrap(), &Builder::Native).unwrap();
        assert!(build.flags.dirty);
        assert!(!build.flags.deps);
    }

    #[test]
    fn alias_shares_source_and_marks_both_dirty() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "foo");
        std::os::unix::fs::symlink("foo", tmp.path().join("srcpkgs/foo-dbg")).unwrap();
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let alias = scheduler.find_name("foo-dbg").unwrap();

        enroll_root(&mut scheduler, alias, &Builder::Native).unwrap();

        let foo = scheduler.find_name("foo").unwrap();
        assert!(scheduler.name(foo).dirty);
        assert!(scheduler.name(alias).dirty);
        assert_eq!(scheduler.numtotal, 1);
    }

    #[test]
    fn chain_blocks_dependent_on_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "foo");
        write_template(tmp.path(), "bar");
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();
        fs::write(
            tmp.path().join("deps/foo.dep"),
            render_deps(&crate::depcache::DepRecord {
                pkgname: Some("foo".into()),
                version: Some("1".into()),
                revision: Some("1".into()),
                targetdeps: vec!["bar".into()],
                ..Default::default()
            }),
        )
        .unwrap();
        // Touch foo's dep cache after the template so it reads as fresh.
        filetime_bump(&tmp.path().join("deps/foo.dep"));

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let foo = scheduler.find_name("foo").unwrap();

        enroll_root(&mut scheduler, foo, &Builder::Native).unwrap();

        assert_eq!(scheduler.numtotal, 2);
        let foo_src = scheduler.name(foo).owner.unwrap();
        let foo_build = scheduler.build(foo_src, &Builder::Native).unwrap();
        assert_eq!(foo_build.nblock, 1);
        // bar should be at the front of the ready queue (pushed before foo).
        let bar = scheduler.find_name("bar").unwrap();
        let bar_src = scheduler.name(bar).owner.unwrap();
        assert_eq!(scheduler.work.first().unwrap().source, bar_src);
    }

    #[test]
    fn nblock_counts_distinct_sources_not_dependency_names() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "foo");
        write_template(tmp.path(), "baz");
        fs::create_dir_all(tmp.path().join("deps")).unwrap();
        fs::create_dir_all(tmp.path().join("logs")).unwrap();
        fs::write(
            tmp.path().join("deps/baz.dep"),
            render_deps(&crate::depcache::DepRecord {
                version: Some("1".into()),
                revision: Some("1".into()),
                // `foo` is declared as both a host-make dependency and a
                // target dependency; with no cross builder in play the
                // host builder equals the native one, so both recursion
                // entries enroll the exact same (source, builder): this
                // must block on exactly one prerequisite, not two.
                hostmakedepends: vec!["foo".into()],
                targetdeps: vec!["foo".into()],
                ..Default::default()
            }),
        )
        .unwrap();
        filetime_bump(&tmp.path().join("deps/baz.dep"));

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let baz = scheduler.find_name("baz").unwrap();

        enroll_root(&mut scheduler, baz, &Builder::Native).unwrap();

        let baz_src = scheduler.name(baz).owner.unwrap();
        let baz_build = scheduler.build(baz_src, &Builder::Native).unwrap();
        assert_eq!(baz_build.nblock, 1);
    }

    #[test]
    fn direct_cycle_is_flagged_skip_dirty_with_no_queued_work() {
        let tmp = tempfile::tempdir().unwrap();
        write_template(tmp.path(), "foo");
        write_template(tmp.path(), "bar");
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
        fs::write(
            tmp.path().join("deps/bar.dep"),
            render_deps(&crate::depcache::DepRecord {
                version: Some("1".into()),
                revision: Some("1".into()),
                targetdeps: vec!["foo".into()],
                ..Default::default()
            }),
        )
        .unwrap();
        filetime_bump(&tmp.path().join("deps/foo.dep"));
        filetime_bump(&tmp.path().join("deps/bar.dep"));

        let mut scheduler = Scheduler::new(utf8(tmp.path()), false);
        scheduler.deps_dir = utf8(&tmp.path().join("deps"));
        scheduler.logs_dir = utf8(&tmp.path().join("logs"));
        scan(&mut scheduler).unwrap();
        let foo = scheduler.find_name("foo").unwrap();

        enroll_root(&mut scheduler, foo, &Builder::Native).unwrap();

        let foo_src = scheduler.name(foo).owner.unwrap();
        let foo_build = scheduler.build(foo_src, &Builder::Native).unwrap();
        assert!(foo_build.flags.skip);
        assert!(foo_build.flags.dirty);
        assert!(scheduler.work.is_empty());
    }

    /// Bumps a file's mtime forward so it reads as newer than the
    /// template it's meant to be fresh relative to (test fixtures are
    /// written within the same tick otherwise).
    fn filetime_bump(path: &std::path::Path) {
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        let file = fs::File::open(path).unwrap();
        file.set_modified(future).unwrap();
    }
}
