//! Reads and writes the small key/value dependency-cache records
//! produced by dependency extraction, and stats the log files produced
//! by a build.

use crate::error::{BulkError, IoResultExt, Result};
use crate::fs_probe::add_package;
use crate::model::Scheduler;
use crate::types::{BuildId, Mtime};

/// The parsed contents of a `<name>.dep` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepRecord {
    pub pkgname: Option<String>,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub hostmakedepends: Vec<String>,
    /// `makedepends` and `depends` both populate this list, in the order
    /// they were encountered.
    pub targetdeps: Vec<String>,
    pub subpackages: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListKey {
    HostMakeDepends,
    TargetDepends,
    Subpackages,
}

/// Parses the line-oriented key/value and key/list format described by
/// the design: scalar keys as `key: value`, list keys as `key:` followed
/// by ` `-indented element lines. Unknown keys are ignored. A
/// non-indented line with no colon is a format error.
pub fn parse_deps(path: &camino::Utf8Path, text: &str) -> Result<DepRecord> {
    let mut record = DepRecord::default();
    let mut list_state: Option<ListKey> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(' ') {
            if let Some(key) = list_state {
                match key {
                    ListKey::HostMakeDepends => record.hostmakedepends.push(rest.to_string()),
                    ListKey::TargetDepends => record.targetdeps.push(rest.to_string()),
                    ListKey::Subpackages => record.subpackages.push(rest.to_string()),
                }
                continue;
            }
            // An indented line with no active list key is simply not a
            // continuation of anything; fall through and reparse it as a
            // scalar/list header below (matches the original: state
            // resets once a non-' '-prefixed line is seen elsewhere, so
            // stray indentation outside of a list is only possible here
            // if the cache file itself is malformed upstream of us).
        }
        list_state = None;

        let Some((key, rest)) = line.split_once(':') else {
            return Err(BulkError::Format {
                path: path.to_owned(),
                reason: format!("line without a colon: {line:?}"),
            });
        };

        if rest.is_empty() {
            list_state = match key {
                "hostmakedepends" => Some(ListKey::HostMakeDepends),
                "makedepends" | "depends" => Some(ListKey::TargetDepends),
                "subpackages" => Some(ListKey::Subpackages),
                _ => None,
            };
            continue;
        }

        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match key {
            "pkgname" => record.pkgname = Some(value.to_string()),
            "version" => record.version = Some(value.to_string()),
            "revision" => record.revision = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(record)
}

/// Renders a `DepRecord` back into the on-disk format. Used by fixture
/// setup in tests and by the fake dependency-extraction tool, mirroring
/// what the real external tool emits on stdout.
pub fn render_deps(record: &DepRecord) -> String {
    let mut out = String::new();
    if let Some(pkgname) = &record.pkgname {
        out.push_str(&format!("pkgname: {pkgname}\n"));
    }
    if let Some(version) = &record.version {
        out.push_str(&format!("version: {version}\n"));
    }
    if let Some(revision) = &record.revision {
        out.push_str(&format!("revision: {revision}\n"));
    }
    if !record.hostmakedepends.is_empty() {
        out.push_str("hostmakedepends:\n");
        for dep in &record.hostmakedepends {
            out.push_str(&format!(" {dep}\n"));
        }
    }
    if !record.targetdeps.is_empty() {
        out.push_str("depends:\n");
        for dep in &record.targetdeps {
            out.push_str(&format!(" {dep}\n"));
        }
    }
    if !record.subpackages.is_empty() {
        out.push_str("subpackages:\n");
        for pkg in &record.subpackages {
            out.push_str(&format!(" {pkg}\n"));
        }
    }
    out
}

fn mtime_of_file(path: &camino::Utf8Path) -> Result<Mtime> {
    match std::fs::metadata(path) {
        Ok(meta) => match meta.modified() {
            Ok(t) => Ok(Mtime::Present(t)),
            Err(_) => Ok(Mtime::Missing),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Mtime::Missing),
        Err(e) => Err(BulkError::Io {
            path: path.to_owned(),
            source: e,
        }),
    }
}

/// Sets `dep_mtime`/`dep_err_mtime` on the given build from the `.dep`/
/// `.err` cache files' mtimes (`Missing` if absent).
pub fn stat_deps(scheduler: &mut Scheduler, id: &BuildId) -> Result<()> {
    let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();
    let dep_path = scheduler.deps_path(&id.builder, &name, "dep");
    let err_path = scheduler.deps_path(&id.builder, &name, "err");

    let dep_mtime = mtime_of_file(&dep_path)?;
    let err_mtime = mtime_of_file(&err_path)?;

    let build = scheduler.build_mut(id.source, &id.builder);
    build.dep_mtime = dep_mtime;
    build.dep_err_mtime = err_mtime;
    Ok(())
}

/// Sets `log_mtime`/`log_err_mtime` from `logs/<arch>[@<host>]/<name>-<ver>_<rev>.{log,err}`.
pub fn stat_log(scheduler: &mut Scheduler, id: &BuildId) -> Result<()> {
    let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();
    let (version, revision) = {
        let src = scheduler.source(id.source);
        (
            src.version.clone().unwrap_or_default(),
            src.revision.clone().unwrap_or_default(),
        )
    };

    let log_path = scheduler.log_path(&id.builder, &name, &version, &revision, "log");
    let err_path = scheduler.log_path(&id.builder, &name, &version, &revision, "err");

    let log_mtime = mtime_of_file(&log_path)?;
    let err_mtime = mtime_of_file(&err_path)?;

    let build = scheduler.build_mut(id.source, &id.builder);
    build.log_mtime = log_mtime;
    build.log_err_mtime = err_mtime;
    Ok(())
}

/// Opens `<...>.dep` and populates `version`/`revision`/`hostdeps`/
/// `targetdeps`/`subpkgs`; each discovered dependency name is registered
/// as a use-edge back to this build. Missing file is a programming error
/// at this stage: callers only call `load_deps` once `dep_mtime` is known
/// to be `Present`.
pub fn load_deps(scheduler: &mut Scheduler, id: &BuildId) -> Result<()> {
    let name = scheduler.name(scheduler.source(id.source).owner_name).name.clone();
    let dep_path = scheduler.deps_path(&id.builder, &name, "dep");

    let text = std::fs::read_to_string(&dep_path).with_path(&dep_path)?;
    let record = parse_deps(&dep_path, &text)?;

    let hostdeps: Vec<_> = record
        .hostmakedepends
        .iter()
        .map(|n| add_package(scheduler, n))
        .collect::<Result<_>>()?;
    let targetdeps: Vec<_> = record
        .targetdeps
        .iter()
        .map(|n| add_package(scheduler, n))
        .collect::<Result<_>>()?;
    let subpkgs: Vec<_> = record
        .subpackages
        .iter()
        .map(|n| crate::fs_probe::register_subpackage(scheduler, id.source, n))
        .collect();

    // The reverse "uses" edge that lets a finished build unblock this one
    // is registered lazily in `graph::enroll`, only for dependencies that
    // turn out to be dirty (the only ones actually counted in `nblock`).

    let source = scheduler.source_mut(id.source);
    source.version = record.version;
    source.revision = record.revision;
    source.hostdeps = hostdeps;
    source.targetdeps = targetdeps;
    source.subpkgs = subpkgs;

    scheduler.build_mut(id.source, &id.builder).flags.deps = true;

    Ok(())
}
