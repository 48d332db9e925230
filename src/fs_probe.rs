//! Resolves package names to their owning source template on disk.

use camino::Utf8PathBuf;

use crate::error::{BulkError, IoResultExt, Result};
use crate::model::Scheduler;
use crate::types::{Mtime, NameId, SourceId};

fn mtime_of(meta: &std::fs::Metadata) -> Mtime {
    match meta.modified() {
        Ok(t) => Mtime::Present(t),
        Err(_) => Mtime::Missing,
    }
}

/// A name ending in `-dbg` or `-32bit` is treated as a derivative of the
/// source named by everything up to (and not including) the *last*
/// hyphen, e.g. `foo-bar-32bit` strips to `foo-bar`.
fn derivative_owner(name: &str) -> Option<&str> {
    let (prefix, suffix) = name.rsplit_once('-')?;
    match suffix {
        "dbg" | "32bit" => Some(prefix),
        _ => None,
    }
}

/// Mutates `name.mtime` from `Unknown` to either a real mtime or
/// `Missing`, and links `name` to its owning source if one can be
/// resolved (directory, symlink target, or derivative prefix).
pub fn stat_package(scheduler: &mut Scheduler, id: NameId) -> Result<()> {
    let name = scheduler.name(id).name.clone();
    let path: Utf8PathBuf = scheduler.distdir.join("srcpkgs").join(&name);

    let meta = match std::fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(owner_name) = derivative_owner(&name) {
                let owner_id = scheduler.mkpkgname(owner_name);
                ensure_owner_source(scheduler, owner_id);
                let owner_source = scheduler.name(owner_id).owner;
                scheduler.name_mut(id).owner = owner_source;
            } else {
                scheduler.name_mut(id).owner = None;
            }
            scheduler.name_mut(id).mtime = Mtime::Missing;
            return Ok(());
        }
        Err(e) => return Err(BulkError::Io { path, source: e }),
    };

    if meta.file_type().is_symlink() {
        scheduler.name_mut(id).mtime = mtime_of(&meta);
        let target = std::fs::read_link(&path).with_path(&path)?;
        let mut target = target.to_string_lossy().into_owned();
        if target.ends_with('/') {
            tracing::warn!("symlink `srcpkgs/{name}` contains trailing slash");
            target.pop();
        }
        let target_id = scheduler.mkpkgname(&target);
        ensure_owner_source(scheduler, target_id);
        let owner_source = scheduler.name(target_id).owner;
        scheduler.name_mut(id).owner = owner_source;
        return Ok(());
    }

    if meta.is_dir() {
        let template = path.join("template");
        let template_meta = std::fs::metadata(&template).with_path(&template)?;
        scheduler.name_mut(id).mtime = mtime_of(&template_meta);
        if scheduler.name(id).owner.is_none() {
            scheduler.mksrcpkg(id);
        }
        return Ok(());
    }

    Err(BulkError::Io {
        path,
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "unexpected file type in srcpkgs",
        ),
    })
}

/// Ensures `name` has an owning `SourcePkg`, creating an empty one if it
/// hasn't been probed yet. Used when a dependency/alias/derivative target
/// is referenced before its own entry has been stat'd.
fn ensure_owner_source(scheduler: &mut Scheduler, id: NameId) {
    if scheduler.name(id).owner.is_none() {
        scheduler.mksrcpkg(id);
    }
}

/// Enumerates `<distdir>/srcpkgs`, creating a `PackageName` per entry
/// (dot-files excluded) and resolving its mtime/owner eagerly.
pub fn scan(scheduler: &mut Scheduler) -> Result<()> {
    let srcpkgs = scheduler.distdir.join("srcpkgs");
    let entries = std::fs::read_dir(&srcpkgs).with_path(&srcpkgs)?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_path(&srcpkgs)?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        names.push(file_name.to_string());
    }

    for name in names {
        let id = scheduler.mkpkgname(&name);
        stat_package(scheduler, id)?;
    }

    Ok(())
}

/// Registers `name` as a subpackage of `source`, without ever probing the
/// filesystem for it: subpackages are products declared in a source's own
/// dependency cache, not independent `srcpkgs/` entries, so their owner
/// and mtime are inherited directly from the declaring source rather than
/// discovered via `stat_package`.
pub fn register_subpackage(scheduler: &mut Scheduler, source: SourceId, name: &str) -> NameId {
    let id = scheduler.mkpkgname(name);
    if scheduler.name(id).owner.is_none() {
        let owner_name = scheduler.source(source).owner_name;
        let template_mtime = scheduler.name(owner_name).mtime;
        let entry = scheduler.name_mut(id);
        entry.owner = Some(source);
        entry.mtime = template_mtime;
    }
    id
}

/// Resolve `name` to a `PackageName`, probing it if this is the first
/// reference. Lazily creates the entry, matching the design's
/// create-on-first-reference lifecycle.
pub fn add_package(scheduler: &mut Scheduler, name: &str) -> Result<NameId> {
    let id = scheduler.mkpkgname(name);
    if scheduler.name(id).mtime.is_unknown() {
        stat_package(scheduler, id)?;
    }
    Ok(id)
}
