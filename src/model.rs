use std::collections::{HashMap, HashSet};

use camino::Utf8PathBuf;

use crate::types::{BuildFlags, BuildId, Builder, Mtime, NameId, SourceId};

/// Unique per package name. May own a source template directly, point at
/// another name's source (symlink alias or `-dbg`/`-32bit` derivative), or
/// resolve to nothing (`MISSING`).
#[derive(Debug)]
pub struct PackageName {
    pub name: String,
    pub mtime: Mtime,
    pub owner: Option<SourceId>,
    pub dirty: bool,
    /// Reverse edges: builds that list this name as a dependency, used to
    /// unblock dependents in `pkg_done`.
    pub uses: HashSet<BuildId>,
}

impl PackageName {
    fn new(name: String) -> Self {
        PackageName {
            name,
            mtime: Mtime::Unknown,
            owner: None,
            dirty: false,
            uses: HashSet::new(),
        }
    }
}

/// The unit of template. Unique per owning `PackageName`; subpackages and
/// aliases reference it secondarily.
#[derive(Debug)]
pub struct SourcePkg {
    pub owner_name: NameId,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub hostdeps: Vec<NameId>,
    pub targetdeps: Vec<NameId>,
    pub subpkgs: Vec<NameId>,
    pub builds: HashMap<Builder, Build>,
}

impl SourcePkg {
    fn new(owner_name: NameId) -> Self {
        SourcePkg {
            owner_name,
            version: None,
            revision: None,
            hostdeps: Vec::new(),
            targetdeps: Vec::new(),
            subpkgs: Vec::new(),
            builds: HashMap::new(),
        }
    }
}

/// Per-`(source, builder)` build state.
#[derive(Debug, Clone)]
pub struct Build {
    pub dep_mtime: Mtime,
    pub dep_err_mtime: Mtime,
    pub log_mtime: Mtime,
    pub log_err_mtime: Mtime,
    pub nblock: usize,
    pub flags: BuildFlags,
}

impl Default for Build {
    fn default() -> Self {
        Build {
            dep_mtime: Mtime::Unknown,
            dep_err_mtime: Mtime::Unknown,
            log_mtime: Mtime::Unknown,
            log_err_mtime: Mtime::Unknown,
            nblock: 0,
            flags: BuildFlags::default(),
        }
    }
}

/// Process-global arena owning every `PackageName` and `SourcePkg` created
/// during a run, plus the paths the run operates under and the LIFO work
/// queue of ready builds.
pub struct Scheduler {
    pub distdir: Utf8PathBuf,
    pub deps_dir: Utf8PathBuf,
    pub logs_dir: Utf8PathBuf,
    pub explain: bool,

    names: Vec<PackageName>,
    name_index: HashMap<String, NameId>,
    sources: Vec<SourcePkg>,

    /// LIFO queue of ready builds.
    pub work: Vec<BuildId>,
    pub numtotal: usize,
    pub numfail: usize,
    pub numfinished: usize,
}

impl Scheduler {
    pub fn new(distdir: Utf8PathBuf, explain: bool) -> Self {
        Scheduler {
            deps_dir: Utf8PathBuf::from("deps"),
            logs_dir: Utf8PathBuf::from("logs"),
            distdir,
            explain,
            names: Vec::new(),
            name_index: HashMap::new(),
            sources: Vec::new(),
            work: Vec::new(),
            numtotal: 0,
            numfail: 0,
            numfinished: 0,
        }
    }

    /// Look up or lazily create the `PackageName` entry for `name`.
    pub fn mkpkgname(&mut self, name: &str) -> NameId {
        if let Some(id) = self.name_index.get(name) {
            return *id;
        }
        let id = NameId(self.names.len());
        self.names.push(PackageName::new(name.to_string()));
        self.name_index.insert(name.to_string(), id);
        id
    }

    pub fn find_name(&self, name: &str) -> Option<NameId> {
        self.name_index.get(name).copied()
    }

    pub fn mksrcpkg(&mut self, owner_name: NameId) -> SourceId {
        let id = SourceId(self.sources.len());
        self.sources.push(SourcePkg::new(owner_name));
        self.names[owner_name.0].owner = Some(id);
        id
    }

    pub fn name(&self, id: NameId) -> &PackageName {
        &self.names[id.0]
    }

    pub fn name_mut(&mut self, id: NameId) -> &mut PackageName {
        &mut self.names[id.0]
    }

    pub fn source(&self, id: SourceId) -> &SourcePkg {
        &self.sources[id.0]
    }

    pub fn source_mut(&mut self, id: SourceId) -> &mut SourcePkg {
        &mut self.sources[id.0]
    }

    pub fn all_source_ids(&self) -> Vec<SourceId> {
        (0..self.sources.len()).map(SourceId).collect()
    }

    pub fn all_name_ids(&self) -> Vec<NameId> {
        (0..self.names.len()).map(NameId).collect()
    }

    /// Get or create the `Build` for `(source, builder)`.
    pub fn build_mut(&mut self, source: SourceId, builder: &Builder) -> &mut Build {
        self.sources[source.0]
            .builds
            .entry(builder.clone())
            .or_default()
    }

    pub fn build(&self, source: SourceId, builder: &Builder) -> Option<&Build> {
        self.sources[source.0].builds.get(builder)
    }

    /// Push a build onto the LIFO ready queue.
    pub fn queue(&mut self, id: BuildId) {
        self.work.push(id);
    }

    pub fn pop_work(&mut self) -> Option<BuildId> {
        self.work.pop()
    }

    pub fn deps_path(&self, builder: &Builder, name: &str, ext: &str) -> Utf8PathBuf {
        match builder.path_qualifier() {
            Some(q) => self.deps_dir.join(q).join(format!("{name}.{ext}")),
            None => self.deps_dir.join(format!("{name}.{ext}")),
        }
    }

    pub fn log_path(&self, builder: &Builder, name: &str, version: &str, revision: &str, ext: &str) -> Utf8PathBuf {
        let file = format!("{name}-{version}_{revision}.{ext}");
        match builder.path_qualifier() {
            Some(q) => self.logs_dir.join(q).join(file),
            None => self.logs_dir.join(file),
        }
    }
}
