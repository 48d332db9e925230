use std::fmt;
use std::time::SystemTime;

use derive_more::Display;

/// A modification time with the two sentinels the design relies on:
/// "not probed yet" and "no such file". Ordered so that
/// `Missing < Unknown < Present(t)`, matching the original tool's
/// `MTIME_MISSING (-2) < MTIME_UNKNOWN (-1) < real mtimes (>= 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Mtime {
    #[display("unknown")]
    Unknown,
    #[display("missing")]
    Missing,
    #[display("{_0:?}")]
    Present(SystemTime),
}

impl Mtime {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Mtime::Unknown)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Mtime::Missing)
    }
}

impl PartialOrd for Mtime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mtime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(m: &Mtime) -> (u8, Option<SystemTime>) {
            match m {
                Mtime::Missing => (0, None),
                Mtime::Unknown => (1, None),
                Mtime::Present(t) => (2, Some(*t)),
            }
        }
        let (ra, ta) = rank(self);
        let (rb, tb) = rank(other);
        match ra.cmp(&rb) {
            std::cmp::Ordering::Equal => ta.cmp(&tb),
            other => other,
        }
    }
}

/// A target architecture, optionally paired with a host architecture for
/// cross builds. The native builder (no `-a` flag) qualifies no paths at
/// all, matching the unqualified `deps/<name>.dep` layout of the
/// single-architecture original tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Builder {
    Native,
    Cross {
        arch: String,
        host: Option<String>,
    },
}

impl Builder {
    pub fn cross(arch: impl Into<String>, host: Option<String>) -> Self {
        Builder::Cross {
            arch: arch.into(),
            host,
        }
    }

    /// The `<arch>[@<host>]` path segment used to qualify `deps/` and
    /// `logs/` subdirectories, or `None` for the native builder.
    pub fn path_qualifier(&self) -> Option<String> {
        match self {
            Builder::Native => None,
            Builder::Cross { arch, host: None } => Some(arch.clone()),
            Builder::Cross {
                arch,
                host: Some(host),
            } => Some(format!("{arch}@{host}")),
        }
    }

    /// The builder host dependencies of this build should be enrolled
    /// under: a cross build's own host architecture if set, else itself.
    pub fn host_builder(&self) -> Builder {
        match self {
            Builder::Native => Builder::Native,
            Builder::Cross { host: None, .. } => self.clone(),
            Builder::Cross {
                host: Some(host), ..
            } => Builder::Cross {
                arch: host.clone(),
                host: None,
            },
        }
    }

    /// CLI-facing flag for invoking the external build tool with a
    /// non-native target, e.g. `-a aarch64`.
    pub fn tool_args(&self) -> Vec<String> {
        match self {
            Builder::Native => Vec::new(),
            Builder::Cross { arch, .. } => vec!["-a".to_string(), arch.clone()],
        }
    }
}

impl fmt::Display for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path_qualifier() {
            Some(q) => write!(f, "{q}"),
            None => write!(f, "native"),
        }
    }
}

/// Flags tracked per `Build`, matching the design's flag set:
/// `{WORK, CYCLE, DEPS, DIRTY, SKIP}`, plus `counted` to make
/// `Scheduler::numtotal` idempotent across repeat enrollment (a build's
/// dependency-cache refresh re-enters `enroll`, and it must not be
/// counted twice).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub work: bool,
    pub cycle: bool,
    pub deps: bool,
    pub dirty: bool,
    pub skip: bool,
    pub counted: bool,
}

/// Stable handle to a `PackageName` in the scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(pub(crate) usize);

/// Stable handle to a `SourcePkg` in the scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) usize);

/// Identifies one `Build`: a source package under a specific builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildId {
    pub source: SourceId,
    pub builder: Builder,
}
