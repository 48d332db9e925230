use camino::Utf8PathBuf;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "bulk", author, about, version)]
pub struct Args {
    /// Explain each scheduling decision (why a package is queued, skipped,
    /// or left alone) on the `bulk::explain` log target.
    #[arg(short = 'd', long)]
    pub explain: bool,

    /// Root of the package tree (expects a `srcpkgs/` directory).
    /// Defaults to `$HOME/void-packages`.
    #[arg(short = 'D', long)]
    pub distdir: Option<Utf8PathBuf>,

    /// Maximum number of concurrent build/dependency-extraction jobs.
    /// Defaults to the number of available CPUs.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Print what would be built without running any subprocess.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Reserved. When given, suppresses the final dispatch phase: the
    /// dependency graph is still built and freshness computed, but no
    /// dependency-extraction or build subprocess is spawned. The value
    /// itself is unused, kept only for compatibility with the original
    /// flag's argument shape.
    #[arg(short = 't', long = "tool", value_name = "TOOL")]
    pub tool_reserved: Option<String>,

    /// Stop dispatching new work after this many failures (existing
    /// in-flight jobs still drain). Defaults to unbounded.
    #[arg(short = 'f', long, default_value_t = usize::MAX)]
    pub maxfail: usize,

    /// Cross-compile for this target architecture instead of the
    /// native one.
    #[arg(short = 'a', long)]
    pub arch: Option<String>,

    /// Host architecture to use for host dependencies of a cross build.
    /// Only meaningful together with `--arch`.
    #[arg(long)]
    pub host: Option<String>,

    /// Be verbose; repeat for more detail (`-vvvv` is trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Package names to build. If none are given, the whole `srcpkgs/`
    /// tree is scanned.
    pub targets: Vec<String>,
}
