use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;

use bulk::dispatcher::{dispatch, DispatchConfig};
use bulk::fs_probe::{add_package, scan};
use bulk::graph::enroll_root;
use bulk::types::Builder;
use bulk::Scheduler;

use crate::args::Args;

mod args;

/// Name of the external package-build tool, resolved via `$PATH` like any
/// other child process invocation. The original hardcoded an absolute
/// path to a single checkout; this crate looks it up by name instead,
/// matching how the other external-tool-wrapping CLIs in the retrieval
/// pack invoke their subprocess collaborators.
const EXTERNAL_TOOL: &str = "xbps-src";

fn default_distdir() -> Result<Utf8PathBuf> {
    let home = home::home_dir().context("could not determine $HOME")?;
    let home = Utf8PathBuf::from_path_buf(home).map_err(|p| anyhow::anyhow!("$HOME is not valid UTF-8: {p:?}"))?;
    Ok(home.join("void-packages"))
}

fn builder_from_args(args: &Args) -> Result<Builder> {
    match (&args.arch, &args.host) {
        (Some(arch), host) => Ok(Builder::cross(arch.clone(), host.clone())),
        (None, None) => Ok(Builder::Native),
        (None, Some(_)) => bail!("--host requires --arch"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    bulk::tracing::init(args.verbose, args.explain);
    tracing::debug!("{args:?}");

    let distdir = match &args.distdir {
        Some(d) => d.clone(),
        None => default_distdir()?,
    };
    let builder = builder_from_args(&args)?;

    let mut scheduler = Scheduler::new(distdir.clone(), args.explain);
    scheduler.deps_dir = distdir.join("deps");
    scheduler.logs_dir = distdir.join("logs");

    tokio::fs::create_dir_all(&scheduler.deps_dir)
        .await
        .with_context(|| format!("creating {}", scheduler.deps_dir))?;
    tokio::fs::create_dir_all(&scheduler.logs_dir)
        .await
        .with_context(|| format!("creating {}", scheduler.logs_dir))?;

    if args.targets.is_empty() {
        scan(&mut scheduler).context("scanning srcpkgs")?;
        let all_names = scheduler.all_name_ids();
        for name in all_names {
            enroll_root(&mut scheduler, name, &builder)?;
        }
    } else {
        for target in &args.targets {
            let name = add_package(&mut scheduler, target)
                .with_context(|| format!("resolving {target}"))?;
            enroll_root(&mut scheduler, name, &builder)?;
        }
    }

    tracing::info!(
        "{} package(s) queued for building",
        scheduler.numtotal
    );

    if args.tool_reserved.is_some() {
        tracing::info!("-t given: suppressing dispatch phase");
        return Ok(());
    }

    let jobs = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let config = DispatchConfig {
        tool: EXTERNAL_TOOL.to_string(),
        maxjobs: jobs,
        maxfail: args.maxfail,
        dry_run: args.dry_run,
    };

    let clean = dispatch(&mut scheduler, &config).await?;

    tracing::info!(
        "finished: {} built, {} failed, {} total",
        scheduler.numfinished,
        scheduler.numfail,
        scheduler.numtotal
    );

    if clean {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
