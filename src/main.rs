// Copyright 2023 Balázs Dukai, Ravi Peters
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
mod bulk;
mod cleanup;
mod cli;
mod compact;
mod compress;
mod config;
mod fetch;
mod formats;
mod inspect;
mod prune;
mod spatial_structs;

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{debug, info, warn};

use crate::cli::{
    CleanArgs, Cli, Command, CompactArgs, CompressArgs, FetchArgs, InspectArgs, PruneArgs,
    RegionArgs,
};
use crate::compress::Compressor;
use crate::config::RegionConfig;
use crate::formats::cesium3dtiles::Tileset;
use crate::spatial_structs::Region;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("{:?}", &cli);

    match cli.command {
        Command::Prune(args) => run_prune(args),
        Command::Fetch(args) => run_fetch(args),
        Command::Compact(args) => run_compact(args),
        Command::Compress(args) => run_compress(args),
        Command::Clean(args) => run_clean(args),
        Command::Inspect(args) => run_inspect(args),
    }
}

fn region(args: &RegionArgs) -> anyhow::Result<Region> {
    let config = RegionConfig::load(args.region_config.as_deref(), args.buffer)
        .map_err(|e| anyhow!("cannot read the region configuration: {}", e))?;
    let region = config.region();
    info!("{}", region);
    debug!("Region of interest WKT: {}", region.to_wkt());
    Ok(region)
}

fn run_prune(args: PruneArgs) -> anyhow::Result<()> {
    let region = region(&args.region)?;
    let tileset = Tileset::from_file(&args.tileset)
        .map_err(|e| anyhow!("cannot read {}: {}", args.tileset.display(), e))?;
    info!(
        "Read {} with {} tiles",
        args.tileset.display(),
        tileset.tile_count()
    );
    let pruned = prune::prune(tileset, &region)?;
    info!(
        "Kept {} of {} visited tiles, {} with content",
        pruned.stats.kept,
        pruned.stats.visited,
        pruned.uris.len()
    );

    let output = args.output.as_deref().unwrap_or(&args.tileset);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir_all(parent)?;
            info!("Created output directory {:#?}", parent);
        }
    }
    pruned
        .tileset
        .to_file(output)
        .map_err(|e| anyhow!("cannot write {}: {}", output.display(), e))?;
    info!("Wrote {}", output.display());

    if let Some(worklist) = &args.worklist {
        let mut contents = pruned.uris.join("\n");
        contents.push('\n');
        formats::write_atomic(worklist, contents.as_bytes())
            .with_context(|| format!("cannot write {}", worklist.display()))?;
        info!("Wrote {} URIs to {}", pruned.uris.len(), worklist.display());
    }
    Ok(())
}

fn run_fetch(args: FetchArgs) -> anyhow::Result<()> {
    let region = region(&args.region)?;
    let fetcher = fetch::Fetcher::new(&args.base_url, Duration::from_secs(args.timeout));
    let pool = bulk::thread_pool(Some(args.jobs))?;
    let (stats, report) = fetch::fetch_region(&fetcher, &args.output, &region, &pool)
        .with_context(|| format!("cannot fetch {}", args.base_url))?;
    info!(
        "Kept {} of {} visited tiles. {} files: {} downloaded ({:.2} MB), {} present already, {} failed",
        stats.kept,
        stats.visited,
        report.total(),
        report.downloaded,
        report.bytes as f64 / 1024.0 / 1024.0,
        report.skipped,
        report.failed.len()
    );
    Ok(())
}

fn run_bulk<F>(path: &Path, jobs: Option<usize>, process: F) -> anyhow::Result<()>
where
    F: Fn(&Path) -> Result<bulk::Outcome, bulk::ProcessError> + Sync,
{
    let files = bulk::find_b3dm(path);
    if files.is_empty() {
        warn!("There are no b3dm files in {}", path.display());
        return Ok(());
    }
    let pool = bulk::thread_pool(jobs)?;
    let summary = bulk::process_all(&files, &pool, process);
    for (file, reason) in &summary.failed {
        warn!("Skipped {}: {}", file.display(), reason);
    }
    info!("{}", summary);
    Ok(())
}

fn run_compact(args: CompactArgs) -> anyhow::Result<()> {
    run_bulk(&args.path, args.jobs, |file| compact::compact_file(file))
}

fn run_compress(args: CompressArgs) -> anyhow::Result<()> {
    let mut compressor = Compressor::default();
    if let Some(exe) = args.exe {
        compressor.exe = exe;
        compressor.args = args.exe_args;
    } else if !args.exe_args.is_empty() {
        compressor.args = args.exe_args;
    }
    if !args.tool_flags.is_empty() {
        compressor.flags = args.tool_flags;
    }
    compressor.timeout = args.timeout.map(Duration::from_secs);
    debug!("{:?}", &compressor);
    let force = args.force;
    run_bulk(&args.path, args.jobs, |file| {
        compress::compress_file(file, &compressor, force)
    })
}

fn run_clean(args: CleanArgs) -> anyhow::Result<()> {
    let results = cleanup::clean_dirs(&args.dirs, args.dry_run);
    let mut failed = 0;
    for (dir, result) in &results {
        match result {
            Ok(report) => info!(
                "{}: {} referenced, {} files ({:.2} MB) and {} directories {}",
                dir.display(),
                report.referenced,
                report.removed_files.len(),
                report.bytes as f64 / 1024.0 / 1024.0,
                report.removed_dirs.len(),
                if args.dry_run { "would be removed" } else { "removed" }
            ),
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        warn!("{} of {} directories could not be cleaned", failed, results.len());
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let bytes = fs::read(&args.file).with_context(|| format!("cannot read {}", args.file.display()))?;
    let inspection = inspect::inspect(&bytes)
        .with_context(|| format!("cannot inspect {}", args.file.display()))?;
    println!("File: {}", args.file.display());
    print!("{}", inspection);
    Ok(())
}
