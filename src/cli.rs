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
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

/// Crop a 3D Tiles tileset to a region of interest and make its b3dm content smaller.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prune a local tileset.json to the tiles that intersect the region of interest.
    #[command(arg_required_else_help = true)]
    Prune(PruneArgs),
    /// Download the part of a remote tileset that intersects the region of interest.
    #[command(arg_required_else_help = true)]
    Fetch(FetchArgs),
    /// Reduce the batch tables of b3dm files to the construction year and identifier.
    #[command(arg_required_else_help = true)]
    Compact(CompactArgs),
    /// Recompress the glTF models of b3dm files with an external tool.
    #[command(arg_required_else_help = true)]
    Compress(CompressArgs),
    /// Delete the files that the tileset.json of a directory does not reference.
    #[command(arg_required_else_help = true)]
    Clean(CleanArgs),
    /// Print the header and batch table summary of a b3dm file.
    #[command(arg_required_else_help = true)]
    Inspect(InspectArgs),
}

/// The region of interest is the anchor rectangle, expanded on each side by the buffer
/// times its width (height).
#[derive(Args, Debug, Default)]
pub struct RegionArgs {
    /// JSON file with the "anchor" rectangle ({"min_x", "max_x", "min_y", "max_y"}) and
    /// the "buffer". Both are optional.
    #[arg(long, value_parser = existing_path)]
    pub region_config: Option<PathBuf>,
    /// The buffer multiplier. Values below 4.0 are raised to 4.0.
    #[arg(long)]
    pub buffer: Option<f64>,
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// The tileset.json to prune.
    #[arg(value_parser = existing_canonical_path)]
    pub tileset: PathBuf,
    /// Write the pruned tileset here instead of replacing the input.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Write the content URIs of the kept tiles to this file, one per line.
    #[arg(long)]
    pub worklist: Option<PathBuf>,
    #[command(flatten)]
    pub region: RegionArgs,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URL of the directory that contains the tileset.json.
    #[arg(long)]
    pub base_url: String,
    /// Directory for the pruned tileset and its content.
    #[arg(short, long)]
    pub output: PathBuf,
    /// The number of parallel downloads.
    #[arg(short, long, default_value_t = crate::fetch::DEFAULT_JOBS)]
    pub jobs: usize,
    /// Timeout of a single request, in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
    #[command(flatten)]
    pub region: RegionArgs,
}

#[derive(Args, Debug)]
pub struct CompactArgs {
    /// A b3dm file, or a directory that is searched recursively for b3dm files.
    #[arg(value_parser = existing_path)]
    pub path: PathBuf,
    /// The number of files to process in parallel. Defaults to the number of CPUs.
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CompressArgs {
    /// A b3dm file, or a directory that is searched recursively for b3dm files.
    #[arg(value_parser = existing_path)]
    pub path: PathBuf,
    /// The compressor executable. Defaults to 'npx gltf-pipeline'.
    #[arg(long)]
    pub exe: Option<String>,
    /// An argument to pass to the executable before the input and output. You can
    /// specify it multiple times.
    #[arg(long = "exe-arg", allow_hyphen_values = true)]
    pub exe_args: Vec<String>,
    /// An argument to pass to the executable after the input and output, replaces the
    /// default Draco flags. You can specify it multiple times.
    #[arg(long = "tool-flag", allow_hyphen_values = true)]
    pub tool_flags: Vec<String>,
    /// Terminate the compressor if it is not finished after the provided number of
    /// seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// The number of files to process in parallel. Defaults to the number of CPUs.
    #[arg(short, long)]
    pub jobs: Option<usize>,
    /// Also recompress the models that use Draco compression already.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Directories with a tileset.json. You can specify more than one.
    #[arg(required = true, value_parser = existing_canonical_path)]
    pub dirs: Vec<PathBuf>,
    /// List the files that would be removed, without removing them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(value_parser = existing_path)]
    pub file: PathBuf,
}

fn existing_canonical_path(s: &str) -> Result<PathBuf, String> {
    if let Ok(c) = Path::new(s).canonicalize() {
        if c.exists() {
            Ok(c)
        } else {
            Err(format!("path {:?} does not exist", &c))
        }
    } else {
        Err(format!("could not resolve the path {:?}", s))
    }
}

fn existing_path(s: &str) -> Result<PathBuf, String> {
    let p = Path::new(s).to_path_buf();
    if p.exists() {
        Ok(p)
    } else {
        Err(format!("path {:?} does not exist", &p))
    }
}
