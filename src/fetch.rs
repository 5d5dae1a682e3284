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
//! Download the part of a remote tileset that intersects the region of interest.
//!
//! The remote `tileset.json` is pruned in memory, then the pruned tileset is written to
//! the output directory and the content of the kept tiles is downloaded next to it,
//! under the same relative paths. Files that exist already are not downloaded again, so
//! an interrupted download can be resumed by running it again.
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use thiserror::Error;

use crate::formats::cesium3dtiles::Tileset;
use crate::formats::temp_file_for;
use crate::prune::{prune, PruneError, PruneStats};
use crate::spatial_structs::Region;

pub const TILESET_FILE: &str = "tileset.json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_JOBS: usize = 8;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("GET {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("the content URI {0:?} does not point into the output directory")]
    UnsafeUri(String),
    #[error("invalid tileset: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot write the tileset to {path:?}: {message}")]
    WriteTileset { path: PathBuf, message: String },
    #[error(transparent)]
    Prune(#[from] PruneError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Download {
    /// The number of bytes written.
    Downloaded(u64),
    /// The file exists already.
    Skipped,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub bytes: u64,
    /// The URI and the reason.
    pub failed: Vec<(String, String)>,
}

impl FetchReport {
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed.len()
    }
}

/// Downloads files relative to a base URL.
#[derive(Debug, Clone)]
pub struct Fetcher {
    agent: ureq::Agent,
    base_url: String,
}

impl Fetcher {
    /// `timeout` bounds each request, including reading the response.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, uri: &str) -> String {
        format!("{}/{}", self.base_url, uri.trim_start_matches("./"))
    }

    fn get(&self, uri: &str) -> Result<ureq::Response, FetchError> {
        let url = self.url(uri);
        debug!("GET {}", &url);
        self.agent.get(&url).call().map_err(|e| FetchError::Http {
            url,
            source: Box::new(e),
        })
    }

    /// Download and parse the remote tileset.
    pub fn fetch_tileset(&self) -> Result<Tileset, FetchError> {
        let mut buffer: Vec<u8> = Vec::new();
        self.get(TILESET_FILE)?
            .into_reader()
            .read_to_end(&mut buffer)?;
        let tileset: Tileset = serde_json::from_slice(&buffer)?;
        Ok(tileset)
    }

    /// Download `uri` into `output_dir`, unless the file exists already.
    /// The response is streamed to a temporary file that is renamed when it is complete.
    pub fn download(&self, uri: &str, output_dir: &Path) -> Result<Download, FetchError> {
        let path = local_path(output_dir, uri)?;
        if path.exists() {
            debug!("{} exists, skipping", path.display());
            return Ok(Download::Skipped);
        }
        let dir = path.parent().unwrap_or(output_dir);
        fs::create_dir_all(dir)?;
        let response = self.get(uri)?;
        let mut tmp = temp_file_for(&path)?;
        let bytes = io::copy(&mut response.into_reader(), &mut tmp)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(Download::Downloaded(bytes))
    }

    /// Download all URIs on the pool. A failed download is recorded and does not stop
    /// the others.
    pub fn download_all(&self, uris: &[String], output_dir: &Path, pool: &ThreadPool) -> FetchReport {
        info!("Downloading {} files to {}", uris.len(), output_dir.display());
        let results: Vec<(&String, Result<Download, FetchError>)> = pool.install(|| {
            uris.par_iter()
                .map(|uri| (uri, self.download(uri, output_dir)))
                .collect()
        });
        let mut report = FetchReport::default();
        for (uri, result) in results {
            match result {
                Ok(Download::Downloaded(bytes)) => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                Ok(Download::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!("{}: {}", uri, e);
                    report.failed.push((uri.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

/// The local path of a content URI. URIs that are absolute, have a scheme, or step out
/// of the output directory with `..` are refused.
pub fn local_path(output_dir: &Path, uri: &str) -> Result<PathBuf, FetchError> {
    if uri.is_empty() || uri.contains("://") || uri.starts_with('/') || uri.starts_with('\\') {
        return Err(FetchError::UnsafeUri(uri.to_string()));
    }
    let relative = Path::new(uri);
    let mut path = output_dir.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(FetchError::UnsafeUri(uri.to_string())),
        }
    }
    if path == output_dir {
        return Err(FetchError::UnsafeUri(uri.to_string()));
    }
    Ok(path)
}

/// Fetch the remote tileset, prune it to the region, write the pruned tileset to
/// `output_dir` and download the content of the kept tiles.
/// Nothing is written if the tileset cannot be fetched or pruned.
pub fn fetch_region(
    fetcher: &Fetcher,
    output_dir: &Path,
    region: &Region,
    pool: &ThreadPool,
) -> Result<(PruneStats, FetchReport), FetchError> {
    let tileset = fetcher.fetch_tileset()?;
    info!(
        "Fetched {} with {} tiles",
        fetcher.url(TILESET_FILE),
        tileset.tile_count()
    );
    let pruned = prune(tileset, region)?;
    info!(
        "Keeping {} of {} tiles, {} with content",
        pruned.stats.kept,
        pruned.stats.visited,
        pruned.uris.len()
    );

    fs::create_dir_all(output_dir)?;
    let tileset_path = output_dir.join(TILESET_FILE);
    pruned
        .tileset
        .to_file(&tileset_path)
        .map_err(|e| FetchError::WriteTileset {
            path: tileset_path.clone(),
            message: e.to_string(),
        })?;
    info!("Wrote {}", tileset_path.display());

    let report = fetcher.download_all(&pruned.uris, output_dir, pool);
    if !report.failed.is_empty() {
        warn!(
            "{} downloads failed, run the fetch again to retry them",
            report.failed.len()
        );
    }
    Ok((pruned.stats, report))
}
