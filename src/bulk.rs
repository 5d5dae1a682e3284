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
//! Rewriting many b3dm files in parallel.
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use thiserror::Error;
use walkdir::WalkDir;

use crate::compress::ToolError;
use crate::formats::b3dm::FormatError;

pub const B3DM_EXTENSION: &str = "b3dm";

/// Why a single file could not be processed. The file is left untouched.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("invalid batch table JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// File size before and after a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeChange {
    pub before: usize,
    pub after: usize,
}

impl SizeChange {
    pub fn reduction_percent(&self) -> f64 {
        if self.before == 0 {
            0.0
        } else {
            (1.0 - self.after as f64 / self.before as f64) * 100.0
        }
    }
}

impl Display for SizeChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} MB -> {:.2} MB ({:.1}%)",
            self.before as f64 / 1024.0 / 1024.0,
            self.after as f64 / 1024.0 / 1024.0,
            self.reduction_percent()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rewritten(SizeChange),
    /// Nothing to do, the file was not written.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub rewritten: usize,
    pub unchanged: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl Summary {
    fn add(&mut self, path: &Path, result: Result<Outcome, ProcessError>) {
        match result {
            Ok(Outcome::Rewritten(change)) => {
                self.rewritten += 1;
                self.bytes_before += change.before;
                self.bytes_after += change.after;
            }
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Err(e) => self.failed.push((path.to_path_buf(), e.to_string())),
        }
    }

    pub fn total(&self) -> usize {
        self.rewritten + self.unchanged + self.failed.len()
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let change = SizeChange {
            before: self.bytes_before,
            after: self.bytes_after,
        };
        write!(
            f,
            "{} files: {} rewritten ({}), {} unchanged, {} failed",
            self.total(),
            self.rewritten,
            change,
            self.unchanged,
            self.failed.len()
        )
    }
}

/// The b3dm files at `path`. If `path` is a file it is returned as-is, if it is a
/// directory it is searched recursively for files with the `.b3dm` extension.
pub fn find_b3dm<P: AsRef<Path>>(path: P) -> Vec<PathBuf> {
    let path = path.as_ref();
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|res| match res {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == B3DM_EXTENSION)
                {
                    Some(entry.into_path())
                } else {
                    None
                }
            }
            Err(e) => {
                warn!("Cannot access {:?}: {}", e.path(), e);
                None
            }
        })
        .collect();
    files.sort();
    files
}

/// A thread pool with `jobs` threads. With `None` (or 0) rayon picks the number of
/// threads.
pub fn thread_pool(jobs: Option<usize>) -> Result<ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
}

/// Apply `process` to each file on the pool. A failure is logged and counted, it does
/// not stop the other files.
pub fn process_all<F>(files: &[PathBuf], pool: &ThreadPool, process: F) -> Summary
where
    F: Fn(&Path) -> Result<Outcome, ProcessError> + Sync,
{
    info!("Processing {} files", files.len());
    let results: Vec<(&PathBuf, Result<Outcome, ProcessError>)> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let result = process(path);
                match &result {
                    Ok(Outcome::Rewritten(change)) => info!("{}: {}", path.display(), change),
                    Ok(Outcome::Unchanged) => debug!("{}: unchanged", path.display()),
                    Err(e) => error!("{}: {}", path.display(), e),
                }
                (path, result)
            })
            .collect()
    });
    let mut summary = Summary::default();
    for (path, result) in results {
        summary.add(path, result);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_b3dm() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tiles/7")).unwrap();
        fs::write(dir.path().join("tiles/7/1.b3dm"), b"").unwrap();
        fs::write(dir.path().join("tiles/0.b3dm"), b"").unwrap();
        fs::write(dir.path().join("tileset.json"), b"{}").unwrap();
        fs::write(dir.path().join("tiles/7/1.glb"), b"").unwrap();
        let files = find_b3dm(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("tiles/0.b3dm"), dir.path().join("tiles/7/1.b3dm")]
        );
        // A single file is returned whatever its extension
        let single = dir.path().join("tileset.json");
        assert_eq!(find_b3dm(&single), vec![single.clone()]);
    }

    #[test]
    fn test_process_all_continues_after_failure() {
        let files = vec![
            PathBuf::from("a.b3dm"),
            PathBuf::from("b.b3dm"),
            PathBuf::from("c.b3dm"),
        ];
        let pool = thread_pool(Some(2)).unwrap();
        let summary = process_all(&files, &pool, |path| {
            if path == Path::new("b.b3dm") {
                Err(ProcessError::Format(FormatError::TruncatedHeader(3)))
            } else if path == Path::new("a.b3dm") {
                Ok(Outcome::Rewritten(SizeChange {
                    before: 100,
                    after: 50,
                }))
            } else {
                Ok(Outcome::Unchanged)
            }
        });
        assert_eq!(summary.rewritten, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, PathBuf::from("b.b3dm"));
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_size_change() {
        let change = SizeChange {
            before: 2 * 1024 * 1024,
            after: 1024 * 1024,
        };
        assert_eq!(change.reduction_percent(), 50.0);
        assert_eq!(change.to_string(), "2.00 MB -> 1.00 MB (50.0%)");
        let empty = SizeChange { before: 0, after: 0 };
        assert_eq!(empty.reduction_percent(), 0.0);
    }
}
