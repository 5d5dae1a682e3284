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
//! Delete the files that the tileset of a directory does not reference.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::fetch::TILESET_FILE;
use crate::formats::cesium3dtiles::Tileset;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub referenced: usize,
    /// The unreferenced files, relative to the directory. On a dry-run they are not
    /// deleted.
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
    pub bytes: u64,
}

/// Normalize a content URI to a relative path with `/` separators.
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.replace('\\', "/");
    let mut normalized = uri.as_str();
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped;
    }
    normalized.to_string()
}

/// The paths that the tileset references, relative to its directory. The tileset
/// itself is always referenced.
pub fn referenced_paths(tileset: &Tileset) -> HashSet<String> {
    let mut referenced: HashSet<String> = tileset
        .content_uris()
        .into_iter()
        .map(normalize_uri)
        .collect();
    referenced.insert(TILESET_FILE.to_string());
    referenced
}

fn relative_key(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<&str>>>()?;
    Some(parts.join("/"))
}

/// Delete every file in `dir` that is not referenced by `dir/tileset.json`, then the
/// directories that became empty. With `dry_run` nothing is deleted, the report lists
/// what would be.
pub fn clean_dir(dir: &Path, dry_run: bool) -> Result<CleanupReport, Box<dyn std::error::Error>> {
    let tileset = Tileset::from_file(dir.join(TILESET_FILE))?;
    let referenced = referenced_paths(&tileset);
    let mut report = CleanupReport {
        referenced: referenced.len(),
        ..Default::default()
    };

    // Collect first, so that we do not delete from the tree that we are walking
    let mut unreferenced: Vec<(PathBuf, u64)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match relative_key(dir, entry.path()) {
            Some(key) if referenced.contains(&key) => {}
            Some(_) => {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                unreferenced.push((entry.into_path(), size));
            }
            None => warn!("Skipping {}, not a valid UTF-8 path", entry.path().display()),
        }
    }
    unreferenced.sort();

    for (path, size) in unreferenced {
        if dry_run {
            info!("Would remove {}", path.display());
        } else {
            debug!("Removing {}", path.display());
            fs::remove_file(&path)?;
        }
        report.bytes += size;
        report
            .removed_files
            .push(path.strip_prefix(dir).unwrap_or(&path).to_path_buf());
    }

    if !dry_run {
        for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
            let entry = entry?;
            if entry.file_type().is_dir() && fs::read_dir(entry.path())?.next().is_none() {
                debug!("Removing empty directory {}", entry.path().display());
                fs::remove_dir(entry.path())?;
                report.removed_dirs.push(
                    entry
                        .path()
                        .strip_prefix(dir)
                        .unwrap_or(entry.path())
                        .to_path_buf(),
                );
            }
        }
    }
    Ok(report)
}

/// Clean each directory with [clean_dir]. A directory that cannot be cleaned is logged
/// and does not stop the others.
pub fn clean_dirs(dirs: &[PathBuf], dry_run: bool) -> Vec<(PathBuf, Result<CleanupReport, String>)> {
    dirs.iter()
        .map(|dir| {
            let result = clean_dir(dir, dry_run).map_err(|e| e.to_string());
            if let Err(e) = &result {
                error!("Cannot clean {}: {}", dir.display(), e);
            }
            (dir.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILESET: &str = r#"{
        "asset": {"version": "1.0"},
        "root": {
            "geometricError": 10,
            "content": {"uri": "./tiles/root.b3dm"},
            "children": [
                {"geometricError": 0, "content": {"uri": "tiles\\0\\a.b3dm"}},
                {"geometricError": 0, "content": {"uri": "tiles/1/b.b3dm"}}
            ]
        }
    }"#;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["tiles/0", "tiles/1", "tiles/2/3"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join(TILESET_FILE), TILESET).unwrap();
        fs::write(root.join("tiles/root.b3dm"), b"root").unwrap();
        fs::write(root.join("tiles/0/a.b3dm"), b"a").unwrap();
        fs::write(root.join("tiles/1/b.b3dm"), b"b").unwrap();
        fs::write(root.join("tiles/1/stale.b3dm"), b"stale").unwrap();
        fs::write(root.join("tiles/2/3/c.b3dm"), b"c").unwrap();
        fs::write(root.join("tileset.json.bak"), b"{}").unwrap();
        dir
    }

    #[test]
    fn test_normalize_uri() {
        assert_eq!(normalize_uri("./tiles/0.b3dm"), "tiles/0.b3dm");
        assert_eq!(normalize_uri("tiles\\0\\1.b3dm"), "tiles/0/1.b3dm");
        assert_eq!(normalize_uri("././a.b3dm"), "a.b3dm");
    }

    #[test]
    fn test_clean_dir() {
        let dir = setup();
        let root = dir.path();
        let report = clean_dir(root, false).unwrap();
        assert_eq!(report.referenced, 4);
        assert_eq!(
            report.removed_files,
            vec![
                PathBuf::from("tiles/1/stale.b3dm"),
                PathBuf::from("tiles/2/3/c.b3dm"),
                PathBuf::from("tileset.json.bak"),
            ]
        );
        assert_eq!(report.bytes, 8);
        assert_eq!(
            report.removed_dirs,
            vec![PathBuf::from("tiles/2/3"), PathBuf::from("tiles/2")]
        );
        assert!(root.join(TILESET_FILE).is_file());
        assert!(root.join("tiles/root.b3dm").is_file());
        assert!(root.join("tiles/0/a.b3dm").is_file());
        assert!(root.join("tiles/1/b.b3dm").is_file());
        assert!(!root.join("tiles/2").exists());

        // Nothing left to do
        let again = clean_dir(root, false).unwrap();
        assert!(again.removed_files.is_empty());
        assert!(again.removed_dirs.is_empty());
    }

    #[test]
    fn test_dry_run() {
        let dir = setup();
        let root = dir.path();
        let report = clean_dir(root, true).unwrap();
        assert_eq!(report.removed_files.len(), 3);
        assert!(report.removed_dirs.is_empty());
        assert!(root.join("tiles/1/stale.b3dm").is_file());
        assert!(root.join("tiles/2/3/c.b3dm").is_file());
    }

    #[test]
    fn test_missing_tileset() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0.b3dm"), b"0").unwrap();
        assert!(clean_dir(dir.path(), false).is_err());
        assert!(dir.path().join("0.b3dm").is_file());
    }

    #[test]
    fn test_failed_dir_does_not_stop_the_others() {
        let broken = tempfile::tempdir().unwrap();
        fs::write(broken.path().join("0.b3dm"), b"0").unwrap();
        let dir = setup();
        let dirs = vec![broken.path().to_path_buf(), dir.path().to_path_buf()];
        let results = clean_dirs(&dirs, false);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert!(broken.path().join("0.b3dm").is_file());
        let report = results[1].1.as_ref().unwrap();
        assert_eq!(report.removed_files.len(), 3);
        assert!(!dir.path().join("tiles/1/stale.b3dm").exists());
    }
}
