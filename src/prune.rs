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
//! Prune a tileset to the tiles that intersect the region of interest.
//!
//! We assume that the bounding volume of a tile encloses the bounding volumes of its
//! children, so we do not descend into a tile that is outside of the region.
use log::{debug, warn};
use thiserror::Error;

use crate::formats::cesium3dtiles::{Tile, Tileset};
use crate::spatial_structs::{overlaps, Region};

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("the root tile is outside of the region of interest ({0}), nothing would be kept")]
    RootExcluded(Region),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub visited: usize,
    pub kept: usize,
    pub excluded: usize,
}

/// The result of pruning a tileset.
#[derive(Debug)]
pub struct Pruned {
    pub tileset: Tileset,
    /// The content URIs of the kept tiles, in the order the tiles were visited.
    pub uris: Vec<String>,
    pub stats: PruneStats,
}

/// Prune the tileset to the region.
///
/// The translation of the root transform is applied to the bounding volumes of all
/// tiles. A tile is kept if it intersects the region and it has content or a child that
/// is kept. The root is always kept, unless it is outside of the region, which is an
/// error.
pub fn prune(tileset: Tileset, region: &Region) -> Result<Pruned, PruneError> {
    let Tileset {
        asset,
        geometric_error,
        root,
        other,
    } = tileset;
    let root_offset = root_offset(&root);
    debug!("Root offset: {:?}", &root_offset);

    let mut walker = Walker {
        region,
        root_offset,
        uris: Vec::new(),
        stats: PruneStats::default(),
    };
    if !walker.overlaps(&root) {
        return Err(PruneError::RootExcluded(*region));
    }
    let root = walker.keep(root);
    if root.children().is_empty() && root.content.is_none() {
        warn!("None of the tiles intersect the region, the tileset only has a root");
    }
    Ok(Pruned {
        tileset: Tileset {
            asset,
            geometric_error,
            root,
            other,
        },
        uris: walker.uris,
        stats: walker.stats,
    })
}

/// The translation of the root transform. Zero if there is no transform or it is not a
/// 4x4 matrix.
pub fn root_offset(root: &Tile) -> [f64; 3] {
    match &root.transform {
        Some(transform) => transform.translation().unwrap_or_else(|| {
            warn!(
                "The root transform has {} elements instead of 16, ignoring it",
                transform.0.len()
            );
            [0.0, 0.0, 0.0]
        }),
        None => [0.0, 0.0, 0.0],
    }
}

struct Walker<'region> {
    region: &'region Region,
    root_offset: [f64; 3],
    uris: Vec<String>,
    stats: PruneStats,
}

impl Walker<'_> {
    fn overlaps(&mut self, tile: &Tile) -> bool {
        self.stats.visited += 1;
        match overlaps(tile.bounding_volume.as_ref(), &self.root_offset, self.region) {
            Ok(true) => true,
            Ok(false) => {
                self.stats.excluded += 1;
                false
            }
            Err(e) => {
                debug!("Excluding tile {:?}: {}", tile.content_uri(), e);
                self.stats.excluded += 1;
                false
            }
        }
    }

    /// Consume a tile that intersects the region and return it with only the children
    /// that are kept.
    fn keep(&mut self, mut tile: Tile) -> Tile {
        self.stats.kept += 1;
        if let Some(uri) = tile.content_uri() {
            self.uris.push(uri.to_string());
        }
        if let Some(children) = tile.children.take() {
            let kept: Vec<Tile> = children
                .into_iter()
                .filter_map(|child| self.visit(child))
                .collect();
            if !kept.is_empty() {
                tile.children = Some(kept);
            }
        }
        tile
    }

    fn visit(&mut self, tile: Tile) -> Option<Tile> {
        if !self.overlaps(&tile) {
            return None;
        }
        let tile = self.keep(tile);
        if tile.content.is_none() && tile.children.is_none() {
            // A structural tile without children that are kept
            self.stats.kept -= 1;
            self.stats.excluded += 1;
            None
        } else {
            Some(tile)
        }
    }
}
