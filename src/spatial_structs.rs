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
//! Spatial data structures for selecting the tiles.
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::formats::cesium3dtiles::BoundingVolume;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("the tile does not have a boundingVolume")]
    MissingBoundingVolume,
    #[error("the boundingVolume is not a box")]
    NotABox,
    #[error("the boundingVolume must be an object with a box of 12 numbers")]
    MalformedBox,
}

/// An axis-aligned 2D rectangle in world coordinates.
///
/// The region of interest that decides which tiles we keep. There is no z range, the
/// region is unbounded vertically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Region {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        ]
    }

    /// Separating axis test. Rectangles that only touch along an edge do intersect.
    pub fn intersects(&self, other: &Region) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// The WKT of the region, for debugging the selection in a GIS.
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON(({minx} {miny}, {maxx} {miny}, {maxx} {maxy}, {minx} {maxy}, {minx} {miny}))",
            minx = self.min_x,
            miny = self.min_y,
            maxx = self.max_x,
            maxy = self.max_y
        )
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region (x: [{}, {}], y: [{}, {}])",
            self.min_x, self.max_x, self.min_y, self.max_y
        )
    }
}

/// The `boundingVolume.box` of a tile.
///
/// The 12 numbers of the box are the center, followed by the x-axis, y-axis and z-axis
/// half-length vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: [f64; 3],
    pub half_axes: [[f64; 3]; 3],
}

impl OrientedBox {
    pub fn from_array(b: &[f64; 12]) -> Self {
        Self {
            center: [b[0], b[1], b[2]],
            half_axes: [[b[3], b[4], b[5]], [b[6], b[7], b[8]], [b[9], b[10], b[11]]],
        }
    }

    /// The half-extents along the x and y axis, computed as the length of the x-axis and
    /// y-axis vectors.
    /// For a rotated box this is not the extent of its projection, but in our tilesets
    /// the boxes are axis-aligned.
    pub fn half_extents_xy(&self) -> [f64; 2] {
        let norm = |v: &[f64; 3]| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        [norm(&self.half_axes[0]), norm(&self.half_axes[1])]
    }

    /// The 2D extent of the box after translating it with `offset`.
    pub fn world_extent(&self, offset: &[f64; 3]) -> Region {
        let cx = self.center[0] + offset[0];
        let cy = self.center[1] + offset[1];
        let [hx, hy] = self.half_extents_xy();
        Region::new(cx - hx, cx + hx, cy - hy, cy + hy)
    }
}

impl TryFrom<&BoundingVolume> for OrientedBox {
    type Error = GeometryError;

    fn try_from(bounding_volume: &BoundingVolume) -> Result<Self, Self::Error> {
        if bounding_volume.members().is_none() {
            return Err(GeometryError::MalformedBox);
        }
        let values = match bounding_volume.obb() {
            Some(Value::Array(values)) => values,
            Some(_) => return Err(GeometryError::MalformedBox),
            None => return Err(GeometryError::NotABox),
        };
        if values.len() != 12 {
            return Err(GeometryError::MalformedBox);
        }
        let mut b = [0.0_f64; 12];
        for (i, v) in values.iter().enumerate() {
            b[i] = v
                .as_f64()
                .filter(|n| n.is_finite())
                .ok_or(GeometryError::MalformedBox)?;
        }
        Ok(Self::from_array(&b))
    }
}

/// Does the tile's bounding volume, translated by the root offset, intersect the region?
///
/// Only the x and y axis are tested.
pub fn overlaps(
    bounding_volume: Option<&BoundingVolume>,
    root_offset: &[f64; 3],
    region: &Region,
) -> Result<bool, GeometryError> {
    let bv = bounding_volume.ok_or(GeometryError::MissingBoundingVolume)?;
    let obb = OrientedBox::try_from(bv)?;
    Ok(obb.world_extent(root_offset).intersects(region))
}
