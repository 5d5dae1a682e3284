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
//! Configuration of the region of interest.
use std::fs::read_to_string;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;

use crate::spatial_structs::Region;

/// The buffer is never smaller than this, so that the camera can move around the
/// anchor without running into missing tiles.
pub const MIN_BUFFER: f64 = 4.0;
pub const DEFAULT_BUFFER: f64 = 0.5;

/// The area that the viewer lets the camera move in, in RD New (EPSG:28992) meters.
pub const DEFAULT_ANCHOR: Region = Region {
    min_x: 119000.0,
    max_x: 124000.0,
    min_y: 484500.0,
    max_y: 488000.0,
};

/// The region configuration for one run.
///
/// It can be read from a JSON file, eg.
/// ```json
/// { "anchor": { "min_x": 119000, "max_x": 124000, "min_y": 484500, "max_y": 488000 }, "buffer": 0.5 }
/// ```
/// Both members are optional.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RegionConfig {
    pub anchor: Region,
    /// Multiplier of the anchor width (height) that is added on both sides along the
    /// x-axis (y-axis).
    pub buffer: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            anchor: DEFAULT_ANCHOR,
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl RegionConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = read_to_string(path.as_ref())?;
        let config: RegionConfig = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Start from the file if there is one, otherwise from the defaults, then apply the
    /// overrides from the command line.
    pub fn load(
        file: Option<&Path>,
        buffer: Option<f64>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match file {
            Some(path) => {
                debug!("Reading the region configuration from {:?}", path);
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        if let Some(b) = buffer {
            config.buffer = b;
        }
        Ok(config)
    }

    pub fn effective_buffer(&self) -> f64 {
        if self.buffer.is_nan() || self.buffer < MIN_BUFFER {
            if self.buffer != DEFAULT_BUFFER {
                warn!(
                    "The buffer {} is smaller than the minimum, using {} instead",
                    self.buffer, MIN_BUFFER
                );
            }
            MIN_BUFFER
        } else {
            self.buffer
        }
    }

    /// The anchor, expanded with the buffer. The bounds are truncated to whole units.
    pub fn region(&self) -> Region {
        let buffer = self.effective_buffer();
        let buffer_x = self.anchor.width() * buffer;
        let buffer_y = self.anchor.height() * buffer;
        Region::new(
            (self.anchor.min_x - buffer_x).trunc(),
            (self.anchor.max_x + buffer_x).trunc(),
            (self.anchor.min_y - buffer_y).trunc(),
            (self.anchor.max_y + buffer_y).trunc(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region() {
        let region = RegionConfig::default().region();
        // 5000 m wide, 3500 m high, with the minimum buffer of 4x
        assert_eq!(
            region,
            Region::new(99000.0, 144000.0, 470500.0, 502000.0)
        );
    }

    #[test]
    fn test_buffer_is_clamped() {
        let small = RegionConfig {
            anchor: Region::new(0.0, 10.0, 0.0, 20.0),
            buffer: 0.1,
        };
        assert_eq!(small.effective_buffer(), MIN_BUFFER);
        assert_eq!(small.region(), Region::new(-40.0, 50.0, -80.0, 100.0));
        let negative = RegionConfig {
            buffer: -3.0,
            ..small
        };
        assert_eq!(negative.region(), small.region());
        let large = RegionConfig {
            buffer: 5.0,
            ..small
        };
        assert_eq!(large.region(), Region::new(-50.0, 60.0, -100.0, 120.0));
    }

    #[test]
    fn test_bounds_are_truncated() {
        let config = RegionConfig {
            anchor: Region::new(0.5, 1.5, 0.0, 1.0),
            buffer: 4.1,
        };
        let region = config.region();
        assert_eq!(region.min_x, (0.5_f64 - 4.1).trunc());
        assert_eq!(region.max_x, (1.5_f64 + 4.1).trunc());
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.json");
        std::fs::write(
            &path,
            r#"{"anchor": {"min_x": 0, "max_x": 100, "min_y": 0, "max_y": 100}}"#,
        )
        .unwrap();
        let config = RegionConfig::load(Some(&path), None).unwrap();
        assert_eq!(config.anchor, Region::new(0.0, 100.0, 0.0, 100.0));
        assert_eq!(config.buffer, DEFAULT_BUFFER);
        let config = RegionConfig::load(Some(&path), Some(6.0)).unwrap();
        assert_eq!(config.buffer, 6.0);
        let config = RegionConfig::load(None, None).unwrap();
        assert_eq!(config, RegionConfig::default());
    }
}
