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
//! Tile formats.
//! The tileset document that describes the hierarchy, and the b3dm content of the tiles.
use std::fs;
use std::io::Write;
use std::path::Path;

/// A temporary file in the directory of `path`, for renaming over `path` later.
///
/// The file gets the permissions of `path` if it exists. Otherwise it is created with
/// mode 0666 minus the umask, like [std::fs::write] does, and not with the 0600 of
/// [tempfile::NamedTempFile::new_in].
pub fn temp_file_for(path: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let existing = fs::metadata(path).ok().map(|metadata| metadata.permissions());
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    if existing.is_none() {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let tmp = builder.tempfile_in(dir)?;
    if let Some(permissions) = existing {
        tmp.as_file().set_permissions(permissions)?;
    }
    Ok(tmp)
}

/// Replace the file at `path` with `contents`.
///
/// The contents are written to a temporary file in the same directory, which is then
/// renamed over `path`. Readers see either the old or the new file, never a partial one.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let mut tmp = temp_file_for(path)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    /// A new file gets the same mode as one written with fs::write, not 0600.
    #[test]
    fn test_write_atomic_new_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("reference.json");
        fs::write(&reference, b"{}").unwrap();
        let path = dir.path().join("tileset.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert_eq!(mode(&path), mode(&reference));
        assert_ne!(mode(&path), 0o600);
    }

    #[test]
    fn test_write_atomic_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.b3dm");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(mode(&path), 0o640);
    }
}

pub mod cesium3dtiles {
    //! Cesium [3D Tiles](https://github.com/CesiumGS/3d-tiles).
    //! Only the members that we need for cropping a tileset are typed. Every other
    //! member is kept as-is in the `other` map of its parent, in its original order,
    //! so a tileset survives a read-write cycle.
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};

    /// [Tileset](https://github.com/CesiumGS/3d-tiles/tree/main/specification#tileset).
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Tileset {
        pub asset: Asset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub geometric_error: Option<GeometricError>,
        pub root: Tile,
        #[serde(flatten)]
        pub other: Map<String, Value>,
    }

    impl Tileset {
        pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
            let file = File::open(path.as_ref())?;
            let tileset: Tileset = serde_json::from_reader(BufReader::new(file))?;
            Ok(tileset)
        }

        /// Write the tileset to a `tileset.json` file.
        /// The output is indented, so that a pruned tileset can be diffed with the original.
        pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
            let mut buffer = serde_json::to_vec_pretty(self)?;
            buffer.push(b'\n');
            super::write_atomic(path, &buffer)?;
            Ok(())
        }

        /// The content URIs of all tiles, in pre-order.
        pub fn content_uris(&self) -> Vec<&str> {
            let mut uris: Vec<&str> = Vec::new();
            self.root.collect_content_uris(&mut uris);
            uris
        }

        pub fn tile_count(&self) -> usize {
            self.root.count_tiles()
        }
    }

    /// [Asset](https://github.com/CesiumGS/3d-tiles/tree/main/specification#asset).
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Asset {
        pub version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tileset_version: Option<String>,
        #[serde(flatten)]
        pub other: Map<String, Value>,
    }

    impl Default for Asset {
        fn default() -> Self {
            Self {
                version: String::from("1.0"),
                tileset_version: None,
                other: Map::new(),
            }
        }
    }

    /// [geometricError](https://github.com/CesiumGS/3d-tiles/tree/main/specification#tilesetgeometricerror-white_check_mark).
    /// Must be `>=0`.
    pub type GeometricError = f64;

    /// [Tile](https://github.com/CesiumGS/3d-tiles/tree/main/specification#tile).
    ///
    /// The bounding volume is optional here even though 3D Tiles requires it, because
    /// a tile without one must not make the whole tileset unreadable.
    #[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Tile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub bounding_volume: Option<BoundingVolume>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub geometric_error: Option<GeometricError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub refine: Option<Refinement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub transform: Option<Transform>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub content: Option<Content>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub children: Option<Vec<Tile>>,
        #[serde(flatten)]
        pub other: Map<String, Value>,
    }

    impl Tile {
        pub fn content_uri(&self) -> Option<&str> {
            self.content.as_ref().and_then(|c| c.uri.as_deref())
        }

        pub fn children(&self) -> &[Tile] {
            self.children.as_deref().unwrap_or(&[])
        }

        fn collect_content_uris<'tile>(&'tile self, uris: &mut Vec<&'tile str>) {
            if let Some(uri) = self.content_uri() {
                uris.push(uri);
            }
            for child in self.children() {
                child.collect_content_uris(uris);
            }
        }

        pub fn count_tiles(&self) -> usize {
            1 + self.children().iter().map(Tile::count_tiles).sum::<usize>()
        }
    }

    /// [boundingVolume](https://github.com/CesiumGS/3d-tiles/tree/main/specification#bounding-volume).
    ///
    /// Kept as the raw JSON value and only interpreted by the overlap test, so a
    /// malformed bounding volume excludes its tile instead of failing the parse of the
    /// tileset. It is written back as it was read.
    #[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
    #[serde(transparent)]
    pub struct BoundingVolume(pub Value);

    impl BoundingVolume {
        pub fn from_box(obb: [f64; 12]) -> Self {
            let mut map = Map::new();
            map.insert("box".to_string(), Value::from(obb.to_vec()));
            Self(Value::Object(map))
        }

        /// The members of the bounding volume, `None` if it is not a JSON object.
        pub fn members(&self) -> Option<&Map<String, Value>> {
            self.0.as_object()
        }

        /// The `box` member.
        pub fn obb(&self) -> Option<&Value> {
            self.members().and_then(|members| members.get("box"))
        }
    }

    /// [Tile.refine](https://github.com/CesiumGS/3d-tiles/tree/main/specification#tilerefine).
    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Refinement {
        Add,
        Replace,
    }

    /// [Tile.transform](https://github.com/CesiumGS/3d-tiles/tree/main/specification#tiletransform).
    /// A 4x4 matrix, stored in column-major order.
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Transform(pub Vec<f64>);

    impl Transform {
        /// The translation part of the matrix (elements 12, 13, 14), if the matrix has
        /// the expected 16 elements.
        pub fn translation(&self) -> Option<[f64; 3]> {
            if self.0.len() == 16 {
                Some([self.0[12], self.0[13], self.0[14]])
            } else {
                None
            }
        }
    }

    impl Default for Transform {
        fn default() -> Self {
            Self(vec![
                1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ])
        }
    }

    /// [Tile.content](https://github.com/CesiumGS/3d-tiles/tree/main/specification#content).
    #[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
    pub struct Content {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub uri: Option<String>,
        #[serde(flatten)]
        pub other: Map<String, Value>,
    }

    impl Content {
        pub fn new(uri: &str) -> Self {
            Self {
                uri: Some(uri.to_string()),
                other: Map::new(),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TILESET: &str = r#"{
            "asset": { "version": "1.1", "generator": "tyler" },
            "geometricError": 500,
            "root": {
                "boundingVolume": { "box": [0, 0, 0, 100, 0, 0, 0, 100, 0, 0, 0, 10] },
                "geometricError": 100,
                "refine": "REPLACE",
                "transform": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 1000, 2000, 0, 1],
                "children": [
                    {
                        "boundingVolume": { "box": [50, 50, 0, 10, 0, 0, 0, 10, 0, 0, 0, 10] },
                        "geometricError": 0,
                        "content": { "uri": "tiles/0/0.b3dm" },
                        "extras": { "lod": "2.2" }
                    },
                    {
                        "boundingVolume": { "region": [0.1, 0.8, 0.2, 0.9, 0, 10] },
                        "geometricError": 0,
                        "content": { "uri": "tiles/0/1.b3dm" }
                    }
                ]
            },
            "extensionsUsed": ["3DTILES_content_gltf"]
        }"#;

        #[test]
        fn test_refinement() {
            let r = Refinement::Replace;
            let j = serde_json::to_string(&r).unwrap();
            assert_eq!(j, r#""REPLACE""#.to_string());
        }

        #[test]
        fn test_parse_tileset() {
            let tileset: Tileset = serde_json::from_str(TILESET).unwrap();
            assert_eq!(tileset.asset.version, "1.1");
            assert_eq!(tileset.tile_count(), 3);
            assert_eq!(
                tileset.content_uris(),
                vec!["tiles/0/0.b3dm", "tiles/0/1.b3dm"]
            );
            let translation = tileset.root.transform.as_ref().unwrap().translation();
            assert_eq!(translation, Some([1000.0, 2000.0, 0.0]));
            let second = &tileset.root.children()[1];
            let bounding_volume = second.bounding_volume.as_ref().unwrap();
            assert!(bounding_volume.obb().is_none());
            assert!(bounding_volume.members().unwrap().contains_key("region"));
        }

        /// Members that are not typed must survive a read-write cycle, in their order.
        #[test]
        fn test_unknown_members_roundtrip() {
            let tileset: Tileset = serde_json::from_str(TILESET).unwrap();
            let written = serde_json::to_string_pretty(&tileset).unwrap();
            let reread: Tileset = serde_json::from_str(&written).unwrap();
            assert_eq!(tileset, reread);
            assert!(written.contains("\"generator\": \"tyler\""));
            assert!(written.contains("\"extensionsUsed\""));
            assert!(written.contains("\"lod\": \"2.2\""));
            assert!(written.find("\"asset\"").unwrap() < written.find("\"root\"").unwrap());
        }

        #[test]
        fn test_transform_translation() {
            assert_eq!(Transform::default().translation(), Some([0.0, 0.0, 0.0]));
            assert_eq!(Transform(vec![1.0, 2.0]).translation(), None);
        }

        /// A bounding volume that is not an object does not make the tileset unreadable.
        #[test]
        fn test_malformed_bounding_volume_is_kept() {
            let json = r#"{
                "asset": { "version": "1.0" },
                "root": {
                    "boundingVolume": { "box": [0, 0, 0, 100, 0, 0, 0, 100, 0, 0, 0, 10] },
                    "geometricError": 100,
                    "children": [
                        { "boundingVolume": [1, 2, 3], "geometricError": 0 },
                        { "boundingVolume": "x", "geometricError": 0 }
                    ]
                }
            }"#;
            let tileset: Tileset = serde_json::from_str(json).unwrap();
            let children = tileset.root.children();
            assert_eq!(
                children[0].bounding_volume,
                Some(BoundingVolume(serde_json::json!([1, 2, 3])))
            );
            assert!(children[1].bounding_volume.as_ref().unwrap().members().is_none());
            let written = serde_json::to_string(&tileset).unwrap();
            assert!(written.contains(r#""boundingVolume":[1,2,3]"#));
            assert!(written.contains(r#""boundingVolume":"x""#));
        }

        #[test]
        fn test_to_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("tileset.json");
            let tileset: Tileset = serde_json::from_str(TILESET).unwrap();
            tileset.to_file(&path).unwrap();
            let reread = Tileset::from_file(&path).unwrap();
            assert_eq!(tileset, reread);
        }
    }
}

pub mod b3dm {
    //! [Batched 3D Model](https://github.com/CesiumGS/3d-tiles/tree/main/specification/TileFormats/Batched3DModel).
    //!
    //! ```shell
    //! +--------+--------------------+----------------------+------------------+--------------------+-----+
    //! | header | feature table JSON | feature table binary | batch table JSON | batch table binary | glb |
    //! +--------+--------------------+----------------------+------------------+--------------------+-----+
    //!   28 B
    //! ```
    //!
    //! The header stores the lengths of the four tables, everything after the tables is
    //! the embedded glTF binary. The tables themselves are not length-prefixed.
    use thiserror::Error;

    pub const MAGIC: [u8; 4] = *b"b3dm";
    pub const VERSION: u32 = 1;
    pub const HEADER_BYTE_LENGTH: usize = 28;
    /// Rewritten JSON tables are padded to a multiple of this length. The offsets of
    /// the tables and the glb relative to the end of the header stay multiples of it.
    pub const JSON_ALIGNMENT: usize = 8;
    /// Magic of a [binary glTF](https://registry.khronos.org/glTF/specs/2.0/glTF-2.0.html#binary-gltf-layout).
    pub const GLB_MAGIC: [u8; 4] = *b"glTF";

    #[derive(Error, Debug)]
    pub enum FormatError {
        #[error("expected a 28 byte header, but the data is only {0} bytes long")]
        TruncatedHeader(usize),
        #[error("invalid magic {:?}, expected \"b3dm\"", String::from_utf8_lossy(.0))]
        InvalidMagic([u8; 4]),
        #[error("the {table} declares {declared} bytes at offset {offset}, but the data is {available} bytes long")]
        TruncatedTable {
            table: &'static str,
            declared: usize,
            offset: usize,
            available: usize,
        },
        #[error("a b3dm of {0} bytes does not fit the 32-bit byteLength")]
        TooLarge(usize),
    }

    /// The 28-byte b3dm header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Header {
        pub version: u32,
        /// The declared byte length. Not checked against the real size of the data.
        pub byte_length: u32,
        pub feature_table_json_byte_length: u32,
        pub feature_table_binary_byte_length: u32,
        pub batch_table_json_byte_length: u32,
        pub batch_table_binary_byte_length: u32,
    }

    impl Header {
        pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
            if bytes.len() < HEADER_BYTE_LENGTH {
                return Err(FormatError::TruncatedHeader(bytes.len()));
            }
            let magic: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if magic != MAGIC {
                return Err(FormatError::InvalidMagic(magic));
            }
            let field = |i: usize| {
                let start = 4 + i * 4;
                u32::from_le_bytes([
                    bytes[start],
                    bytes[start + 1],
                    bytes[start + 2],
                    bytes[start + 3],
                ])
            };
            Ok(Self {
                version: field(0),
                byte_length: field(1),
                feature_table_json_byte_length: field(2),
                feature_table_binary_byte_length: field(3),
                batch_table_json_byte_length: field(4),
                batch_table_binary_byte_length: field(5),
            })
        }

        fn write(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(&MAGIC);
            for field in [
                self.version,
                self.byte_length,
                self.feature_table_json_byte_length,
                self.feature_table_binary_byte_length,
                self.batch_table_json_byte_length,
                self.batch_table_binary_byte_length,
            ] {
                buffer.extend_from_slice(&field.to_le_bytes());
            }
        }
    }

    /// A feature table or a batch table: a JSON header and an optional binary body.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Table {
        pub json: Vec<u8>,
        pub binary: Vec<u8>,
    }

    impl Table {
        fn byte_length(&self) -> usize {
            self.json.len() + self.binary.len()
        }
    }

    /// A decoded b3dm.
    ///
    /// The byte length is not stored, it is always computed from the current contents,
    /// see [B3dm::byte_length].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct B3dm {
        pub version: u32,
        pub feature_table: Table,
        pub batch_table: Table,
        pub glb: Vec<u8>,
    }

    impl B3dm {
        /// Slice the tables by the lengths that are declared in the header. Whatever
        /// follows the four tables is the glb.
        pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
            let header = Header::parse(bytes)?;
            let mut offset = HEADER_BYTE_LENGTH;
            let mut next = |table: &'static str, declared: u32| -> Result<Vec<u8>, FormatError> {
                let declared = declared as usize;
                let end = offset
                    .checked_add(declared)
                    .filter(|end| *end <= bytes.len())
                    .ok_or(FormatError::TruncatedTable {
                        table,
                        declared,
                        offset,
                        available: bytes.len(),
                    })?;
                let slice = bytes[offset..end].to_vec();
                offset = end;
                Ok(slice)
            };
            let feature_table = Table {
                json: next("feature table JSON", header.feature_table_json_byte_length)?,
                binary: next("feature table binary", header.feature_table_binary_byte_length)?,
            };
            let batch_table = Table {
                json: next("batch table JSON", header.batch_table_json_byte_length)?,
                binary: next("batch table binary", header.batch_table_binary_byte_length)?,
            };
            Ok(Self {
                version: header.version,
                feature_table,
                batch_table,
                glb: bytes[offset..].to_vec(),
            })
        }

        /// The exact size of the encoded b3dm.
        pub fn byte_length(&self) -> usize {
            HEADER_BYTE_LENGTH
                + self.feature_table.byte_length()
                + self.batch_table.byte_length()
                + self.glb.len()
        }

        /// The offset of the glb in the encoded b3dm.
        pub fn glb_offset(&self) -> usize {
            self.byte_length() - self.glb.len()
        }

        /// Build the header from the current contents of the tables.
        pub fn header(&self) -> Result<Header, FormatError> {
            let byte_length = self.byte_length();
            let to_u32 = |n: usize| u32::try_from(n).map_err(|_| FormatError::TooLarge(byte_length));
            Ok(Header {
                version: self.version,
                byte_length: to_u32(byte_length)?,
                feature_table_json_byte_length: to_u32(self.feature_table.json.len())?,
                feature_table_binary_byte_length: to_u32(self.feature_table.binary.len())?,
                batch_table_json_byte_length: to_u32(self.batch_table.json.len())?,
                batch_table_binary_byte_length: to_u32(self.batch_table.binary.len())?,
            })
        }

        pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
            let header = self.header()?;
            let mut buffer: Vec<u8> = Vec::with_capacity(self.byte_length());
            header.write(&mut buffer);
            buffer.extend_from_slice(&self.feature_table.json);
            buffer.extend_from_slice(&self.feature_table.binary);
            buffer.extend_from_slice(&self.batch_table.json);
            buffer.extend_from_slice(&self.batch_table.binary);
            buffer.extend_from_slice(&self.glb);
            Ok(buffer)
        }

        /// Replace the batch table JSON. The JSON is padded with spaces to
        /// [JSON_ALIGNMENT].
        pub fn set_batch_table_json(&mut self, mut json: Vec<u8>) {
            pad_json(&mut json);
            self.batch_table.json = json;
        }

        /// Does the glb start with the binary glTF magic?
        pub fn has_glb(&self) -> bool {
            self.glb.starts_with(&GLB_MAGIC)
        }
    }

    /// Pad with trailing spaces (0x20) to a multiple of [JSON_ALIGNMENT]. JSON parsers
    /// ignore the trailing whitespace.
    pub fn pad_json(json: &mut Vec<u8>) {
        let remainder = json.len() % JSON_ALIGNMENT;
        if remainder != 0 {
            json.resize(json.len() + JSON_ALIGNMENT - remainder, b' ');
        }
    }

    #[cfg(test)]
    pub(crate) mod tests {
        use super::*;

        /// A minimal glb: the 12-byte glTF header followed by an empty JSON chunk.
        pub(crate) fn glb_fixture() -> Vec<u8> {
            let mut glb: Vec<u8> = Vec::new();
            glb.extend_from_slice(&GLB_MAGIC);
            glb.extend_from_slice(&2_u32.to_le_bytes());
            glb.extend_from_slice(&20_u32.to_le_bytes());
            glb.extend_from_slice(&0_u32.to_le_bytes());
            glb.extend_from_slice(b"JSON");
            glb
        }

        pub(crate) fn b3dm_fixture(batch_table_json: &str) -> B3dm {
            let mut feature_table_json = br#"{"BATCH_LENGTH":2}"#.to_vec();
            pad_json(&mut feature_table_json);
            let mut batch = B3dm {
                version: VERSION,
                feature_table: Table {
                    json: feature_table_json,
                    binary: vec![],
                },
                batch_table: Table {
                    json: vec![],
                    binary: vec![1, 2, 3, 4, 5, 6, 7, 8],
                },
                glb: glb_fixture(),
            };
            batch.set_batch_table_json(batch_table_json.as_bytes().to_vec());
            batch
        }

        #[test]
        fn test_roundtrip() {
            let b3dm = b3dm_fixture(r#"{"attributes":[{"identificatie":"NL.1"}]}"#);
            let bytes = b3dm.to_bytes().unwrap();
            let decoded = B3dm::from_bytes(&bytes).unwrap();
            assert_eq!(decoded, b3dm);
            let again = B3dm::from_bytes(&decoded.to_bytes().unwrap()).unwrap();
            assert_eq!(again, decoded);
            assert_eq!(decoded.to_bytes().unwrap(), bytes);
        }

        #[test]
        fn test_byte_length_matches_data() {
            let b3dm = b3dm_fixture(r#"{"attributes":[]}"#);
            let bytes = b3dm.to_bytes().unwrap();
            let header = Header::parse(&bytes).unwrap();
            assert_eq!(header.byte_length as usize, bytes.len());
            assert_eq!(b3dm.byte_length(), bytes.len());
            assert_eq!(header.batch_table_binary_byte_length, 8);
            assert!(B3dm::from_bytes(&bytes).unwrap().has_glb());
        }

        #[test]
        fn test_header_layout() {
            let b3dm = b3dm_fixture("{}");
            let bytes = b3dm.to_bytes().unwrap();
            assert_eq!(&bytes[0..4], b"b3dm");
            assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 1);
            // The 28-byte header shifts everything by 4, so only the offset after the
            // header is a multiple of the alignment
            assert_eq!(b3dm.glb_offset(), 68);
            assert_eq!((b3dm.glb_offset() - HEADER_BYTE_LENGTH) % JSON_ALIGNMENT, 0);
            assert_eq!(&bytes[b3dm.glb_offset()..b3dm.glb_offset() + 4], b"glTF");
        }

        #[test]
        fn test_padding() {
            for len in 0..20 {
                let mut json = vec![b'x'; len];
                pad_json(&mut json);
                assert_eq!(json.len() % JSON_ALIGNMENT, 0);
                assert!(json.len() >= len && json.len() < len + JSON_ALIGNMENT);
                assert!(json[len..].iter().all(|b| *b == b' '));
            }
        }

        #[test]
        fn test_invalid_magic() {
            let mut bytes = b3dm_fixture("{}").to_bytes().unwrap();
            bytes[0..4].copy_from_slice(b"i3dm");
            let err = B3dm::from_bytes(&bytes).unwrap_err();
            assert!(matches!(err, FormatError::InvalidMagic(m) if &m == b"i3dm"));
            assert!(err.to_string().contains("i3dm"));
        }

        #[test]
        fn test_truncated() {
            assert!(matches!(
                B3dm::from_bytes(b"b3dm"),
                Err(FormatError::TruncatedHeader(4))
            ));
            let bytes = b3dm_fixture(r#"{"attributes":[]}"#).to_bytes().unwrap();
            // Cut into the batch table binary
            let cut = HEADER_BYTE_LENGTH + 24 + 24 + 3;
            let err = B3dm::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(
                err,
                FormatError::TruncatedTable {
                    table: "batch table binary",
                    ..
                }
            ));
        }

        /// The declared byte length is not trusted for slicing, trailing bytes are glb.
        #[test]
        fn test_declared_byte_length_is_ignored() {
            let b3dm = b3dm_fixture("{}");
            let mut bytes = b3dm.to_bytes().unwrap();
            bytes[8..12].copy_from_slice(&7_u32.to_le_bytes());
            let decoded = B3dm::from_bytes(&bytes).unwrap();
            assert_eq!(decoded, b3dm);
            let reencoded = decoded.to_bytes().unwrap();
            assert_eq!(Header::parse(&reencoded).unwrap().byte_length as usize, reencoded.len());
        }
    }
}
