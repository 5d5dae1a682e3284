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
//! Reduce the batch table of a b3dm to the attributes that the viewer uses.
//!
//! The 3D BAG batch tables store all attributes of a building in the `attributes`
//! array, one entry per feature. The viewer only needs the construction year and the
//! identifier.
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::bulk::{Outcome, ProcessError, SizeChange};
use crate::formats::b3dm::B3dm;
use crate::formats::write_atomic;

pub const ATTRIBUTES_KEY: &str = "attributes";
/// The construction year.
pub const YEAR_KEY: &str = "oorspronkelijkbouwjaar";
/// Older releases store the construction year under this key.
pub const LEGACY_YEAR_KEY: &str = "bouwjaar";
pub const ID_KEY: &str = "identificatie";

pub type Record = Map<String, Value>;

/// An entry of the `attributes` array. Some producers write the record as a JSON
/// object, others as a string that contains the JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeEntry {
    Record(Record),
    Raw(String),
}

impl From<Value> for AttributeEntry {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(record) => AttributeEntry::Record(record),
            Value::String(raw) => AttributeEntry::Raw(raw),
            other => {
                debug!("Attribute entry is not an object: {}", other);
                AttributeEntry::Record(Record::new())
            }
        }
    }
}

impl AttributeEntry {
    /// The entry as a record. A string that does not contain a JSON object gives an
    /// empty record.
    pub fn into_record(self) -> Record {
        match self {
            AttributeEntry::Record(record) => record,
            AttributeEntry::Raw(raw) => serde_json::from_str::<Record>(&raw).unwrap_or_else(|e| {
                debug!("Cannot parse attribute entry {:?}: {}", raw, e);
                Record::new()
            }),
        }
    }
}

/// Keep only the construction year and the identifier of a record. The year is taken
/// from [YEAR_KEY], or from [LEGACY_YEAR_KEY] if the record does not have the former,
/// and it is always written to [YEAR_KEY].
pub fn project(record: &Record) -> Record {
    let mut projected = Record::new();
    if let Some(year) = record.get(YEAR_KEY).or_else(|| record.get(LEGACY_YEAR_KEY)) {
        projected.insert(YEAR_KEY.to_string(), year.clone());
    }
    if let Some(id) = record.get(ID_KEY) {
        projected.insert(ID_KEY.to_string(), id.clone());
    }
    projected
}

/// The compacted batch table JSON, without padding.
/// Returns `None` if the batch table is empty or it does not have an `attributes` array.
/// The other members of the batch table are kept.
pub fn compact_batch_table(json: &[u8]) -> Result<Option<Vec<u8>>, serde_json::Error> {
    if json.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let mut batch_table: Map<String, Value> = serde_json::from_slice(json)?;
    let entries = match batch_table.get_mut(ATTRIBUTES_KEY) {
        Some(Value::Array(entries)) => std::mem::take(entries),
        Some(_) => {
            warn!("The batch table '{}' member is not an array", ATTRIBUTES_KEY);
            return Ok(None);
        }
        None => return Ok(None),
    };
    let projected: Vec<Value> = entries
        .into_iter()
        .map(|entry| Value::Object(project(&AttributeEntry::from(entry).into_record())))
        .collect();
    batch_table.insert(ATTRIBUTES_KEY.to_string(), Value::Array(projected));
    Ok(Some(serde_json::to_vec(&batch_table)?))
}

/// Compact the batch table of the b3dm in place. Returns `true` if the b3dm changed.
pub fn compact_b3dm(b3dm: &mut B3dm) -> Result<bool, serde_json::Error> {
    match compact_batch_table(&b3dm.batch_table.json)? {
        Some(json) => {
            let before = std::mem::take(&mut b3dm.batch_table.json);
            b3dm.set_batch_table_json(json);
            Ok(b3dm.batch_table.json != before)
        }
        None => Ok(false),
    }
}

/// Compact the batch table of a b3dm file. The file is only written if all steps
/// succeeded and the content changed.
pub fn compact_file<P: AsRef<Path>>(path: P) -> Result<Outcome, ProcessError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let mut b3dm = B3dm::from_bytes(&bytes)?;
    if !compact_b3dm(&mut b3dm)? {
        return Ok(Outcome::Unchanged);
    }
    let compacted = b3dm.to_bytes()?;
    write_atomic(path, &compacted)?;
    Ok(Outcome::Rewritten(SizeChange {
        before: bytes.len(),
        after: compacted.len(),
    }))
}
